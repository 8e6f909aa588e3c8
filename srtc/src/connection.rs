use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use crate::answer::SdpAnswer;
use crate::candidate::{CandidateEvent, FrameToSend, PeerCandidate};
use crate::config::Direction;
use crate::dtls::DtlsFactory;
use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, EventLoopWaker, MioEventLoop};
use crate::offer::SdpOffer;
use crate::packetize::Packetizer;
use crate::scheduler::LoopScheduler;
use crate::socket::Socket;
use crate::stats::PublishConnectionStats;
use crate::track::Track;

pub const SENDER_REPORTS_INTERVAL: Duration = Duration::from_secs(1);
pub const CONNECTION_STATS_INTERVAL: Duration = Duration::from_secs(5);
pub const CANDIDATE_START_DELAY_STEP: Duration = Duration::from_millis(100);
const POLL_TIMEOUT_CAP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Inactive,
    Connecting,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnTask {
    SenderReports,
    ConnectionStats,
}

pub type ConnectionStateListener = Box<dyn FnMut(ConnectionState) + Send>;
pub type PublishConnectionStatsListener = Box<dyn FnMut(&PublishConnectionStats) + Send>;
pub type FrameListener = Box<dyn FnMut(&Arc<Track>, Bytes) + Send>;

#[derive(Default)]
struct Listeners {
    state: Option<ConnectionStateListener>,
    stats: Option<PublishConnectionStatsListener>,
    frame: Option<FrameListener>,
}

struct SharedState {
    state: ConnectionState,
    quit: bool,
    frame_send_queue: Vec<FrameToSend>,
}

fn set_connection_state(
    shared: &Arc<Mutex<SharedState>>,
    listeners: &Arc<Mutex<Listeners>>,
    state: ConnectionState,
) {
    {
        let mut guard = shared.lock().unwrap();
        if guard.state == state {
            return;
        }
        if guard.state == ConnectionState::Failed || guard.state == ConnectionState::Closed {
            // There is no escape
            return;
        }
        guard.state = state;
        if state == ConnectionState::Failed {
            guard.quit = true;
        }
    }

    let mut guard = listeners.lock().unwrap();
    if let Some(listener) = guard.state.as_mut() {
        listener(state);
    }
}

/// The top-level object: holds tracks and packetizers, launches one
/// candidate per remote host on a dedicated network thread, and forwards
/// frames to the selected candidate.
pub struct PeerConnection {
    shared: Arc<Mutex<SharedState>>,
    listeners: Arc<Mutex<Listeners>>,

    offer: Option<Arc<SdpOffer>>,
    answer: Option<Arc<SdpAnswer>>,
    dtls_factory: Option<Arc<dyn DtlsFactory>>,

    packetizers: HashMap<u32, Arc<Mutex<Packetizer>>>,

    waker: Option<EventLoopWaker>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Default for PeerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerConnection {
    pub fn new() -> Self {
        PeerConnection {
            shared: Arc::new(Mutex::new(SharedState {
                state: ConnectionState::Inactive,
                quit: false,
                frame_send_queue: Vec::new(),
            })),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            offer: None,
            answer: None,
            dtls_factory: None,
            packetizers: HashMap::new(),
            waker: None,
            thread: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().unwrap().state
    }

    pub fn set_connection_state_listener(&self, listener: ConnectionStateListener) {
        self.listeners.lock().unwrap().state = Some(listener);
    }

    pub fn set_publish_connection_stats_listener(
        &self,
        listener: PublishConnectionStatsListener,
    ) {
        self.listeners.lock().unwrap().stats = Some(listener);
    }

    pub fn set_frame_listener(&self, listener: FrameListener) {
        self.listeners.lock().unwrap().frame = Some(listener);
    }

    pub fn set_dtls_factory(&mut self, factory: Arc<dyn DtlsFactory>) {
        self.dtls_factory = Some(factory);
    }

    pub fn set_offer(&mut self, offer: Arc<SdpOffer>) -> Result<()> {
        if self.thread.is_some() {
            return Err(Error::invalid_data("connection is already started"));
        }
        self.offer = Some(offer);
        Ok(())
    }

    pub fn offer(&self) -> Option<Arc<SdpOffer>> {
        self.offer.clone()
    }

    pub fn answer(&self) -> Option<Arc<SdpAnswer>> {
        self.answer.clone()
    }

    pub fn video_single_track(&self) -> Option<Arc<Track>> {
        self.answer.as_ref().and_then(|a| a.video_single_track())
    }

    pub fn audio_track(&self) -> Option<Arc<Track>> {
        self.answer.as_ref().and_then(|a| a.audio_track())
    }

    pub fn video_simulcast_track_list(&self) -> Vec<Arc<Track>> {
        self.answer
            .as_ref()
            .map(|a| a.video_simulcast_track_list().to_vec())
            .unwrap_or_default()
    }

    /// Accepts the parsed answer and launches the network thread.
    pub fn set_answer(&mut self, answer: Arc<SdpAnswer>) -> Result<()> {
        if self.thread.is_some() {
            return Err(Error::invalid_data("connection is already started"));
        }
        let offer = self
            .offer
            .clone()
            .ok_or_else(|| Error::invalid_data("offer must be set first"))?;
        let dtls_factory = self
            .dtls_factory
            .clone()
            .ok_or_else(|| Error::invalid_data("DTLS factory must be set first"))?;

        // One packetizer per publish track, shared with the candidate
        self.packetizers.clear();
        if offer.direction() == Direction::Publish {
            for track in answer.track_list() {
                self.packetizers.insert(
                    track.ssrc(),
                    Arc::new(Mutex::new(Packetizer::new(track.codec()))),
                );
            }
        }

        let event_loop = MioEventLoop::new()?;
        self.waker = Some(event_loop.waker());
        self.answer = Some(answer.clone());

        let shared = self.shared.clone();
        let listeners = self.listeners.clone();
        let thread = thread::Builder::new()
            .name("srtc-network".to_owned())
            .spawn(move || {
                network_thread_func(offer, answer, dtls_factory, event_loop, shared, listeners);
            })
            .map_err(Error::Os)?;
        self.thread = Some(thread);

        Ok(())
    }

    fn queue_frame(&self, track: Arc<Track>, buf: Bytes, csd: Vec<Bytes>) -> Result<()> {
        let packetizer = self
            .packetizers
            .get(&track.ssrc())
            .ok_or_else(|| Error::invalid_data("there is no packetizer for this track"))?
            .clone();

        {
            let mut shared = self.shared.lock().unwrap();
            if !csd.is_empty() {
                // Codec-specific data is accepted in any state
            } else if shared.state != ConnectionState::Connected {
                return Ok(());
            }
            shared.frame_send_queue.push(FrameToSend {
                track,
                packetizer,
                buf,
                csd,
            });
        }
        if let Some(waker) = &self.waker {
            waker.interrupt();
        }
        Ok(())
    }

    pub fn set_video_codec_specific_data(&self, csd: Vec<Bytes>) -> Result<()> {
        let track = self
            .video_single_track()
            .ok_or_else(|| Error::invalid_data("there is no video track"))?;
        self.queue_frame(track, Bytes::new(), csd)
    }

    pub fn publish_video_frame(&self, buf: Bytes) -> Result<()> {
        let track = self
            .video_single_track()
            .ok_or_else(|| Error::invalid_data("there is no video track"))?;
        self.queue_frame(track, buf, Vec::new())
    }

    fn find_simulcast_track(&self, layer_name: &str) -> Result<Arc<Track>> {
        self.video_simulcast_track_list()
            .iter()
            .find(|t| {
                t.simulcast()
                    .map(|info| info.layer.name == layer_name)
                    .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| {
                Error::invalid_data(format!("there is no video layer named {layer_name}"))
            })
    }

    pub fn set_video_simulcast_codec_specific_data(
        &self,
        layer_name: &str,
        csd: Vec<Bytes>,
    ) -> Result<()> {
        let track = self.find_simulcast_track(layer_name)?;
        self.queue_frame(track, Bytes::new(), csd)
    }

    pub fn publish_video_simulcast_frame(&self, layer_name: &str, buf: Bytes) -> Result<()> {
        let track = self.find_simulcast_track(layer_name)?;
        self.queue_frame(track, buf, Vec::new())
    }

    pub fn publish_audio_frame(&self, buf: Bytes) -> Result<()> {
        let track = self
            .audio_track()
            .ok_or_else(|| Error::invalid_data("there is no audio track"))?;
        self.queue_frame(track, buf, Vec::new())
    }

    /// Stops the network thread and transitions to Closed.
    pub fn close(&mut self) {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.quit = true;
        }
        if let Some(waker) = &self.waker {
            waker.interrupt();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn network_thread_func(
    offer: Arc<SdpOffer>,
    answer: Arc<SdpAnswer>,
    dtls_factory: Arc<dyn DtlsFactory>,
    mut event_loop: MioEventLoop,
    shared: Arc<Mutex<SharedState>>,
    listeners: Arc<Mutex<Listeners>>,
) {
    let mut scheduler: LoopScheduler<ConnTask> = LoopScheduler::new();
    let tracks = answer.track_list();

    set_connection_state(&shared, &listeners, ConnectionState::Connecting);

    // One candidate per remote host, IPv4 and IPv6 interleaved and their
    // starts staggered
    let hosts4: Vec<_> = answer
        .host_list()
        .iter()
        .filter(|h| h.addr.is_ipv4())
        .copied()
        .collect();
    let hosts6: Vec<_> = answer
        .host_list()
        .iter()
        .filter(|h| h.addr.is_ipv6())
        .copied()
        .collect();

    let mut candidates: Vec<Option<PeerCandidate>> = Vec::new();
    let mut connect_delay = Duration::ZERO;
    for i in 0..hosts4.len().max(hosts6.len()) {
        for host in [hosts4.get(i), hosts6.get(i)].into_iter().flatten() {
            let token = candidates.len() + 1;
            let mut socket = match Socket::new(host.addr) {
                Ok(socket) => socket,
                Err(e) => {
                    log::error!("failed to create a socket for {}: {e}", host.addr);
                    continue;
                }
            };
            if let Err(e) = event_loop.register(&mut socket, token) {
                log::error!("failed to register a socket for {}: {e}", host.addr);
                continue;
            }
            candidates.push(Some(PeerCandidate::new(
                offer.clone(),
                answer.clone(),
                dtls_factory.clone(),
                *host,
                socket,
                connect_delay,
            )));
        }
        connect_delay += CANDIDATE_START_DELAY_STEP;
    }

    if candidates.is_empty() {
        set_connection_state(&shared, &listeners, ConnectionState::Failed);
        return;
    }

    let mut selected: Option<usize> = None;
    let mut ready: Vec<usize> = Vec::new();

    loop {
        // The poll timeout is bounded by the scheduler, every candidate's
        // own timers and pacer deadlines, and a one second cap
        let mut timeout = scheduler.timeout(POLL_TIMEOUT_CAP).min(POLL_TIMEOUT_CAP);
        for candidate in candidates.iter().flatten() {
            timeout = timeout.min(candidate.timeout(POLL_TIMEOUT_CAP));
        }

        ready.clear();
        if let Err(e) = event_loop.wait(&mut ready, timeout) {
            log::error!("event loop wait failed: {e}");
            set_connection_state(&shared, &listeners, ConnectionState::Failed);
            break;
        }

        let frames: Vec<FrameToSend> = {
            let mut guard = shared.lock().unwrap();
            if guard.quit {
                break;
            }
            std::mem::take(&mut guard.frame_send_queue)
        };

        // Read from the network
        for token in &ready {
            if let Some(Some(candidate)) = candidates.get_mut(token - 1) {
                candidate.receive_from_socket();
            }
        }

        // Connection-level timers
        for task in scheduler.run() {
            match task {
                ConnTask::SenderReports => {
                    scheduler.submit(SENDER_REPORTS_INTERVAL, ConnTask::SenderReports);
                    if offer.direction() == Direction::Publish {
                        if let Some(index) = selected {
                            if let Some(Some(candidate)) = candidates.get_mut(index) {
                                for track in &tracks {
                                    candidate.send_sender_report(track);
                                }
                            }
                        }
                    }
                }
                ConnTask::ConnectionStats => {
                    scheduler.submit(CONNECTION_STATS_INTERVAL, ConnTask::ConnectionStats);

                    let connected =
                        { shared.lock().unwrap().state == ConnectionState::Connected };
                    if connected {
                        let mut stats = PublishConnectionStats::default();
                        for track in &tracks {
                            stats.packet_count += track.stats().sent_packets();
                            stats.byte_count += track.stats().sent_bytes();
                        }
                        if let Some(index) = selected {
                            if let Some(Some(candidate)) = candidates.get(index) {
                                candidate.update_publish_connection_stats(&mut stats);
                            }
                        }
                        let mut guard = listeners.lock().unwrap();
                        if let Some(listener) = guard.stats.as_mut() {
                            listener(&stats);
                        }
                    }
                }
            }
        }

        // Frames go to the selected candidate only
        if let Some(index) = selected {
            if let Some(Some(candidate)) = candidates.get_mut(index) {
                for frame in frames {
                    candidate.add_send_frame(frame);
                }
            }
        }

        // Candidate processing
        let mut events: Vec<(usize, CandidateEvent)> = Vec::new();
        for (index, candidate) in candidates.iter_mut().enumerate() {
            if let Some(candidate) = candidate {
                candidate.run();
                for event in candidate.take_events() {
                    events.push((index, event));
                }
            }
        }

        for (index, event) in events {
            match event {
                CandidateEvent::Connecting => {
                    set_connection_state(&shared, &listeners, ConnectionState::Connecting);
                }
                CandidateEvent::IceSelected => {
                    if selected.is_none() {
                        selected = Some(index);

                        // Drop the other connecting candidates
                        for (i, candidate) in candidates.iter_mut().enumerate() {
                            if i != index {
                                *candidate = None;
                            }
                        }

                        for track in &tracks {
                            track.clear_sources();
                        }

                        scheduler.submit(SENDER_REPORTS_INTERVAL, ConnTask::SenderReports);
                        scheduler.submit(CONNECTION_STATS_INTERVAL, ConnTask::ConnectionStats);
                    }
                }
                CandidateEvent::Connected => {
                    set_connection_state(&shared, &listeners, ConnectionState::Connected);
                }
                CandidateEvent::Frame(track, frame) => {
                    let mut guard = listeners.lock().unwrap();
                    if let Some(listener) = guard.frame.as_mut() {
                        listener(&track, frame);
                    }
                }
                CandidateEvent::FailedToConnect(error) => {
                    log::error!("candidate failed to connect: {error}");
                    candidates[index] = None;

                    if selected == Some(index) {
                        selected = None;
                        set_connection_state(&shared, &listeners, ConnectionState::Failed);
                    } else if selected.is_none()
                        && candidates.iter().all(|c| c.is_none())
                    {
                        // Every candidate has failed
                        set_connection_state(&shared, &listeners, ConnectionState::Failed);
                    }
                }
            }
        }

        let failed = { shared.lock().unwrap().state == ConnectionState::Failed };
        if failed {
            break;
        }
    }

    set_connection_state(&shared, &listeners, ConnectionState::Closed);
}

#[cfg(test)]
mod connection_test {
    use super::*;

    #[test]
    fn test_state_machine_has_no_escape_from_failed() {
        let shared = Arc::new(Mutex::new(SharedState {
            state: ConnectionState::Inactive,
            quit: false,
            frame_send_queue: Vec::new(),
        }));
        let listeners = Arc::new(Mutex::new(Listeners::default()));

        set_connection_state(&shared, &listeners, ConnectionState::Connecting);
        assert_eq!(shared.lock().unwrap().state, ConnectionState::Connecting);

        set_connection_state(&shared, &listeners, ConnectionState::Failed);
        assert_eq!(shared.lock().unwrap().state, ConnectionState::Failed);
        assert!(shared.lock().unwrap().quit);

        set_connection_state(&shared, &listeners, ConnectionState::Connected);
        assert_eq!(shared.lock().unwrap().state, ConnectionState::Failed);
    }

    #[test]
    fn test_listener_sees_transitions() {
        let shared = Arc::new(Mutex::new(SharedState {
            state: ConnectionState::Inactive,
            quit: false,
            frame_send_queue: Vec::new(),
        }));
        let listeners = Arc::new(Mutex::new(Listeners::default()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        listeners.lock().unwrap().state = Some(Box::new(move |state| {
            seen2.lock().unwrap().push(state);
        }));

        set_connection_state(&shared, &listeners, ConnectionState::Connecting);
        set_connection_state(&shared, &listeners, ConnectionState::Connecting);
        set_connection_state(&shared, &listeners, ConnectionState::Connected);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[test]
    fn test_publish_requires_offer_before_answer() {
        let mut connection = PeerConnection::new();
        let answer_err = connection.set_answer(Arc::new(make_answer()));
        assert!(answer_err.is_err());
    }

    fn make_answer() -> SdpAnswer {
        use crate::answer::{Host, SdpAnswerParams, SetupRole};
        use crate::certificate::CertificateHash;
        use crate::config::{Codec, MediaType};
        use crate::track::TrackDescriptor;
        use rtp::extension::ExtensionMap;

        SdpAnswer::new(SdpAnswerParams {
            ice_ufrag: "XYZ67890".to_owned(),
            ice_password: "pwdpwdpwdpwdpwdpwdpwdpwd".to_owned(),
            setup_role: SetupRole::Active,
            certificate_hash: CertificateHash::sha256(vec![1u8; 32]),
            host_list: vec![Host {
                addr: "192.0.2.10:30000".parse().unwrap(),
            }],
            video_extension_map: ExtensionMap::new(),
            audio_extension_map: ExtensionMap::new(),
            video_single_track: Some(Arc::new(Track::new(TrackDescriptor {
                direction: Direction::Publish,
                media_type: MediaType::Video,
                media_id: "0".to_owned(),
                ssrc: 0x11112222,
                payload_type: 96,
                rtx_ssrc: None,
                rtx_payload_type: None,
                codec: Codec::H264,
                profile_level_id: None,
                minptime: None,
                stereo: false,
                simulcast: None,
                clock_rate: 90_000,
                has_nack: false,
                has_pli: false,
            }))),
            video_simulcast_track_list: vec![],
            audio_track: None,
        })
        .unwrap()
    }
}
