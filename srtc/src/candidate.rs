use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use rtcp::packet::Packet as RtcpPacket;
use rtp::extension::SimulcastLayer;
use stun::agent::{make_priority, Agent};
use stun::message::{is_message, Message, MessageClass};
use util::filter::Filter;

use crate::answer::{Host, SdpAnswer};
use crate::config::Direction;
use crate::dtls::{DtlsEngine, DtlsFactory, DtlsRole, HandshakeStatus, KEYING_MATERIAL_LABEL};
use crate::error::Error;
use crate::jitter::JitterBuffer;
use crate::offer::SdpOffer;
use crate::pacer::{SendPacer, DEFAULT_SPREAD};
use crate::packetize::{ExtIds, Packetizer};
use crate::scheduler::{LoopScheduler, TaskId};
use crate::send_history::SendHistory;
use crate::sender_reports::{NtpTime, SenderReportsHistory};
use crate::socket::Socket;
use crate::stats::PublishConnectionStats;
use crate::track::Track;
use crate::twcc::source::{PERIODIC_PROBING_TIMEOUT, PROBE_DURATION, START_PROBING_TIMEOUT};
use crate::twcc::TwccSource;

pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const CONNECTION_LOST_TIMEOUT: Duration = Duration::from_millis(5000);
pub const EXPIRE_STUN_PERIOD: Duration = Duration::from_millis(1000);
pub const EXPIRE_STUN_TIMEOUT: Duration = Duration::from_millis(5000);
pub const KEEP_ALIVE_CHECK_TIMEOUT: Duration = Duration::from_millis(1000);
pub const KEEP_ALIVE_SEND_TIMEOUT: Duration = Duration::from_millis(3000);
pub const CONNECT_REPEAT_PERIOD: Duration = Duration::from_millis(100);
pub const CONNECT_REPEAT_INCREMENT: Duration = Duration::from_millis(100);

static NEXT_CANDIDATE_ID: AtomicU32 = AtomicU32::new(1);

/// Events surfaced to the peer connection after each `run`.
pub enum CandidateEvent {
    Connecting,
    IceSelected,
    Connected,
    FailedToConnect(Error),
    /// A complete codec frame arrived on a subscribed track.
    Frame(Arc<Track>, Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DtlsState {
    Inactive,
    Activating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateTask {
    StartConnecting,
    ConnectTimeout,
    SendStunBindingRequest(u32),
    SendStunUseCandidate(u32),
    ExpireStunRequests,
    ConnectionLostTimeout,
    KeepAliveCheck,
    ConnectionRestoreRequest,
    TwccStartProbing,
    TwccEndProbing,
}

/// A frame handed down from the application.
pub struct FrameToSend {
    pub track: Arc<Track>,
    pub packetizer: Arc<Mutex<Packetizer>>,
    pub buf: Bytes,
    pub csd: Vec<Bytes>,
}

/// One per remote host candidate. Owns the socket, drives the STUN and
/// DTLS handshakes, and after that all media I/O with this host.
pub struct PeerCandidate {
    candidate_id: u32,
    offer: Arc<SdpOffer>,
    answer: Arc<SdpAnswer>,
    tracks: Vec<Arc<Track>>,
    host: Host,
    socket: Rc<Socket>,

    agent: Agent,
    scheduler: LoopScheduler<CandidateTask>,
    events: Vec<CandidateEvent>,

    dtls_factory: Arc<dyn DtlsFactory>,
    dtls: Option<Box<dyn DtlsEngine>>,
    dtls_state: DtlsState,

    srtp: Option<Rc<RefCell<srtp::Session>>>,
    pacer: Option<SendPacer>,
    send_history: Rc<RefCell<SendHistory>>,
    twcc: Option<Rc<RefCell<TwccSource>>>,
    twcc_probing_armed: bool,
    video_ext_ids: ExtIds,

    sender_reports: SenderReportsHistory,
    jitter: Vec<(u32, JitterBuffer)>,

    ice_rtt_filter: Filter,
    rtp_rtt_filter: Filter,

    last_send_time: Rc<Cell<Instant>>,
    last_receive_time: Instant,
    sent_use_candidate: bool,

    raw_send_queue: VecDeque<Bytes>,
    raw_receive_queue: VecDeque<Bytes>,
    frame_send_queue: VecDeque<FrameToSend>,

    task_connect_timeout: Option<TaskId>,
    task_stun_request: Option<TaskId>,
    task_use_candidate: Option<TaskId>,
    task_connection_lost: Option<TaskId>,
    task_keep_alive: Option<TaskId>,
    task_restore: Option<TaskId>,
    task_end_probing: Option<TaskId>,

    last_pli_time: Option<Instant>,
}

fn is_dtls_message(buf: &[u8]) -> bool {
    // https://datatracker.ietf.org/doc/html/rfc7983#section-5
    buf.len() >= 4 && buf[0] >= 20 && buf[0] <= 24
}

fn is_rtc_message(buf: &[u8]) -> bool {
    // https://datatracker.ietf.org/doc/html/rfc3550#section-5.1
    buf.len() >= 8 && buf[0] >= 128 && buf[0] <= 191
}

fn is_rtcp_message(buf: &[u8]) -> bool {
    // https://datatracker.ietf.org/doc/html/rfc5761#section-4
    if buf.len() < 8 {
        return false;
    }
    let payload_id = buf[1] & 0x7F;
    (64..=95).contains(&payload_id)
}

fn layer_bandwidth_scale(layers: &[SimulcastLayer], track: &Track) -> f32 {
    let track_layer = match track.simulcast() {
        Some(info) => &info.layer,
        None => return 1.0,
    };
    if layers.is_empty() {
        return 1.0;
    }
    let total: u32 = layers.iter().map(|l| l.kilobits_per_second).sum();
    if total == 0 {
        return 1.0;
    }
    track_layer.kilobits_per_second as f32 / total as f32
}

impl PeerCandidate {
    pub fn new(
        offer: Arc<SdpOffer>,
        answer: Arc<SdpAnswer>,
        dtls_factory: Arc<dyn DtlsFactory>,
        host: Host,
        socket: Socket,
        start_delay: Duration,
    ) -> Self {
        let candidate_id = NEXT_CANDIDATE_ID.fetch_add(1, Ordering::Relaxed);
        log::trace!("creating candidate #{candidate_id} for {}", host.addr);

        let twcc = TwccSource::factory(offer.direction(), offer.config(), &answer)
            .map(|t| Rc::new(RefCell::new(t)));
        let video_ext_ids = ExtIds::from_extension_map(answer.video_extension_map());

        let tracks = answer.track_list();
        let jitter = if offer.direction() == Direction::Subscribe {
            tracks
                .iter()
                .map(|t| (t.ssrc(), JitterBuffer::new(t.codec())))
                .collect()
        } else {
            Vec::new()
        };

        let mut scheduler = LoopScheduler::new();
        scheduler.submit(start_delay, CandidateTask::StartConnecting);
        scheduler.submit(EXPIRE_STUN_PERIOD, CandidateTask::ExpireStunRequests);

        PeerCandidate {
            candidate_id,
            offer,
            answer,
            tracks,
            host,
            socket: Rc::new(socket),
            agent: Agent::new(),
            scheduler,
            events: Vec::new(),
            dtls_factory,
            dtls: None,
            dtls_state: DtlsState::Inactive,
            srtp: None,
            pacer: None,
            send_history: Rc::new(RefCell::new(SendHistory::new())),
            twcc,
            twcc_probing_armed: false,
            video_ext_ids,
            sender_reports: SenderReportsHistory::new(),
            jitter,
            ice_rtt_filter: Filter::new(0.2),
            rtp_rtt_filter: Filter::new(0.2),
            last_send_time: Rc::new(Cell::new(Instant::now())),
            last_receive_time: Instant::now(),
            sent_use_candidate: false,
            raw_send_queue: VecDeque::new(),
            raw_receive_queue: VecDeque::new(),
            frame_send_queue: VecDeque::new(),
            task_connect_timeout: None,
            task_stun_request: None,
            task_use_candidate: None,
            task_connection_lost: None,
            task_keep_alive: None,
            task_restore: None,
            task_end_probing: None,
            last_pli_time: None,
        }
    }

    pub fn candidate_id(&self) -> u32 {
        self.candidate_id
    }

    pub fn host(&self) -> Host {
        self.host
    }

    /// Moves pending datagrams from the socket into the raw receive queue.
    pub fn receive_from_socket(&mut self) {
        for datagram in self.socket.receive_all() {
            self.raw_receive_queue.push_back(datagram);
        }
    }

    pub fn add_send_frame(&mut self, frame: FrameToSend) {
        self.frame_send_queue.push_back(frame);
    }

    pub fn take_events(&mut self) -> Vec<CandidateEvent> {
        std::mem::take(&mut self.events)
    }

    /// Poll timeout for the network loop: the earlier of the scheduler's
    /// next task and the pacer's next due packet.
    pub fn timeout(&self, default: Duration) -> Duration {
        let mut timeout = self.scheduler.timeout(default);
        if let Some(pacer) = &self.pacer {
            timeout = timeout.min(pacer.timeout(default));
        }
        timeout
    }

    /// Runs one processing pass: due tasks, paced sends, raw sends,
    /// queued frames, then received datagrams.
    pub fn run(&mut self) {
        for task in self.scheduler.run() {
            self.dispatch_task(task);
        }

        if let Some(pacer) = &mut self.pacer {
            pacer.run();
        }

        while let Some(buf) = self.raw_send_queue.pop_front() {
            self.last_send_time.set(Instant::now());
            self.socket.send(&buf);
        }

        while let Some(frame) = self.frame_send_queue.pop_front() {
            self.send_frame(frame);
        }

        while let Some(buf) = self.raw_receive_queue.pop_front() {
            self.process_datagram(buf);
        }

        // Raw data produced while processing (DTLS flights, STUN replies)
        while let Some(buf) = self.raw_send_queue.pop_front() {
            self.last_send_time.set(Instant::now());
            self.socket.send(&buf);
        }
    }

    fn dispatch_task(&mut self, task: CandidateTask) {
        match task {
            CandidateTask::StartConnecting => self.start_connecting(),
            CandidateTask::ConnectTimeout => {
                self.emit_failed(Error::invalid_data("Connect timeout"));
            }
            CandidateTask::SendStunBindingRequest(iteration) => {
                self.send_stun_binding_request(iteration);
            }
            CandidateTask::SendStunUseCandidate(iteration) => {
                self.send_stun_use_candidate(iteration);
            }
            CandidateTask::ExpireStunRequests => {
                self.agent.forget_expired_transactions(EXPIRE_STUN_TIMEOUT);
                self.scheduler
                    .submit(EXPIRE_STUN_PERIOD, CandidateTask::ExpireStunRequests);
            }
            CandidateTask::ConnectionLostTimeout => self.on_connection_lost(),
            CandidateTask::KeepAliveCheck => self.on_keep_alive_check(),
            CandidateTask::ConnectionRestoreRequest => self.send_connection_restore_request(),
            CandidateTask::TwccStartProbing => self.on_start_probing(),
            CandidateTask::TwccEndProbing => {
                if let Some(twcc) = &self.twcc {
                    twcc.borrow_mut().end_probing();
                }
            }
        }
    }

    // ----- connecting

    fn start_connecting(&mut self) {
        self.events.push(CandidateEvent::Connecting);

        let task = self.task_connection_lost.take();
        self.cancel_task(task);
        let task = self.task_keep_alive.take();
        self.cancel_task(task);

        self.srtp = None;
        self.pacer = None;

        let task = self.task_connect_timeout.take();
        self.cancel_task(task);
        self.task_connect_timeout = Some(
            self.scheduler
                .submit(CONNECT_TIMEOUT, CandidateTask::ConnectTimeout),
        );

        self.send_stun_binding_request(0);
    }

    fn cancel_task(&mut self, task: Option<TaskId>) {
        if let Some(id) = task {
            self.scheduler.cancel(id);
        }
    }

    fn outbound_stun_username(&self) -> String {
        format!("{}:{}", self.answer.ice_ufrag(), self.offer.ice_ufrag())
    }

    fn inbound_stun_username(&self) -> String {
        format!("{}:{}", self.offer.ice_ufrag(), self.answer.ice_ufrag())
    }

    fn send_stun_binding_request(&mut self, iteration: u32) {
        log::trace!(
            "sending STUN binding request, iteration {iteration}, #{}",
            self.candidate_id
        );

        let priority = make_priority(200, 10, 1);
        match self.agent.build_request(
            &self.outbound_stun_username(),
            self.answer.ice_password(),
            priority,
            false,
        ) {
            Ok(message) => self.add_send_raw(Bytes::from(message.raw)),
            Err(e) => log::error!("failed to build STUN binding request: {e}"),
        }

        let delay = CONNECT_REPEAT_PERIOD + CONNECT_REPEAT_INCREMENT * (iteration + 1);
        self.task_stun_request = Some(
            self.scheduler
                .submit(delay, CandidateTask::SendStunBindingRequest(iteration + 1)),
        );
    }

    fn send_stun_use_candidate(&mut self, iteration: u32) {
        log::trace!("sending STUN use-candidate request #{}", self.candidate_id);

        let priority = make_priority(200, 10, 1);
        match self.agent.build_request(
            &self.outbound_stun_username(),
            self.answer.ice_password(),
            priority,
            true,
        ) {
            Ok(message) => self.add_send_raw(Bytes::from(message.raw)),
            Err(e) => log::error!("failed to build STUN use-candidate request: {e}"),
        }

        let delay = CONNECT_REPEAT_PERIOD + CONNECT_REPEAT_INCREMENT * (iteration + 1);
        self.task_use_candidate = Some(
            self.scheduler
                .submit(delay, CandidateTask::SendStunUseCandidate(iteration + 1)),
        );
    }

    fn add_send_raw(&mut self, buf: Bytes) {
        self.raw_send_queue.push_back(buf);
    }

    // ----- inbound demux

    fn process_datagram(&mut self, buf: Bytes) {
        if is_message(&buf) {
            log::trace!(
                "received STUN message, {} bytes, #{}",
                buf.len(),
                self.candidate_id
            );
            self.on_received_stun_message(buf);
        } else if self.dtls_state != DtlsState::Inactive && is_dtls_message(&buf) {
            log::trace!(
                "received DTLS message, {} bytes, #{}",
                buf.len(),
                self.candidate_id
            );
            self.on_received_dtls_message(buf);
        } else if is_rtc_message(&buf) {
            self.on_received_rtc_message(buf);
        } else {
            log::trace!("received unknown message, {} bytes", buf.len());
        }
    }

    fn on_received_stun_message(&mut self, buf: Bytes) {
        let mut message = Message::new();
        if let Err(e) = message.unmarshal_binary(&buf) {
            log::warn!("failed to parse STUN message: {e}");
            return;
        }

        match message.typ.class {
            MessageClass::Request => {
                if Agent::verify_request(
                    &mut message,
                    &self.inbound_stun_username(),
                    self.offer.ice_password(),
                ) {
                    match self.agent.build_response(
                        &message,
                        self.host.addr,
                        self.offer.ice_password(),
                    ) {
                        Ok(response) => self.add_send_raw(Bytes::from(response.raw)),
                        Err(e) => log::error!("failed to build STUN response: {e}"),
                    }
                } else {
                    log::warn!("STUN request verification failed, ignoring");
                }
            }
            MessageClass::SuccessResponse | MessageClass::ErrorResponse => {
                let error_code = stun::textattrs::find_error_code(&message).unwrap_or(0);

                let rtt = match self.agent.forget_transaction(message.transaction_id) {
                    Some(rtt) => rtt,
                    None => return,
                };
                self.ice_rtt_filter.update(rtt.as_micros() as f32 / 1000.0);

                if error_code != 0 {
                    log::warn!("STUN response error code {error_code}");
                    return;
                }
                if !Agent::verify_response(&mut message, self.answer.ice_password()) {
                    log::warn!("STUN response verification failed, ignoring");
                    return;
                }

                if self.sent_use_candidate {
                    // Keep-alive or connection restore
                    if self.dtls_state == DtlsState::Completed {
                        self.last_receive_time = Instant::now();
                        self.update_connection_lost_timeout();

                        let restoring = self.task_restore.is_some();
                        let task = self.task_connect_timeout.take();
                        self.cancel_task(task);
                        let task = self.task_restore.take();
                        self.cancel_task(task);

                        if restoring {
                            // Replay windows restart after an ICE restart
                            if let Some(srtp) = &self.srtp {
                                srtp.borrow_mut().reset();
                            }
                        }
                        self.emit_connected();
                    }
                } else {
                    // Initial connection
                    log::trace!("STUN binding response verified, sending use-candidate");
                    self.sent_use_candidate = true;
                    let task = self.task_stun_request.take();
                    self.cancel_task(task);

                    self.events.push(CandidateEvent::IceSelected);
                    self.send_stun_use_candidate(0);
                    self.dtls_state = DtlsState::Activating;
                }
            }
            MessageClass::Indication => {}
        }
    }

    // ----- DTLS

    fn on_received_dtls_message(&mut self, buf: Bytes) {
        let task = self.task_stun_request.take();
        self.cancel_task(task);
        let task = self.task_use_candidate.take();
        self.cancel_task(task);

        if self.dtls.is_none() && self.dtls_state == DtlsState::Activating {
            log::trace!("preparing for the DTLS handshake");

            // actpass resolves so that a setup:active answer makes the
            // local side the DTLS server
            let role = if self.answer.is_setup_active() {
                DtlsRole::Server
            } else {
                DtlsRole::Client
            };

            match self
                .dtls_factory
                .create_engine(role, self.offer.certificate())
            {
                Ok(engine) => self.dtls = Some(engine),
                Err(e) => {
                    self.dtls_state = DtlsState::Failed;
                    self.emit_failed(e);
                    return;
                }
            }
        }

        let Some(dtls) = &mut self.dtls else {
            return;
        };
        dtls.push_incoming(buf);

        if self.dtls_state == DtlsState::Activating {
            let status = dtls.handshake();
            self.drain_dtls_output();

            match status {
                Ok(HandshakeStatus::WantRead) => {
                    log::trace!("DTLS handshake still in progress");
                }
                Ok(HandshakeStatus::Complete) => self.on_dtls_handshake_complete(),
                Err(e) => {
                    log::error!("DTLS handshake failed: {e}");
                    self.dtls_state = DtlsState::Failed;
                    self.dtls = None;
                    let task = self.task_connect_timeout.take();
                    self.cancel_task(task);
                    self.emit_failed(Error::invalid_data(format!(
                        "Failure during DTLS handshake: {e}"
                    )));
                }
            }
        } else if self.dtls_state == DtlsState::Completed {
            let _ = dtls.handshake();
            self.drain_dtls_output();
        }
    }

    fn drain_dtls_output(&mut self) {
        let mut out = Vec::new();
        if let Some(dtls) = &mut self.dtls {
            while let Some(datagram) = dtls.pop_outgoing() {
                out.push(datagram);
            }
        }
        for datagram in out {
            self.add_send_raw(datagram);
        }
    }

    fn on_dtls_handshake_complete(&mut self) {
        let dtls = self.dtls.as_ref().unwrap();

        let peer_hash = match dtls.peer_certificate_sha256() {
            Ok(hash) => hash,
            Err(e) => {
                self.dtls_state = DtlsState::Failed;
                let task = self.task_connect_timeout.take();
                self.cancel_task(task);
                self.emit_failed(Error::invalid_data(format!(
                    "There is no DTLS server certificate: {e}"
                )));
                return;
            }
        };

        let expected = self.answer.certificate_hash();
        if expected.bin != peer_hash {
            log::error!("server certificate does not match the fingerprint");
            self.dtls_state = DtlsState::Failed;
            let task = self.task_connect_timeout.take();
            self.cancel_task(task);
            self.emit_failed(Error::invalid_data("Certificate hash doesn't match"));
            return;
        }

        let session = match self.create_srtp_session() {
            Ok(session) => session,
            Err(e) => {
                self.dtls_state = DtlsState::Failed;
                let task = self.task_connect_timeout.take();
                self.cancel_task(task);
                self.emit_failed(e);
                return;
            }
        };

        let srtp = Rc::new(RefCell::new(session));
        self.srtp = Some(srtp.clone());
        self.pacer = Some(SendPacer::new(
            self.offer.config().clone(),
            srtp,
            self.socket.clone(),
            self.send_history.clone(),
            self.twcc.clone(),
            self.last_send_time.clone(),
        ));
        self.dtls_state = DtlsState::Completed;

        log::debug!(
            "connected to {} with profile {:?}, ice rtt = {:.2} ms",
            self.host.addr,
            self.srtp.as_ref().unwrap().borrow().profile(),
            self.ice_rtt_filter.value().unwrap_or(0.0)
        );

        let task = self.task_connect_timeout.take();
        self.cancel_task(task);
        self.emit_connected();

        self.last_receive_time = Instant::now();
        self.update_connection_lost_timeout();
        self.update_keep_alive_timeout();
    }

    fn create_srtp_session(&self) -> crate::error::Result<srtp::Session> {
        let dtls = self.dtls.as_ref().unwrap();
        let profile = dtls.selected_srtp_profile()?;
        let material =
            dtls.export_keying_material(KEYING_MATERIAL_LABEL, profile.keying_material_len())?;
        Ok(srtp::Session::from_keying_material(
            profile,
            &material,
            self.answer.is_setup_active(),
        )?)
    }

    // ----- media receive

    fn on_received_rtc_message(&mut self, buf: Bytes) {
        let Some(srtp) = self.srtp.clone() else {
            return;
        };

        if is_rtcp_message(&buf) {
            let plain = match srtp.borrow_mut().unprotect_rtcp(&buf) {
                Ok(plain) => plain,
                Err(e) => {
                    log::warn!("failed to unprotect RTCP: {e}");
                    return;
                }
            };
            match rtcp::packet::unmarshal_compound(&plain) {
                Ok(packets) => {
                    for packet in packets {
                        self.on_received_control_packet(packet);
                    }
                }
                Err(e) => log::warn!("failed to parse RTCP compound: {e}"),
            }
        } else {
            let plain = match srtp.borrow_mut().unprotect_rtp(&buf) {
                Ok(plain) => plain,
                Err(e) => {
                    log::debug!("failed to unprotect RTP: {e}");
                    return;
                }
            };
            self.on_received_media_packet(plain);
        }
    }

    fn on_received_control_packet(&mut self, packet: RtcpPacket) {
        self.last_receive_time = Instant::now();
        self.update_connection_lost_timeout();

        match packet {
            RtcpPacket::ReceiverReport(rr) => {
                for report in &rr.reports {
                    if let Some(rtt) = self.sender_reports.calculate_rtt_ms(
                        report.ssrc,
                        report.last_sender_report,
                        report.delay,
                    ) {
                        log::trace!("RTT from receiver report: {rtt:.2} ms");
                        self.rtp_rtt_filter.update(rtt);
                    }
                }
            }
            RtcpPacket::TransportLayerNack(nack) => self.on_received_nack(nack),
            RtcpPacket::TransportLayerCc(cc) => {
                if let Some(twcc) = self.twcc.clone() {
                    let stop_probe = twcc.borrow_mut().on_received_feedback(&cc);
                    if stop_probe {
                        let task = self.task_end_probing.take();
                        self.cancel_task(task);
                    }
                }
            }
            RtcpPacket::SenderReport(_)
            | RtcpPacket::SourceDescription(_)
            | RtcpPacket::PictureLossIndication(_)
            | RtcpPacket::Unsupported { .. } => {}
        }
    }

    fn on_received_media_packet(&mut self, plain: Bytes) {
        self.last_receive_time = Instant::now();
        self.update_connection_lost_timeout();

        let mut reader = plain.clone();
        let packet = match rtp::packet::Packet::unmarshal(&mut reader) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("failed to parse RTP packet: {e}");
                return;
            }
        };

        let ssrc = packet.header.ssrc;
        let pt = packet.header.payload_type;
        let Some(track) = self.find_media_track(ssrc, pt) else {
            log::debug!("RTP packet for unknown ssrc {ssrc} pt {pt}");
            return;
        };

        if track.direction() != Direction::Subscribe {
            return;
        }

        let track_ssrc = track.ssrc();
        if let Some((_, jitter)) = self.jitter.iter_mut().find(|(s, _)| *s == track_ssrc) {
            jitter.put(packet);

            let now = Instant::now();
            for frame in jitter.pop_frames(now) {
                self.events.push(CandidateEvent::Frame(track.clone(), frame));
            }

            if track.has_nack() {
                let missing = jitter.nacks_due(now);
                if !missing.is_empty() {
                    self.send_nack(&track, &missing);
                }
            }

            let needs_key_frame =
                self.jitter.iter().any(|(s, j)| *s == track_ssrc && j.waiting_for_key_frame());
            if track.has_pli() && needs_key_frame {
                self.maybe_send_pli(&track, now);
            }
        }
    }

    /// Asks for a key frame while the jitter buffer cannot start
    /// decoding, at most once per second.
    fn maybe_send_pli(&mut self, track: &Arc<Track>, now: Instant) {
        if let Some(last) = self.last_pli_time {
            if now.duration_since(last) < Duration::from_secs(1) {
                return;
            }
        }
        self.last_pli_time = Some(now);

        let pli = rtcp::picture_loss_indication::PictureLossIndication {
            sender_ssrc: track.ssrc(),
            media_ssrc: track.ssrc(),
        };
        match pli.marshal() {
            Ok(data) => self.send_rtcp_data(track, &data),
            Err(e) => log::warn!("failed to build PLI: {e}"),
        }
    }

    fn find_media_track(&self, ssrc: u32, pt: u8) -> Option<Arc<Track>> {
        for track in &self.tracks {
            if track.ssrc() == ssrc && track.payload_type() == pt {
                return Some(track.clone());
            }
            if track.rtx_ssrc() == Some(ssrc) && track.rtx_payload_type() == Some(pt) {
                return Some(track.clone());
            }
        }
        None
    }

    // ----- NACK / RTX

    fn on_received_nack(&mut self, nack: rtcp::transport_layer_nack::TransportLayerNack) {
        for pair in &nack.nacks {
            for seq in pair.packet_list() {
                self.resend_packet(nack.media_ssrc, seq);
            }
        }
    }

    fn resend_packet(&mut self, ssrc: u32, seq: u16) {
        let Some(srtp) = self.srtp.clone() else {
            return;
        };

        let history = self.send_history.clone();
        let history_ref = history.borrow();
        let Some(sent) = history_ref.find(ssrc, seq) else {
            log::trace!("cannot find packet ssrc {ssrc} seq {seq} for re-sending");
            return;
        };

        let track = sent.track.clone();
        if let Some(twcc) = &self.twcc {
            twcc.borrow_mut().on_packet_was_nacked(&sent.packet, &track);
        }

        let (packet, rollover) = if let (Some(rtx_pt), Some(rtx_ssrc)) =
            (track.rtx_payload_type(), track.rtx_ssrc())
        {
            // Retransmit on the RTX stream with the original sequence
            // prepended; simulcast packets swap the stream id for the
            // repaired stream id and keep the layers allocation as sent
            let mut ext_header = sent.packet.header.clone();
            if track.is_simulcast() {
                if let Some(info) = track.simulcast() {
                    if self.video_ext_ids.rid != 0 {
                        ext_header.del_extension(self.video_ext_ids.rid);
                    }
                    if self.video_ext_ids.repaired_rid != 0 {
                        let _ = ext_header.set_extension(
                            self.video_ext_ids.repaired_rid,
                            info.layer.name.as_bytes(),
                        );
                    }
                }
            }

            let (rtx_seq, rtx_rollover) = track.next_rtx_sequence();
            (
                sent.packet.to_rtx(rtx_pt, rtx_ssrc, rtx_seq, Some(&ext_header)),
                rtx_rollover,
            )
        } else {
            (sent.packet.clone(), sent.rollover)
        };
        drop(history_ref);

        let generated = match packet.marshal() {
            Ok(data) => data,
            Err(e) => {
                log::warn!("error generating packet for re-sending: {e}");
                return;
            }
        };
        let protected = match srtp.borrow_mut().protect_rtp(&generated, rollover) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("error protecting packet for re-sending: {e}");
                return;
            }
        };

        log::trace!(
            "re-sent RTP packet ssrc {ssrc} seq {seq}, rtx {}",
            track.rtx_payload_type().is_some()
        );
        let sent_size = self.socket.send(&protected);
        self.last_send_time.set(Instant::now());

        track.stats().increment_sent_packets(1);
        track.stats().increment_sent_bytes(sent_size as u64);
    }

    fn send_nack(&mut self, track: &Arc<Track>, missing: &[u16]) {
        let nack = rtcp::transport_layer_nack::TransportLayerNack {
            sender_ssrc: track.ssrc(),
            media_ssrc: track.ssrc(),
            nacks: rtcp::transport_layer_nack::nack_pairs_from_sequence_numbers(missing),
        };
        match nack.marshal() {
            Ok(data) => self.send_rtcp_data(track, &data),
            Err(e) => log::warn!("failed to build NACK: {e}"),
        }
    }

    // ----- outbound control

    pub fn send_sender_report(&mut self, track: &Arc<Track>) {
        let ntp = NtpTime::now();
        let report = rtcp::sender_report::SenderReport {
            ssrc: track.ssrc(),
            ntp_time: ntp.as_u64(),
            rtp_time: track.curr_rtp_timestamp(),
            packet_count: track.stats().sent_packets(),
            octet_count: track.stats().sent_bytes() as u32,
        };
        match report.marshal() {
            Ok(data) => {
                self.send_rtcp_data(track, &data);
                self.sender_reports.save(track.ssrc(), ntp);
            }
            Err(e) => log::warn!("failed to build sender report: {e}"),
        }
    }

    fn send_rtcp_data(&mut self, track: &Arc<Track>, data: &[u8]) {
        let Some(srtp) = &self.srtp else {
            return;
        };
        let sequence = track.next_rtcp_sequence();
        match srtp.borrow_mut().protect_rtcp(data, sequence) {
            Ok(protected) => {
                let sent = self.socket.send(&protected);
                self.last_send_time.set(Instant::now());
                log::trace!("sent {sent} bytes of RTCP");
            }
            Err(e) => log::warn!("failed to protect RTCP: {e}"),
        }
    }

    // ----- outbound media

    fn send_frame(&mut self, frame: FrameToSend) {
        if self.srtp.is_none() || self.pacer.is_none() {
            log::debug!("not connected yet, dropping a frame");
            return;
        }

        let mut packetizer = frame.packetizer.lock().unwrap();

        if !frame.csd.is_empty() {
            packetizer.set_codec_specific_data(&frame.csd);
            return;
        }
        if frame.buf.is_empty() {
            return;
        }

        // Simulcast layers of the whole session, for bandwidth sharing
        // and the layers-allocation extension
        let layers: Vec<SimulcastLayer> = if frame.track.is_simulcast() {
            self.answer
                .video_simulcast_track_list()
                .iter()
                .filter_map(|t| t.simulcast().map(|info| info.layer.clone()))
                .collect()
        } else {
            Vec::new()
        };

        let overhead = self
            .srtp
            .as_ref()
            .map(|s| s.borrow().media_protection_overhead())
            .unwrap_or(0);

        let mut twcc_mut = self.twcc.as_ref().map(|t| t.borrow_mut());
        let packets = match packetizer.generate(
            &frame.track,
            &layers,
            twcc_mut.as_deref_mut(),
            &self.video_ext_ids,
            overhead,
            &frame.buf,
        ) {
            Ok(packets) => packets,
            Err(e) => {
                log::error!("failed to packetize frame: {e}");
                return;
            }
        };
        drop(twcc_mut);
        drop(packetizer);

        let pacer = self.pacer.as_mut().unwrap();

        // Flush any packets of the same track we have not sent yet
        pacer.flush(frame.track.ssrc());

        if packets.is_empty() {
            return;
        }
        if packets.len() <= 1 {
            for packet in packets {
                pacer.send_now(packet);
            }
            return;
        }

        let mut spread = DEFAULT_SPREAD;
        if let Some(twcc) = &self.twcc {
            let scale = layer_bandwidth_scale(&layers, &frame.track);
            let total_payload: usize = packets.iter().map(|p| p.packet.payload.len()).sum();
            spread = twcc
                .borrow()
                .pacing_spread(total_payload, scale, DEFAULT_SPREAD);
        }
        pacer.send_paced(packets, spread);
    }

    // ----- timers

    fn update_connection_lost_timeout(&mut self) {
        let updated = self
            .task_connection_lost
            .and_then(|id| self.scheduler.update(id, CONNECTION_LOST_TIMEOUT));
        self.task_connection_lost = Some(updated.unwrap_or_else(|| {
            self.scheduler
                .submit(CONNECTION_LOST_TIMEOUT, CandidateTask::ConnectionLostTimeout)
        }));
    }

    fn on_connection_lost(&mut self) {
        self.task_connection_lost = None;
        self.events.push(CandidateEvent::Connecting);

        log::debug!(
            "starting STUN requests to restore the connection #{}",
            self.candidate_id
        );

        let task = self.task_connect_timeout.take();
        self.cancel_task(task);
        self.task_connect_timeout = Some(
            self.scheduler
                .submit(CONNECT_TIMEOUT, CandidateTask::ConnectTimeout),
        );

        self.send_connection_restore_request();
    }

    fn send_connection_restore_request(&mut self) {
        log::trace!(
            "sending a STUN request to restore the connection #{}",
            self.candidate_id
        );

        let priority = make_priority(200, 10, 1);
        match self.agent.build_request(
            &self.outbound_stun_username(),
            self.answer.ice_password(),
            priority,
            false,
        ) {
            Ok(message) => self.add_send_raw(Bytes::from(message.raw)),
            Err(e) => log::error!("failed to build STUN restore request: {e}"),
        }

        let task = self.task_restore.take();
        self.cancel_task(task);
        self.task_restore = Some(
            self.scheduler
                .submit(CONNECT_TIMEOUT, CandidateTask::ConnectionRestoreRequest),
        );
    }

    fn update_keep_alive_timeout(&mut self) {
        let updated = self
            .task_keep_alive
            .and_then(|id| self.scheduler.update(id, KEEP_ALIVE_CHECK_TIMEOUT));
        self.task_keep_alive = Some(updated.unwrap_or_else(|| {
            self.scheduler
                .submit(KEEP_ALIVE_CHECK_TIMEOUT, CandidateTask::KeepAliveCheck)
        }));
    }

    fn on_keep_alive_check(&mut self) {
        self.task_keep_alive = None;
        self.update_keep_alive_timeout();

        let now = Instant::now();
        if now.duration_since(self.last_send_time.get()) < KEEP_ALIVE_SEND_TIMEOUT
            && now.duration_since(self.last_receive_time) < KEEP_ALIVE_SEND_TIMEOUT
        {
            return;
        }

        log::trace!("sending a keep-alive STUN request #{}", self.candidate_id);

        let priority = make_priority(200, 10, 1);
        match self.agent.build_request(
            &self.outbound_stun_username(),
            self.answer.ice_password(),
            priority,
            false,
        ) {
            Ok(message) => self.add_send_raw(Bytes::from(message.raw)),
            Err(e) => log::error!("failed to build keep-alive request: {e}"),
        }
    }

    fn on_start_probing(&mut self) {
        if let Some(twcc) = &self.twcc {
            twcc.borrow_mut().start_probing();
        }

        self.task_end_probing = Some(
            self.scheduler
                .submit(PROBE_DURATION, CandidateTask::TwccEndProbing),
        );
        self.scheduler
            .submit(PERIODIC_PROBING_TIMEOUT, CandidateTask::TwccStartProbing);
    }

    // ----- state

    fn emit_connected(&mut self) {
        self.events.push(CandidateEvent::Connected);

        if self.twcc.is_some() && !self.twcc_probing_armed {
            self.twcc_probing_armed = true;
            self.scheduler
                .submit(START_PROBING_TIMEOUT, CandidateTask::TwccStartProbing);
        }
    }

    fn emit_failed(&mut self, error: Error) {
        log::error!("candidate #{} failed: {error}", self.candidate_id);
        self.events.push(CandidateEvent::FailedToConnect(error));
    }

    /// Fills RTT and bandwidth fields of the aggregate stats.
    pub fn update_publish_connection_stats(&self, stats: &mut PublishConnectionStats) {
        const MAX_RECENT_ENOUGH: Duration = Duration::from_secs(5);

        if let (Some(value), Some(when)) =
            (self.rtp_rtt_filter.value(), self.rtp_rtt_filter.when_updated())
        {
            if when.elapsed() <= MAX_RECENT_ENOUGH {
                stats.rtt_ms = value;
            }
        } else if let (Some(value), Some(when)) =
            (self.ice_rtt_filter.value(), self.ice_rtt_filter.when_updated())
        {
            if when.elapsed() <= MAX_RECENT_ENOUGH {
                stats.rtt_ms = value;
            }
        }

        if let Some(twcc) = &self.twcc {
            twcc.borrow().update_stats(stats);
        }
    }
}
