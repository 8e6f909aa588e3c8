use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::config::OfferConfig;
use crate::packetize::OutgoingPacket;
use crate::send_history::SendHistory;
use crate::socket::Socket;
use crate::twcc::TwccSource;

pub const DEFAULT_SPREAD: Duration = Duration::from_millis(15);

struct QueueItem {
    when: Instant,
    item: OutgoingPacket,
}

/// Spreads a burst of RTP packets over time. Every packet leaves through
/// `send_impl`, which stamps the TWCC sequence, mirrors the packet into
/// the send history, protects it, and updates counters.
pub struct SendPacer {
    config: OfferConfig,
    srtp: Rc<RefCell<srtp::Session>>,
    socket: Rc<Socket>,
    history: Rc<RefCell<SendHistory>>,
    twcc: Option<Rc<RefCell<TwccSource>>>,
    last_send_time: Rc<Cell<Instant>>,
    queue: Vec<QueueItem>,
}

impl SendPacer {
    pub fn new(
        config: OfferConfig,
        srtp: Rc<RefCell<srtp::Session>>,
        socket: Rc<Socket>,
        history: Rc<RefCell<SendHistory>>,
        twcc: Option<Rc<RefCell<TwccSource>>>,
        last_send_time: Rc<Cell<Instant>>,
    ) -> Self {
        SendPacer {
            config,
            srtp,
            socket,
            history,
            twcc,
            last_send_time,
            queue: Vec::new(),
        }
    }

    /// Sends any queued packets of this track immediately, preserving
    /// their order. Called when a newer frame for the track arrives.
    pub fn flush(&mut self, ssrc: u32) {
        let mut i = 0;
        while i < self.queue.len() {
            if self.queue[i].item.track.ssrc() == ssrc {
                let entry = self.queue.remove(i);
                self.send_impl(entry.item);
            } else {
                i += 1;
            }
        }
    }

    pub fn send_now(&mut self, item: OutgoingPacket) {
        self.send_impl(item);
    }

    /// Assigns due times `now + i * spread / n` and queues the packets.
    pub fn send_paced(&mut self, list: Vec<OutgoingPacket>, spread: Duration) {
        if list.is_empty() {
            return;
        }
        let size = list.len();
        if size == 1 || spread.is_zero() {
            for item in list {
                self.send_impl(item);
            }
            return;
        }

        let delta = spread / size as u32;
        let now = Instant::now();
        for (i, item) in list.into_iter().enumerate() {
            let when = now + delta * i as u32;
            let pos = self.queue.partition_point(|e| e.when <= when);
            self.queue.insert(pos, QueueItem { when, item });
        }
    }

    /// Time until the next queued packet is due.
    pub fn timeout(&self, default: Duration) -> Duration {
        match self.queue.first() {
            Some(entry) => entry.when.saturating_duration_since(Instant::now()),
            None => default,
        }
    }

    /// Sends every packet whose due time has passed.
    pub fn run(&mut self) {
        while let Some(first) = self.queue.first() {
            if first.when > Instant::now() {
                break;
            }
            let entry = self.queue.remove(0);
            self.send_impl(entry.item);
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    fn send_impl(&mut self, mut item: OutgoingPacket) {
        // Bake the final transport-wide sequence into the extension block
        if let Some(twcc) = &self.twcc {
            twcc.borrow_mut()
                .on_before_generating(&mut item.packet, &item.track);
        }

        // Mirror into the send history ahead of protection so NACKed
        // packets can be rebuilt
        if item.track.has_nack() || item.track.rtx_payload_type().is_some() {
            self.history.borrow_mut().save(
                item.track.clone(),
                item.packet.clone(),
                item.rollover,
            );
        }

        let generated = match item.packet.marshal() {
            Ok(data) => data,
            Err(e) => {
                log::error!("failed to generate RTP packet: {e}");
                return;
            }
        };

        let protected = match self
            .srtp
            .borrow_mut()
            .protect_rtp(&generated, item.rollover)
        {
            Ok(data) => data,
            Err(e) => {
                log::error!("failed to protect RTP packet: {e}");
                return;
            }
        };

        let stats = item.track.stats();
        stats.increment_sent_packets(1);
        stats.increment_sent_bytes(protected.len() as u64);

        if let Some(twcc) = &self.twcc {
            twcc.borrow_mut().on_before_sending(
                &item.packet,
                &item.track,
                generated.len(),
                protected.len(),
            );
        }

        self.last_send_time.set(Instant::now());

        #[cfg(debug_assertions)]
        {
            use crate::config::MediaType;
            use rand::Rng;
            if self.config.debug_drop_packets
                && item.track.media_type() == MediaType::Video
                && rand::thread_rng().gen_range(0..100) < 5
            {
                log::trace!(
                    "NOT sending packet {} to exercise NACK",
                    item.packet.header.sequence_number
                );
                return;
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = &self.config;

        self.socket.send(&protected);
    }
}

#[cfg(test)]
mod pacer_test {
    use super::*;
    use crate::config::{Codec, Direction, MediaType};
    use crate::track::{Track, TrackDescriptor};
    use bytes::Bytes;
    use srtp::ProtectionProfile;
    use std::sync::Arc;

    fn test_setup() -> (SendPacer, Rc<RefCell<SendHistory>>) {
        let profile = ProtectionProfile::AeadAes128Gcm;
        let key = vec![1u8; profile.key_len()];
        let salt = vec![2u8; profile.salt_len()];
        let session = srtp::Session::new(profile, &key, &salt, &key, &salt).unwrap();

        // A socket aimed at a local black hole
        let sink = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = Socket::new(sink.local_addr().unwrap()).unwrap();

        let history = Rc::new(RefCell::new(SendHistory::new()));
        let pacer = SendPacer::new(
            OfferConfig::default(),
            Rc::new(RefCell::new(session)),
            Rc::new(socket),
            history.clone(),
            None,
            Rc::new(Cell::new(Instant::now())),
        );
        (pacer, history)
    }

    fn test_track(ssrc: u32) -> Arc<Track> {
        Arc::new(Track::new(TrackDescriptor {
            direction: Direction::Publish,
            media_type: MediaType::Video,
            media_id: "0".to_owned(),
            ssrc,
            payload_type: 96,
            rtx_ssrc: None,
            rtx_payload_type: None,
            codec: Codec::H264,
            profile_level_id: None,
            minptime: None,
            stereo: false,
            simulcast: None,
            clock_rate: 90_000,
            has_nack: true,
            has_pli: false,
        }))
    }

    fn outgoing(track: &Arc<Track>, seq: u16) -> OutgoingPacket {
        OutgoingPacket {
            track: track.clone(),
            packet: rtp::packet::Packet {
                header: rtp::header::Header {
                    payload_type: 96,
                    sequence_number: seq,
                    ssrc: track.ssrc(),
                    ..Default::default()
                },
                payload: Bytes::from_static(&[1, 2, 3]),
                padding_size: 0,
            },
            rollover: 0,
        }
    }

    #[test]
    fn test_send_now_updates_stats_and_history() {
        let (mut pacer, history) = test_setup();
        let track = test_track(7);

        pacer.send_now(outgoing(&track, 100));
        assert_eq!(track.stats().sent_packets(), 1);
        assert!(track.stats().sent_bytes() > 0);
        assert!(history.borrow().find(7, 100).is_some());
    }

    #[test]
    fn test_paced_packets_leave_in_order() {
        let (mut pacer, _history) = test_setup();
        let track = test_track(8);

        let list: Vec<_> = (0..5).map(|i| outgoing(&track, 200 + i)).collect();
        pacer.send_paced(list, Duration::from_millis(10));
        assert_eq!(pacer.queued_len(), 5);

        std::thread::sleep(Duration::from_millis(20));
        pacer.run();
        assert_eq!(pacer.queued_len(), 0);
        assert_eq!(track.stats().sent_packets(), 5);

        // Paced packets left in their sequence order
        let history = _history.borrow();
        for seq in 200..205 {
            assert!(history.find(8, seq).is_some());
        }
    }

    #[test]
    fn test_flush_preempts_only_that_track() {
        let (mut pacer, _history) = test_setup();
        let track_a = test_track(1);
        let track_b = test_track(2);

        pacer.send_paced(
            (0..4).map(|i| outgoing(&track_a, 10 + i)).collect(),
            Duration::from_secs(5),
        );
        pacer.send_paced(
            (0..4).map(|i| outgoing(&track_b, 20 + i)).collect(),
            Duration::from_secs(5),
        );

        pacer.flush(1);
        assert_eq!(track_a.stats().sent_packets(), 4);
        // Track B keeps its queued packets
        assert_eq!(track_b.stats().sent_packets(), 0);
        assert_eq!(pacer.queued_len(), 4);
    }

    #[test]
    fn test_timeout_reflects_queue() {
        let (mut pacer, _history) = test_setup();
        assert_eq!(
            pacer.timeout(Duration::from_secs(1)),
            Duration::from_secs(1)
        );

        let track = test_track(3);
        pacer.send_paced(
            (0..3).map(|i| outgoing(&track, i)).collect(),
            Duration::from_secs(9),
        );
        assert!(pacer.timeout(Duration::from_secs(100)) <= Duration::from_secs(3));
    }
}
