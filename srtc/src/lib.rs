#![warn(rust_2018_idioms)]

//! A WebRTC client library for unidirectional media: publish one video
//! and/or one audio track to a server via WHIP, or subscribe to such a
//! stream via WHEP. The crate owns the media plane: ICE handshake, DTLS
//! driven SRTP keying, RTP packetization, RTCP feedback, NACK/RTX loss
//! recovery, simulcast, and TWCC-based bandwidth estimation and pacing.

pub mod answer;
pub mod candidate;
pub mod certificate;
pub mod config;
pub mod connection;
pub mod dtls;
pub mod error;
pub mod event_loop;
pub mod jitter;
pub mod offer;
pub mod pacer;
pub mod packetize;
pub mod scheduler;
pub mod send_history;
pub mod sender_reports;
pub mod signaling;
pub mod socket;
pub mod stats;
pub mod track;
pub mod twcc;

pub use answer::{Host, SdpAnswer};
pub use config::{Codec, Direction, MediaType, OfferConfig, PubAudioConfig, PubVideoConfig};
pub use connection::{ConnectionState, PeerConnection};
pub use error::{Error, Result};
pub use offer::SdpOffer;
pub use stats::PublishConnectionStats;
pub use track::Track;
