use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::attributes::*;
use crate::error::*;
use crate::fingerprint::FINGERPRINT;
use crate::integrity::MessageIntegrity;
use crate::message::*;
use crate::textattrs::{FlagAttribute, TextAttribute, U32Attribute, U64Attribute};
use crate::xoraddr::XorMappedAddress;

pub const SOFTWARE: &str = "srtc";

// https://datatracker.ietf.org/doc/html/rfc5245#section-4.1.2.1
pub fn make_priority(type_preference: u32, local_preference: u32, component_id: u32) -> u32 {
    (1 << 24) * type_preference + (1 << 8) * local_preference + (256 - component_id)
}

struct Transaction {
    id: TransactionId,
    when: Instant,
}

/// Builds and verifies the STUN binding messages of the ICE handshake and
/// keeps the outstanding-transaction table for RTT measurement.
pub struct Agent {
    tie_breaker: u64,
    transactions: Vec<Transaction>,
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent {
    pub fn new() -> Self {
        Agent {
            tie_breaker: rand::thread_rng().gen(),
            transactions: Vec::new(),
        }
    }

    pub fn tie_breaker(&self) -> u64 {
        self.tie_breaker
    }

    pub fn outstanding(&self) -> usize {
        self.transactions.len()
    }

    /// Builds a binding request: SOFTWARE, ICE-CONTROLLING, optional
    /// USE-CANDIDATE, PRIORITY, USERNAME, MESSAGE-INTEGRITY, FINGERPRINT.
    /// The transaction is recorded for later RTT pairing.
    pub fn build_request(
        &mut self,
        username: &str,
        password: &str,
        priority: u32,
        use_candidate: bool,
    ) -> Result<Message> {
        let mut m = Message::build(BINDING_REQUEST);

        TextAttribute::new(ATTR_SOFTWARE, SOFTWARE.to_owned()).add_to(&mut m)?;
        U64Attribute {
            attr: ATTR_ICE_CONTROLLING,
            value: self.tie_breaker,
        }
        .add_to(&mut m)?;
        if use_candidate {
            FlagAttribute {
                attr: ATTR_USE_CANDIDATE,
            }
            .add_to(&mut m)?;
        }
        U32Attribute {
            attr: ATTR_PRIORITY,
            value: priority,
        }
        .add_to(&mut m)?;
        TextAttribute::new(ATTR_USERNAME, username.to_owned()).add_to(&mut m)?;

        MessageIntegrity::new_short_term_integrity(password.to_owned()).add_to(&mut m)?;
        FINGERPRINT.add_to(&mut m)?;

        self.transactions.push(Transaction {
            id: m.transaction_id,
            when: Instant::now(),
        });

        Ok(m)
    }

    /// Builds a binding success response to `request` with the reflexive
    /// transport address of the requester.
    pub fn build_response(
        &self,
        request: &Message,
        mapped: SocketAddr,
        password: &str,
    ) -> Result<Message> {
        let mut m = Message::build_with_id(BINDING_SUCCESS, request.transaction_id);

        TextAttribute::new(ATTR_SOFTWARE, SOFTWARE.to_owned()).add_to(&mut m)?;
        XorMappedAddress::from(mapped).add_to(&mut m)?;
        MessageIntegrity::new_short_term_integrity(password.to_owned()).add_to(&mut m)?;
        FINGERPRINT.add_to(&mut m)?;

        Ok(m)
    }

    /// Pairs a response with its outstanding request, returning the round
    /// trip time. Unknown transaction ids return None.
    pub fn forget_transaction(&mut self, id: TransactionId) -> Option<Duration> {
        let pos = self.transactions.iter().position(|t| t.id == id)?;
        let t = self.transactions.remove(pos);
        Some(t.when.elapsed())
    }

    /// Drops outstanding transactions older than `expiration`.
    pub fn forget_expired_transactions(&mut self, expiration: Duration) {
        let now = Instant::now();
        self.transactions
            .retain(|t| now.duration_since(t.when) < expiration);
    }

    /// Verifies an inbound binding request: fingerprint, then exact
    /// username, then message integrity with our password.
    pub fn verify_request(m: &mut Message, username: &str, password: &str) -> bool {
        if FINGERPRINT.check(m).is_err() {
            log::warn!("request verification failed: fingerprint");
            return false;
        }

        match m.get(ATTR_USERNAME) {
            Ok(v) if v == username.as_bytes() => {}
            _ => {
                log::warn!("request verification failed: username");
                return false;
            }
        }

        let integrity = MessageIntegrity::new_short_term_integrity(password.to_owned());
        if integrity.check(m).is_err() {
            log::warn!("request verification failed: integrity");
            return false;
        }

        true
    }

    /// Verifies an inbound binding response: fingerprint, then message
    /// integrity with the remote password.
    pub fn verify_response(m: &mut Message, password: &str) -> bool {
        if FINGERPRINT.check(m).is_err() {
            log::warn!("response verification failed: fingerprint");
            return false;
        }

        let integrity = MessageIntegrity::new_short_term_integrity(password.to_owned());
        if integrity.check(m).is_err() {
            log::warn!("response verification failed: integrity");
            return false;
        }

        true
    }
}
