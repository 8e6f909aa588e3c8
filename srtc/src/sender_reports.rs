use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const MAX_HISTORY: usize = 16;

/// Seconds between 1900 (NTP epoch) and 1970 (Unix epoch).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTime {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTime {
    pub fn now() -> Self {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let seconds = (since_unix.as_secs() + NTP_UNIX_OFFSET) as u32;
        let fraction = ((since_unix.subsec_nanos() as u64) << 32) / 1_000_000_000;
        NtpTime {
            seconds,
            fraction: fraction as u32,
        }
    }

    pub fn as_u64(&self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    /// The middle 32 bits, as echoed in a receiver report's LSR field.
    pub fn middle(&self) -> u32 {
        (self.seconds << 16) | (self.fraction >> 16)
    }
}

struct SentReport {
    ntp: NtpTime,
    sent: Instant,
}

/// Remembers recently sent SRs so that RTT can be derived when a receiver
/// report echoes one back via LSR/DLSR.
#[derive(Default)]
pub struct SenderReportsHistory {
    map: HashMap<u32, VecDeque<SentReport>>,
}

impl SenderReportsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, ssrc: u32, ntp: NtpTime) {
        let list = self.map.entry(ssrc).or_default();
        while list.len() >= MAX_HISTORY {
            list.pop_front();
        }
        list.push_back(SentReport {
            ntp,
            sent: Instant::now(),
        });
    }

    /// RTT in milliseconds from a receiver report's last-SR and
    /// delay-since-last-SR (1/65536 s units) fields.
    pub fn calculate_rtt_ms(
        &self,
        ssrc: u32,
        last_sr: u32,
        delay_since_last_sr: u32,
    ) -> Option<f32> {
        let list = self.map.get(&ssrc)?;
        for report in list.iter().rev() {
            if report.ntp.middle() == last_sr {
                let delay_micros = delay_since_last_sr as u64 * 1_000_000 / 65_536;
                let received = report.sent + Duration::from_micros(delay_micros);
                let now = Instant::now();
                if now >= received {
                    let one_way = now.duration_since(received);
                    return Some(2.0 * one_way.as_micros() as f32 / 1000.0);
                }
                return None;
            }
        }
        None
    }
}

#[cfg(test)]
mod sender_reports_test {
    use super::*;

    #[test]
    fn test_middle_bits() {
        let ntp = NtpTime {
            seconds: 0x01234567,
            fraction: 0x89ABCDEF,
        };
        assert_eq!(ntp.middle(), 0x456789AB);
        assert_eq!(ntp.as_u64(), 0x0123456789ABCDEF);
    }

    #[test]
    fn test_rtt_from_matching_report() {
        let mut history = SenderReportsHistory::new();
        let ntp = NtpTime::now();
        history.save(0x11112222, ntp);

        std::thread::sleep(Duration::from_millis(20));

        // With zero reported processing delay, the RTT is twice the
        // elapsed one-way time
        let rtt = history
            .calculate_rtt_ms(0x11112222, ntp.middle(), 0)
            .unwrap();
        assert!(rtt >= 2.0 * 20.0 - 5.0, "rtt {rtt}");
        assert!(rtt < 2.0 * 20.0 + 200.0, "rtt {rtt}");
    }

    #[test]
    fn test_unknown_report_yields_none() {
        let mut history = SenderReportsHistory::new();
        history.save(7, NtpTime::now());
        assert_eq!(history.calculate_rtt_ms(7, 0xDEADBEEF, 0), None);
        assert_eq!(history.calculate_rtt_ms(8, 0, 0), None);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = SenderReportsHistory::new();
        for i in 0..40u32 {
            history.save(
                7,
                NtpTime {
                    seconds: i,
                    fraction: 0,
                },
            );
        }
        let oldest = NtpTime {
            seconds: 0,
            fraction: 0,
        };
        assert_eq!(history.calculate_rtt_ms(7, oldest.middle(), 0), None);
    }
}
