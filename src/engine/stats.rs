//! Session statistics.

use tracing::warn;

use super::message::MAX_VERDICT;
use crate::capture::Instance;

/// Counters for one capture session.
///
/// Hardware counters aggregate the kernel's PACKET_STATISTICS numbers, which
/// reset on every read; the software counters are maintained by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Packets the kernel accepted for the rings.
    pub hw_packets_received: u64,
    /// Packets the kernel dropped for lack of ring space.
    pub hw_packets_dropped: u64,
    /// Packets consumed by the BPF filter without reaching the host.
    pub packets_filtered: u64,
    /// Packets transmitted through `inject`.
    pub packets_injected: u64,
    /// Finalized messages by verdict.
    pub verdicts: [u64; MAX_VERDICT],
}

impl Stats {
    /// Fold each instance's kernel counters into the aggregate. The kernel
    /// folds tp_drops into tp_packets on return, so drops are subtracted to
    /// recover the received count.
    pub fn accumulate_hw(&mut self, instances: &[Instance]) {
        for instance in instances.iter().filter(|i| i.is_open()) {
            match instance.kernel_stats() {
                Ok(kstats) => {
                    self.hw_packets_received +=
                        u64::from(kstats.tp_packets.saturating_sub(kstats.tp_drops));
                    self.hw_packets_dropped += u64::from(kstats.tp_drops);
                }
                Err(e) => warn!(device = %instance.name(), error = %e, "failed to get kernel stats"),
            }
        }
    }

    /// Zero the aggregate and drain each instance's kernel counters so the
    /// next accumulation starts from a clean slate.
    pub fn reset(&mut self, instances: &[Instance]) {
        *self = Stats::default();
        for instance in instances.iter().filter(|i| i.is_open()) {
            let _ = instance.kernel_stats();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_counters() {
        let mut stats = Stats {
            hw_packets_received: 10,
            hw_packets_dropped: 2,
            packets_filtered: 3,
            packets_injected: 1,
            verdicts: [1; MAX_VERDICT],
        };
        stats.reset(&[]);
        assert_eq!(stats, Stats::default());
    }
}
