//! Entropy gate in front of identity generation
//!
//! The presentation layer feeds one sample per captured input event (pointer
//! movement in the web client). Each sample raises the pool level by a fixed
//! step until it reaches the target. Reaching the target fires exactly once:
//! the sample that crosses the line returns an [`EntropyTicket`], later
//! samples are ignored until [`EntropyCollector::reset`] starts a new cycle.
//!
//! Key material itself always comes from the OS CSPRNG. The pool only paces
//! the user through the generation flow.

use tracing::{debug, trace};

use crate::config::EntropyConfig;

/// Proof that a collection cycle completed
///
/// Not `Clone`: one ticket per cycle, consumed by identity generation.
#[derive(Debug)]
pub struct EntropyTicket {
    samples: u64,
    bits: u64,
}

impl EntropyTicket {
    /// Samples recorded in the cycle that produced this ticket
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Entropy bits the sources claimed over the cycle
    pub fn claimed_bits(&self) -> u64 {
        self.bits
    }
}

/// Result of recording one sample
#[derive(Debug)]
pub enum SampleOutcome {
    /// Pool still filling; carries the new level
    Collecting { level: f64 },
    /// This sample filled the pool
    Ready(EntropyTicket),
    /// Pool already full for this cycle; sample dropped
    Ignored,
}

/// Readiness accumulator, bounded to `[0, target]`
#[derive(Debug, Clone)]
pub struct EntropyCollector {
    step: f64,
    target: f64,
    samples: u64,
    bits: u64,
}

impl Default for EntropyCollector {
    fn default() -> Self {
        Self::from_config(&EntropyConfig::default())
    }
}

impl EntropyCollector {
    pub fn new(step: f64, target: f64) -> Self {
        Self {
            step,
            target,
            samples: 0,
            bits: 0,
        }
    }

    pub fn from_config(config: &EntropyConfig) -> Self {
        Self::new(config.step, config.target)
    }

    /// Current level in `[0, target]`
    ///
    /// Derived from the sample count so repeated steps cannot drift.
    pub fn level(&self) -> f64 {
        (self.samples as f64 * self.step).min(self.target)
    }

    /// Level as a percentage of the target, for progress display
    pub fn progress_percent(&self) -> f64 {
        self.level() / self.target * 100.0
    }

    pub fn is_ready(&self) -> bool {
        self.level() >= self.target
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Record one input event worth `source_entropy_bits`
    pub fn record_sample(&mut self, source_entropy_bits: u32) -> SampleOutcome {
        if self.is_ready() {
            trace!("entropy pool full, sample ignored");
            return SampleOutcome::Ignored;
        }

        self.samples += 1;
        self.bits += u64::from(source_entropy_bits);

        // The pool was not full on entry, so this sample is the one that crossed the target
        if self.is_ready() {
            debug!(samples = self.samples, "entropy pool ready");
            return SampleOutcome::Ready(EntropyTicket {
                samples: self.samples,
                bits: self.bits,
            });
        }

        SampleOutcome::Collecting {
            level: self.level(),
        }
    }

    /// Start a new collection cycle
    pub fn reset(&mut self) {
        self.samples = 0;
        self.bits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_before_two_hundred_samples() {
        let mut pool = EntropyCollector::default();
        for _ in 0..199 {
            assert!(matches!(pool.record_sample(8), SampleOutcome::Collecting { .. }));
        }
        assert!(!pool.is_ready());
        assert_eq!(pool.level(), 99.5);
    }

    #[test]
    fn test_latch_fires_exactly_once() {
        let mut pool = EntropyCollector::default();
        let mut tickets = 0;
        for _ in 0..500 {
            if let SampleOutcome::Ready(ticket) = pool.record_sample(4) {
                assert_eq!(ticket.samples(), 200);
                assert_eq!(ticket.claimed_bits(), 800);
                tickets += 1;
            }
        }
        assert_eq!(tickets, 1);
        assert!(pool.is_ready());
        assert_eq!(pool.level(), 100.0);
        assert_eq!(pool.samples(), 200);
    }

    #[test]
    fn test_queries_do_not_change_level() {
        let mut pool = EntropyCollector::default();
        pool.record_sample(1);
        for _ in 0..10 {
            assert!(!pool.is_ready());
            assert_eq!(pool.level(), 0.5);
        }
    }

    #[test]
    fn test_reset_starts_new_cycle() {
        let mut pool = EntropyCollector::new(25.0, 100.0);
        for _ in 0..4 {
            pool.record_sample(1);
        }
        assert!(pool.is_ready());
        assert!(matches!(pool.record_sample(1), SampleOutcome::Ignored));

        pool.reset();
        assert_eq!(pool.level(), 0.0);
        let outcomes: Vec<_> = (0..4).map(|_| pool.record_sample(1)).collect();
        assert!(matches!(outcomes[3], SampleOutcome::Ready(_)));
    }

    #[test]
    fn test_level_is_capped() {
        let mut pool = EntropyCollector::new(30.0, 100.0);
        for _ in 0..4 {
            pool.record_sample(0);
        }
        assert_eq!(pool.level(), 100.0);
        assert_eq!(pool.progress_percent(), 100.0);
    }
}
