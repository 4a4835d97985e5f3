//! Capped exponential backoff with jitter for transient failures.

use std::time::Duration;

use rand::Rng;

#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Supervisor default: 30 s doubling up to 300 s.
    pub fn supervisor() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(300))
    }

    /// Delay for the next retry; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped = exp.min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        // Up to 10% jitter so restart storms don't line up.
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 10);
        capped + Duration::from_millis(jitter_ms)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_cap() {
        let mut b = Backoff::supervisor();
        let d1 = b.next_delay();
        let d2 = b.next_delay();
        let d3 = b.next_delay();
        let d4 = b.next_delay();
        let d5 = b.next_delay();

        assert!(d1 >= Duration::from_secs(30) && d1 <= Duration::from_secs(33));
        assert!(d2 >= Duration::from_secs(60) && d2 <= Duration::from_secs(66));
        assert!(d3 >= Duration::from_secs(120) && d3 <= Duration::from_secs(132));
        assert!(d4 >= Duration::from_secs(240) && d4 <= Duration::from_secs(264));
        // Capped at 300 s (plus jitter).
        assert!(d5 >= Duration::from_secs(300) && d5 <= Duration::from_secs(330));
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut b = Backoff::supervisor();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        let d = b.next_delay();
        assert!(d <= Duration::from_secs(33));
    }
}
