use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{DEFAULT_RATE_LIMIT_MAX, DEFAULT_RATE_LIMIT_WINDOW_MS};
use crate::error::AgentError;

use super::gate::sanitize_for_logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn into_result(self) -> Result<(), AgentError> {
        match self {
            Self::Allowed => Ok(()),
            Self::Rejected { retry_after } => Err(AgentError::RateLimited { retry_after }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateStats {
    pub in_window: usize,
    pub max: usize,
    pub utilization: f64,
}

/// Sliding-window admission control for shell commands.
///
/// Timestamps older than the window are purged lazily on each check.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_count: usize,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            DEFAULT_RATE_LIMIT_MAX,
            Duration::from_millis(DEFAULT_RATE_LIMIT_WINDOW_MS),
        )
    }
}

impl RateLimiter {
    pub fn new(max_count: usize, window: Duration) -> Self {
        Self {
            max_count,
            window,
            admitted: VecDeque::with_capacity(max_count),
        }
    }

    pub fn can_execute(&mut self, command: &str) -> Admission {
        self.can_execute_at(command, Instant::now())
    }

    pub fn can_execute_at(&mut self, command: &str, now: Instant) -> Admission {
        self.purge(now);

        if self.admitted.len() >= self.max_count {
            let retry_after = self
                .admitted
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            tracing::warn!(
                command = %sanitize_for_logging(command),
                retry_after_ms = retry_after.as_millis() as u64,
                "shell rate limit reached"
            );
            return Admission::Rejected { retry_after };
        }

        self.admitted.push_back(now);
        Admission::Allowed
    }

    fn purge(&mut self, now: Instant) {
        while self
            .admitted
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= self.window)
        {
            self.admitted.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.admitted.clear();
    }

    pub fn stats(&self) -> RateStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> RateStats {
        let in_window = self
            .admitted
            .iter()
            .filter(|admitted| now.saturating_duration_since(**admitted) < self.window)
            .count();

        RateStats {
            in_window,
            max: self.max_count,
            utilization: if self.max_count == 0 {
                1.0
            } else {
                in_window as f64 / self.max_count as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_up_to_max_then_rejects() {
        let mut limiter = RateLimiter::new(3, Duration::from_millis(1000));
        let start = Instant::now();

        for offset in [0, 100, 200] {
            assert!(limiter
                .can_execute_at("ls", start + Duration::from_millis(offset))
                .is_allowed());
        }

        let fourth = limiter.can_execute_at("ls", start + Duration::from_millis(300));
        let Admission::Rejected { retry_after } = fourth else {
            panic!("fourth admission should be rejected");
        };
        assert!(retry_after > Duration::ZERO);
        assert_eq!(retry_after, Duration::from_millis(700));
    }

    #[test]
    fn admission_succeeds_after_window_elapses() {
        let mut limiter = RateLimiter::new(3, Duration::from_millis(1000));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.can_execute_at("ls", start);
        }

        assert!(!limiter
            .can_execute_at("ls", start + Duration::from_millis(999))
            .is_allowed());
        assert!(limiter
            .can_execute_at("ls", start + Duration::from_millis(1000))
            .is_allowed());
    }

    #[test]
    fn reset_restores_full_capacity() {
        let mut limiter = RateLimiter::new(3, Duration::from_millis(1000));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.can_execute_at("ls", start);
        }
        assert!(!limiter.can_execute_at("ls", start).is_allowed());

        limiter.reset();

        for _ in 0..3 {
            assert!(limiter.can_execute_at("ls", start).is_allowed());
        }
    }

    #[test]
    fn rejected_attempts_are_not_recorded() {
        let mut limiter = RateLimiter::new(1, Duration::from_millis(1000));
        let start = Instant::now();
        limiter.can_execute_at("ls", start);
        limiter.can_execute_at("ls", start + Duration::from_millis(500));

        assert!(limiter
            .can_execute_at("ls", start + Duration::from_millis(1000))
            .is_allowed());
    }

    #[test]
    fn stats_report_utilization() {
        let mut limiter = RateLimiter::new(4, Duration::from_millis(1000));
        let start = Instant::now();
        limiter.can_execute_at("a", start);
        limiter.can_execute_at("b", start);

        let stats = limiter.stats_at(start);
        assert_eq!(stats.in_window, 2);
        assert_eq!(stats.max, 4);
        assert!((stats.utilization - 0.5).abs() < f64::EPSILON);
        assert_eq!(limiter.stats_at(start + Duration::from_secs(2)).in_window, 0);
    }

    #[test]
    fn rejection_converts_to_rate_limit_error() {
        let error = Admission::Rejected {
            retry_after: Duration::from_millis(5),
        }
        .into_result()
        .expect_err("rejection is an error");
        assert!(matches!(error, AgentError::RateLimited { .. }));
    }
}
