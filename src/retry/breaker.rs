use crate::config::CircuitBreakerConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct DomainWindow {
    /// (when, abandoned) for each finished item, oldest first
    outcomes: VecDeque<(Instant, bool)>,
    open_until: Option<Instant>,
}

impl DomainWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, _)) = self.outcomes.front() {
            if now.saturating_duration_since(at) <= window {
                break;
            }
            self.outcomes.pop_front();
        }
    }
}

/// Domain-scoped circuit breaker
///
/// Shared by every job, since jobs may share a target. When the share of
/// abandoned items for a domain within the sliding window exceeds the
/// threshold, the domain is held closed to new admissions for the cool-down.
pub struct CircuitBreaker {
    domains: DashMap<String, Mutex<DomainWindow>>,
    window: Duration,
    min_samples: usize,
    abandon_ratio: f64,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            domains: DashMap::new(),
            window: Duration::from_secs(config.window_secs),
            min_samples: config.min_samples as usize,
            abandon_ratio: config.abandon_ratio,
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }

    /// Records a finished item for `domain`
    ///
    /// # Returns
    ///
    /// The end of the cool-down if this outcome tripped the breaker
    pub fn record(&self, domain: &str, abandoned: bool) -> Option<Instant> {
        let now = Instant::now();
        let entry = self.domains.entry(domain.to_string()).or_default();
        let mut window = entry.lock().unwrap();

        window.prune(now, self.window);
        window.outcomes.push_back((now, abandoned));

        if window.open_until.is_some_and(|until| until > now) {
            return None;
        }

        let samples = window.outcomes.len();
        if samples < self.min_samples {
            return None;
        }

        let abandons = window.outcomes.iter().filter(|(_, a)| *a).count();
        if (abandons as f64 / samples as f64) <= self.abandon_ratio {
            return None;
        }

        let until = now + self.cooldown;
        window.open_until = Some(until);
        window.outcomes.clear();
        tracing::warn!(
            "Circuit open for {}: {}/{} items abandoned, pausing admissions for {:?}",
            domain,
            abandons,
            samples,
            self.cooldown
        );
        Some(until)
    }

    /// When the domain reopens, if it is currently held closed
    pub fn open_until(&self, domain: &str) -> Option<Instant> {
        let entry = self.domains.get(domain)?;
        let window = entry.lock().unwrap();
        window.open_until.filter(|until| *until > Instant::now())
    }
}
