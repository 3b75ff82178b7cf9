use std::time::{Duration, Instant};

/// True when `center` lies within the closed x-interval of two centroids
///
/// Both centroids must exist; an object that appears or vanishes between
/// two frames has not crossed anything.
pub fn is_centered(center: f64, current: Option<(f64, f64)>, previous: Option<(f64, f64)>) -> bool {
    match (current, previous) {
        (Some((a, _)), Some((b, _))) => {
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            center >= min && center <= max
        }
        _ => false,
    }
}

/// Per-camera trigger cooldown
#[derive(Debug, Clone)]
pub struct TriggerGate {
    cooldown: Duration,
    last_trigger: Option<Instant>,
}

impl TriggerGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_trigger: None,
        }
    }

    /// Accept a trigger at `now` unless the previous one is too recent
    ///
    /// Suppressed triggers leave the timestamp untouched.
    pub fn try_accept(&mut self, now: Instant) -> bool {
        let allowed = match self.last_trigger {
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
            None => true,
        };
        if allowed {
            self.last_trigger = Some(now);
        }
        allowed
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }
}
