//! Per-source request spacing.
//!
//! Each upstream source has a minimum interval between the starts of two
//! consecutive calls. The per-source "last call" instant is the only mutable
//! state shared by concurrent station workers, so it sits behind its own
//! mutex: callers to the same source queue up, callers to different sources
//! never block each other.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::SourcesConfig;
use crate::model::Source;

struct Slot {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

pub struct RateLimiter {
    slots: HashMap<Source, Slot>,
}

impl RateLimiter {
    pub fn new(intervals: impl IntoIterator<Item = (Source, Duration)>) -> Self {
        let slots = intervals
            .into_iter()
            .map(|(source, min_interval)| {
                (
                    source,
                    Slot {
                        min_interval,
                        last_call: Mutex::new(None),
                    },
                )
            })
            .collect();
        Self { slots }
    }

    pub fn from_config(sources: &SourcesConfig) -> Self {
        Self::new(Source::ALL.iter().map(|s| (*s, sources.get(*s).min_interval())))
    }

    /// Blocks until a call to `source` is allowed, then records it as made.
    ///
    /// The slot lock is held while sleeping, which is what serializes
    /// concurrent callers of one source.
    pub fn acquire(&self, source: Source) {
        let Some(slot) = self.slots.get(&source) else {
            return;
        };
        let mut last = slot
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = *last {
            let ready_at = previous + slot.min_interval;
            let now = Instant::now();
            if ready_at > now {
                let wait = ready_at - now;
                tracing::trace!(%source, wait_ms = wait.as_millis() as u64, "rate limit wait");
                std::thread::sleep(wait);
            }
        }
        *last = Some(Instant::now());
    }

    pub fn min_interval(&self, source: Source) -> Option<Duration> {
        self.slots.get(&source).map(|s| s.min_interval)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
