use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::env::TimerId;

/// Manually advanced clock with a timer queue
///
/// Timers due at the same instant fire in scheduling order.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Duration,
    next_id: u64,
    queue: BTreeMap<(Duration, u64), TimerId>,
    deadlines: HashMap<TimerId, Duration>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the clock was created
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule(&mut self, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let deadline = self.now + delay;
        self.queue.insert((deadline, id.0), id);
        self.deadlines.insert(id, deadline);
        id
    }

    pub fn cancel(&mut self, timer: TimerId) -> bool {
        match self.deadlines.remove(&timer) {
            Some(deadline) => self.queue.remove(&(deadline, timer.0)).is_some(),
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its deadline
    pub fn pop_due(&mut self, until: Duration) -> Option<TimerId> {
        let (&(deadline, seq), _) = self.queue.iter().next()?;
        if deadline > until {
            return None;
        }
        let id = self.queue.remove(&(deadline, seq))?;
        self.deadlines.remove(&id);
        self.now = self.now.max(deadline);
        Some(id)
    }

    /// Move forward to `to`; never moves backwards
    pub fn set_now(&mut self, to: Duration) {
        self.now = self.now.max(to);
    }
}
