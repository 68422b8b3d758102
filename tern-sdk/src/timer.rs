//! Named one-shot and repeating timers.
//!
//! Timers never run on their own thread. The owner asks for the next
//! deadline, sleeps until it alongside its reads, then pops due entries one
//! at a time and invokes them on the same context that dispatches
//! messages. A name maps to at most one live timer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Callback invoked with the owning context.
pub type TimerCallback<C> = Arc<dyn Fn(&mut C) + Send + Sync>;

/// Repeating intervals are clamped to this so a zero interval cannot spin.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirePolicy {
    Once,
    Repeat(Duration),
}

struct Entry<C> {
    deadline: Instant,
    seq: u64,
    policy: FirePolicy,
    callback: TimerCallback<C>,
}

pub struct Timers<C> {
    entries: HashMap<String, Entry<C>>,
    seq: u64,
}

impl<C> Default for Timers<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            seq: 0,
        }
    }
}

impl<C> fmt::Debug for Timers<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Timers").field("active", &names).finish()
    }
}

impl<C> Timers<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer, replacing any live timer with the same name.
    pub fn schedule_once<F>(&mut self, name: impl Into<String>, delay: Duration, callback: F)
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        self.insert(name.into(), delay, FirePolicy::Once, Arc::new(callback));
    }

    /// Arm a repeating timer; the first firing is one `interval` from now.
    pub fn schedule_repeating<F>(&mut self, name: impl Into<String>, interval: Duration, callback: F)
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        self.insert(
            name.into(),
            interval,
            FirePolicy::Repeat(interval),
            Arc::new(callback),
        );
    }

    fn insert(&mut self, name: String, delay: Duration, policy: FirePolicy, callback: TimerCallback<C>) {
        self.seq += 1;
        let entry = Entry {
            deadline: Instant::now() + delay,
            seq: self.seq,
            policy,
            callback,
        };
        if self.entries.insert(name.clone(), entry).is_some() {
            tracing::trace!(timer = %name, "replaced live timer");
        }
    }

    /// Returns `false` if no timer had that name.
    pub fn cancel(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn policy(&self, name: &str) -> Option<FirePolicy> {
        self.entries.get(name).map(|e| e.policy)
    }

    /// Time remaining until `name` fires, measured from `now`.
    pub fn remaining(&self, name: &str, now: Instant) -> Option<Duration> {
        self.entries
            .get(name)
            .map(|e| e.deadline.saturating_duration_since(now))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }

    /// Take the earliest timer due at `now`.
    ///
    /// A one-shot is removed before it is returned, so its callback may
    /// re-arm the same name. A repeating timer is re-armed one interval
    /// after `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(String, TimerCallback<C>)> {
        let name = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .min_by_key(|(_, e)| (e.deadline, e.seq))
            .map(|(name, _)| name.clone())?;

        match self.entries.get(&name).map(|e| e.policy) {
            Some(FirePolicy::Repeat(interval)) => {
                let entry = self.entries.get_mut(&name)?;
                entry.deadline = now + interval;
                Some((name, Arc::clone(&entry.callback)))
            }
            Some(FirePolicy::Once) => {
                let entry = self.entries.remove(&name)?;
                Some((name, entry.callback))
            }
            None => None,
        }
    }

    /// Fire everything due at `now` against `ctx`.
    ///
    /// Only usable when the context does not own this `Timers`; the client
    /// drives its own timers through [`Timers::pop_due`].
    pub fn run_due(&mut self, ctx: &mut C, now: Instant) -> usize {
        let mut fired = 0;
        while let Some((_, callback)) = self.pop_due(now) {
            callback(ctx);
            fired += 1;
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn later(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn rescheduling_a_name_replaces_the_previous_timer() {
        let mut timers: Timers<Vec<&'static str>> = Timers::new();
        timers.schedule_once("t", Duration::from_secs(1), |log| log.push("first"));
        timers.schedule_once("t", Duration::from_secs(2), |log| log.push("second"));
        assert_eq!(timers.len(), 1);

        let mut log = Vec::new();
        assert_eq!(timers.run_due(&mut log, later(10)), 1);
        assert_eq!(log, vec!["second"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancel_reports_not_found() {
        let mut timers: Timers<()> = Timers::new();
        assert!(!timers.cancel("nope"));
        timers.schedule_once("yes", Duration::from_secs(1), |_| {});
        assert!(timers.cancel("yes"));
        assert!(!timers.cancel("yes"));
        timers.cancel_all();
        timers.cancel_all();
        assert!(timers.is_empty());
    }

    #[test]
    fn not_due_yet_does_not_fire() {
        let mut timers: Timers<u32> = Timers::new();
        timers.schedule_once("t", Duration::from_secs(60), |n| *n += 1);
        let mut n = 0;
        assert_eq!(timers.run_due(&mut n, Instant::now()), 0);
        assert_eq!(n, 0);
        assert!(timers.contains("t"));
    }

    #[test]
    fn repeating_timer_stays_armed() {
        let mut timers: Timers<u32> = Timers::new();
        timers.schedule_repeating("tick", Duration::from_secs(5), |n| *n += 1);

        let mut n = 0;
        let now = later(6);
        assert_eq!(timers.run_due(&mut n, now), 1);
        assert_eq!(n, 1);
        assert_eq!(timers.remaining("tick", now), Some(Duration::from_secs(5)));
        assert_eq!(timers.policy("tick"), Some(FirePolicy::Repeat(Duration::from_secs(5))));
    }

    #[test]
    fn due_timers_fire_in_deadline_order() {
        let mut timers: Timers<Vec<u8>> = Timers::new();
        timers.schedule_once("c", Duration::from_secs(3), |v| v.push(3));
        timers.schedule_once("a", Duration::from_secs(1), |v| v.push(1));
        timers.schedule_once("b", Duration::from_secs(2), |v| v.push(2));

        let mut v = Vec::new();
        timers.run_due(&mut v, later(5));
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn popped_one_shot_is_gone_before_callback_runs() {
        let mut timers: Timers<()> = Timers::new();
        timers.schedule_once("again", Duration::ZERO, |_| {});
        let (name, _cb) = timers.pop_due(later(1)).unwrap();
        assert_eq!(name, "again");
        assert!(!timers.contains("again"));
        timers.schedule_once("again", Duration::from_secs(1), |_| {});
        assert!(timers.contains("again"));
    }
}
