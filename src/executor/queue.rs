use crate::interpreter::{CallbackRef, Value};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

/// A callback waiting to be pulled by the interpreted poll loop.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEntry {
    pub callback: CallbackRef,
    pub arguments: Vec<Value>,
}

impl EventEntry {
    pub fn new(callback: CallbackRef, arguments: Vec<Value>) -> Self {
        Self {
            callback,
            arguments,
        }
    }
}

/// FIFO of pending native-to-interpreted calls.
#[derive(Debug, Default, Clone)]
pub struct EventQueue {
    entries: VecDeque<EventEntry>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: EventEntry) {
        trace!(callback = entry.callback.name(), "event queued");
        self.entries.push_back(entry);
    }

    pub fn pop_or_none(&mut self) -> Option<EventEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone)]
struct Timer {
    /// `None` when the deadline is past what `Instant` can represent.
    due: Option<Instant>,
    seq: u64,
    entry: EventEntry,
}

/// Timers registered by interpreted code, released into the queue once due.
#[derive(Debug, Default, Clone)]
pub struct Timers {
    pending: Vec<Timer>,
    next_seq: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, now: Instant, delay: Duration, entry: EventEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let due = now.checked_add(delay);
        if due.is_none() {
            trace!(?delay, "timer deadline out of range, never due");
        }
        self.pending.push(Timer {
            due,
            seq,
            entry,
        });
    }

    /// Move every timer due at `now` into `queue`, earliest first and in
    /// registration order among equal deadlines. Returns how many moved.
    pub fn release_due(&mut self, now: Instant, queue: &mut EventQueue) -> usize {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.pending
                .drain(..)
                .partition(|timer| timer.due.is_some_and(|due| due <= now));
        self.pending = pending;
        due.sort_by_key(|timer| (timer.due, timer.seq));
        let released = due.len();
        for timer in due {
            queue.push(timer.entry);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time until the earliest pending timer is due.
    pub fn next_due_in(&self, now: Instant) -> Option<Duration> {
        self.pending
            .iter()
            .map(|timer| {
                timer
                    .due
                    .map_or(Duration::MAX, |due| due.saturating_duration_since(now))
            })
            .min()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> EventEntry {
        EventEntry::new(CallbackRef::new(name), vec![])
    }

    #[test]
    fn test_pop_order_matches_push_order() {
        let mut queue = EventQueue::new();
        queue.push(entry("a"));
        queue.push(entry("b"));
        assert_eq!(queue.pop_or_none().unwrap().callback.name(), "a");
        queue.push(entry("c"));
        assert_eq!(queue.pop_or_none().unwrap().callback.name(), "b");
        assert_eq!(queue.pop_or_none().unwrap().callback.name(), "c");
    }

    #[test]
    fn test_empty_pop_is_idempotent() {
        let mut queue = EventQueue::new();
        assert!(queue.pop_or_none().is_none());
        assert!(queue.pop_or_none().is_none());
        queue.push(entry("a"));
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_or_none().is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_timers_release_in_deadline_then_registration_order() {
        let start = Instant::now();
        let mut timers = Timers::new();
        let mut queue = EventQueue::new();
        timers.register(start, Duration::from_millis(20), entry("late"));
        timers.register(start, Duration::ZERO, entry("first"));
        timers.register(start, Duration::ZERO, entry("second"));

        assert_eq!(timers.release_due(start, &mut queue), 2);
        assert_eq!(timers.len(), 1);
        assert_eq!(
            timers.next_due_in(start),
            Some(Duration::from_millis(20))
        );

        assert_eq!(
            timers.release_due(start + Duration::from_millis(20), &mut queue),
            1
        );
        let order: Vec<_> = std::iter::from_fn(|| queue.pop_or_none())
            .map(|e| e.callback.0)
            .collect();
        assert_eq!(order, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_unrepresentable_deadline_is_never_due() {
        let start = Instant::now();
        let mut timers = Timers::new();
        let mut queue = EventQueue::new();
        timers.register(start, Duration::MAX, entry("never"));
        timers.register(start, Duration::ZERO, entry("now"));

        assert_eq!(timers.release_due(start, &mut queue), 1);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_due_in(start), Some(Duration::MAX));
        assert_eq!(queue.pop_or_none().unwrap().callback.name(), "now");
    }
}
