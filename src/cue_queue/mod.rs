//! Cross-stream cue rendezvous (spec §4.3), a direct translation of the
//! original implementation's `SyncPointQueue`: two time-keyed maps
//! (unpromoted, promoted) guarded by one mutex and a condition variable.
//! This is the only synchronization point between per-stream chunkers.

use crate::config::AdCueGeneratorParams;
use crate::sample::CueEvent;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cue time keys are compared via their bit pattern through a thin
/// wrapper so `f64` can live in a `BTreeMap` key; cue times are always
/// finite wall-clock offsets so total ordering is safe here.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedTime(f64);

impl Eq for OrderedTime {}
impl PartialOrd for OrderedTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

struct Inner {
    thread_count: usize,
    waiting_thread_count: usize,
    cancelled: bool,
    unpromoted: BTreeMap<OrderedTime, Arc<CueEvent>>,
    promoted: BTreeMap<OrderedTime, Arc<CueEvent>>,
}

/// A synchronized queue for cue points, shared across every per-stream
/// chunker via `Arc`.
pub struct SyncPointQueue {
    state: Mutex<Inner>,
    condvar: Condvar,
}

impl SyncPointQueue {
    pub fn new(params: &AdCueGeneratorParams) -> Self {
        let mut unpromoted = BTreeMap::new();
        for &t in &params.cue_points_in_seconds {
            unpromoted.insert(
                OrderedTime(t),
                Arc::new(CueEvent { time_in_seconds: t, cue_id: String::new(), splice_info: None }),
            );
        }
        Self {
            state: Mutex::new(Inner {
                thread_count: 0,
                waiting_thread_count: 0,
                cancelled: false,
                unpromoted,
                promoted: BTreeMap::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Registers a participating thread/stream. Must be called once per
    /// stream before `get_next` to keep the all-parties-waiting deadlock
    /// break accurate.
    pub fn add_thread(&self) {
        self.state.lock().thread_count += 1;
    }

    /// Cancels the queue and wakes every waiter with no result.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.condvar.notify_all();
    }

    /// Smallest unpromoted cue time >= `t`, or `t` if none.
    pub fn get_hint(&self, t: f64) -> f64 {
        let state = self.state.lock();
        state
            .unpromoted
            .range(OrderedTime(t)..)
            .next()
            .map(|(k, _)| k.0)
            .unwrap_or(t)
    }

    /// True if there are more cues after `hint_in_seconds` (which must be
    /// a value previously returned by `get_hint`).
    pub fn has_more(&self, hint_in_seconds: f64) -> bool {
        let state = self.state.lock();
        state.unpromoted.range(OrderedTime(hint_in_seconds)..).next().is_some()
            || state.promoted.range(OrderedTime(hint_in_seconds)..).next().is_some()
    }

    fn promote_at_locked(state: &mut Inner, t: f64) -> Option<Arc<CueEvent>> {
        let key = state
            .unpromoted
            .range(..=OrderedTime(t))
            .next_back()
            .map(|(k, _)| *k)?;
        // Discard any earlier unpromoted cues; only the first eligible one
        // at or before `t` is promoted.
        let later: BTreeMap<_, _> = state.unpromoted.split_off(&key);
        state.unpromoted = later;
        let (_, cue) = state.unpromoted.pop_first()?;
        state.promoted.insert(key, Arc::clone(&cue));
        Some(cue)
    }

    /// Promotes the first unpromoted cue <= `t`, discarding earlier
    /// unpromoted cues, and wakes waiters.
    pub fn promote_at(&self, t: f64) -> Option<Arc<CueEvent>> {
        let mut state = self.state.lock();
        let result = Self::promote_at_locked(&mut state, t);
        self.condvar.notify_all();
        result
    }

    /// Blocks until a promoted cue greater than `hint_in_seconds` exists.
    /// If every participating thread is blocked with no promotion
    /// forthcoming, the first unpromoted cue at or after the hint is
    /// self-promoted to break the deadlock. Returns `None` if cancelled.
    pub fn get_next(&self, hint_in_seconds: f64) -> Option<Arc<CueEvent>> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return None;
            }
            if let Some((_, cue)) = state.promoted.range(OrderedTime(hint_in_seconds)..).next() {
                return Some(Arc::clone(cue));
            }
            state.waiting_thread_count += 1;
            if state.waiting_thread_count >= state.thread_count && state.thread_count > 0 {
                // Every participant is blocked: self-promote to break the
                // deadlock rather than wait forever.
                if let Some((&key, _)) = state.unpromoted.range(OrderedTime(hint_in_seconds)..).next() {
                    let promoted = Self::promote_at_locked(&mut state, key.0);
                    state.waiting_thread_count -= 1;
                    self.condvar.notify_all();
                    return promoted;
                }
            }
            self.condvar.wait(&mut state);
            state.waiting_thread_count = state.waiting_thread_count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn get_hint_returns_smallest_unpromoted_at_or_after() {
        let queue = SyncPointQueue::new(&AdCueGeneratorParams { cue_points_in_seconds: vec![5.0, 10.0] });
        assert_eq!(queue.get_hint(0.0), 5.0);
        assert_eq!(queue.get_hint(6.0), 10.0);
        assert_eq!(queue.get_hint(11.0), 11.0);
    }

    #[test]
    fn promote_at_discards_earlier_unpromoted() {
        let queue = SyncPointQueue::new(&AdCueGeneratorParams { cue_points_in_seconds: vec![5.0, 10.0] });
        let cue = queue.promote_at(5.04).unwrap();
        assert_eq!(cue.time_in_seconds, 5.0);
        // The next hint should skip straight to 10.0, not re-surface 5.0.
        assert_eq!(queue.get_hint(0.0), 10.0);
    }

    #[test]
    fn s2_two_streams_rendezvous_on_one_cue() {
        // spec S2: stream A promotes the cue at 5.04, stream B calls
        // get_next(0.0) and must observe the same promoted cue.
        let queue = StdArc::new(SyncPointQueue::new(&AdCueGeneratorParams { cue_points_in_seconds: vec![5.0] }));
        queue.add_thread();
        queue.add_thread();

        let q2 = StdArc::clone(&queue);
        let handle = thread::spawn(move || q2.get_next(0.0));

        // give the waiter a chance to block, then promote.
        thread::sleep(std::time::Duration::from_millis(20));
        let promoted = queue.promote_at(5.04).unwrap();
        let observed = handle.join().unwrap().unwrap();
        assert_eq!(promoted.time_in_seconds, observed.time_in_seconds);
        assert_eq!(observed.time_in_seconds, 5.0);
    }

    #[test]
    fn cancel_unblocks_waiters() {
        let queue = StdArc::new(SyncPointQueue::new(&AdCueGeneratorParams::default()));
        queue.add_thread();
        queue.add_thread();
        let q2 = StdArc::clone(&queue);
        let handle = thread::spawn(move || q2.get_next(0.0));
        thread::sleep(std::time::Duration::from_millis(20));
        queue.cancel();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn all_parties_waiting_self_promotes() {
        let queue = StdArc::new(SyncPointQueue::new(&AdCueGeneratorParams { cue_points_in_seconds: vec![5.0] }));
        queue.add_thread();
        // A single participant blocked with no other thread to promote:
        // it must self-promote the pending cue rather than hang forever.
        let result = queue.get_next(0.0);
        assert_eq!(result.unwrap().time_in_seconds, 5.0);
    }
}
