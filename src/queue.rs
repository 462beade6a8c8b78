//! Queue engine (component B): active sequence, bounded pending FIFO, optional
//! repeat order, and the boundary-synchronous advance algorithm.
//!
//! Mirrors the `pending_queue`/`loop_order`/`queue_version`/`loop_version` fields
//! and the advance logic of the original C scheduler, reimplemented behind a
//! single mutex instead of manual locking around an opaque struct.

use std::sync::{Arc, Mutex};

use crate::events::{Event, EventSink};
use crate::sequence::{RepeatMode, Registry, Resolved};

pub const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    InvalidIndex,
    Full,
    EmptyName,
    NotFound,
}

struct QueueState {
    active_idx: i32,
    pending: Vec<usize>,
    repeat_order: Vec<usize>,
    queue_version: u64,
    repeat_version: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            active_idx: -1,
            pending: Vec::new(),
            repeat_order: Vec::new(),
            queue_version: 0,
            repeat_version: 0,
        }
    }
}

/// Thread-safe queue engine. Every mutating operation takes the single internal
/// mutex; `advance_at_boundary` does too. The pipeline's per-access-unit hot path
/// never touches this lock.
pub struct QueueEngine {
    state: Mutex<QueueState>,
    events: Arc<dyn EventSink>,
}

impl QueueEngine {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { state: Mutex::new(QueueState::new()), events }
    }

    pub fn active_idx(&self) -> i32 {
        self.state.lock().unwrap().active_idx
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Appends `indices` to `pending`; emits one `QueuedNext` event per index.
    pub fn enqueue_many(&self, indices: &[usize], nseq: usize) -> Result<(), QueueError> {
        if indices.iter().any(|&i| i >= nseq) {
            return Err(QueueError::InvalidIndex);
        }
        let mut st = self.state.lock().unwrap();
        if st.pending.len() + indices.len() > QUEUE_CAPACITY {
            return Err(QueueError::Full);
        }
        st.pending.extend_from_slice(indices);
        st.queue_version += 1;
        for &idx in indices {
            self.events.emit(Event::QueuedNext(idx as i32));
        }
        Ok(())
    }

    /// `enqueue_many` followed by installing a repeat order per `mode`.
    pub fn enqueue_with_repeat(
        &self,
        indices: &[usize],
        nseq: usize,
        mode: RepeatMode,
    ) -> Result<(), QueueError> {
        self.enqueue_many(indices, nseq)?;
        match mode {
            RepeatMode::None => {}
            RepeatMode::Last => {
                if let Some(&last) = indices.last() {
                    self.set_repeat_order(&[last], nseq);
                }
            }
            RepeatMode::Full => {
                self.set_repeat_order(indices, nseq);
            }
        }
        Ok(())
    }

    pub fn clear(&self) {
        let mut st = self.state.lock().unwrap();
        st.pending.clear();
        st.repeat_order.clear();
        st.queue_version += 1;
        drop(st);
        self.events.emit(Event::ClearedQueue);
    }

    /// Replaces the repeat order. An invalid index silently clears it instead of
    /// failing, matching the "Fails when" column's "silently clears" rule.
    pub fn set_repeat_order(&self, indices: &[usize], nseq: usize) {
        let mut st = self.state.lock().unwrap();
        if indices.iter().any(|&i| i >= nseq) {
            st.repeat_order.clear();
        } else {
            st.repeat_order = indices.to_vec();
        }
        st.repeat_version = st.queue_version;
    }

    /// Boundary advance algorithm: pop pending head, else consult the repeat
    /// order if it is not stale, else hold the current active index.
    pub fn advance_at_boundary(&self) -> i32 {
        let mut st = self.state.lock().unwrap();
        let prev = st.active_idx;

        if !st.pending.is_empty() {
            st.active_idx = st.pending.remove(0) as i32;
        } else if !st.repeat_order.is_empty() && st.repeat_version == st.queue_version {
            st.active_idx = st.repeat_order[0] as i32;
            let rest: Vec<usize> = st.repeat_order[1..].to_vec();
            let room = QUEUE_CAPACITY.saturating_sub(st.pending.len());
            st.pending.extend(rest.into_iter().take(room));
        }
        // else: active_idx unchanged, current sequence loops.

        let new_active = st.active_idx;
        drop(st);

        if new_active != prev {
            self.events.emit(Event::SwitchedAtBoundary(prev, new_active));
        }
        new_active
    }

    /// Prunes `pending`/`repeat_order` of entries `>= nseq` after a registry
    /// replacement, preserving relative order of the surviving entries.
    pub fn prune_to(&self, nseq: usize) {
        let mut st = self.state.lock().unwrap();
        st.pending.retain(|&i| i < nseq);
        st.repeat_order.retain(|&i| i < nseq);
        if st.active_idx >= nseq as i32 {
            st.active_idx = -1;
        }
    }

    /// Resolves `name` against the registry and enqueues it per §4.E's rule:
    /// a sequence hit enqueues a single index with no repeat; a combo hit
    /// enqueues its indices with repeat mode derived from `loop_at_end` and the
    /// process-wide `combo_loop_mode` policy.
    pub fn enqueue_by_name(
        &self,
        registry: &Registry,
        name: &str,
        combo_loop_mode: RepeatMode,
    ) -> Result<(), QueueError> {
        if name.is_empty() {
            return Err(QueueError::EmptyName);
        }
        match registry.resolve(name) {
            None => Err(QueueError::NotFound),
            Some(Resolved::Sequence(idx)) => {
                self.enqueue_with_repeat(&[idx], registry.len(), RepeatMode::None)
            }
            Some(Resolved::Combo(combo)) => {
                let mode = if combo.loop_at_end { combo_loop_mode } else { RepeatMode::None };
                self.enqueue_with_repeat(&combo.order.clone(), registry.len(), mode)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogSink;

    fn engine() -> QueueEngine {
        QueueEngine::new(Arc::new(LogSink))
    }

    #[test]
    fn p1_indices_stay_in_range() {
        let q = engine();
        assert!(q.enqueue_many(&[0, 1, 2], 4).is_ok());
        assert_eq!(q.advance_at_boundary(), 0);
        assert_eq!(q.advance_at_boundary(), 1);
        q.clear();
        assert_eq!(q.advance_at_boundary(), 1); // unchanged, nothing pending
    }

    #[test]
    fn p2_repeat_order_goes_stale_after_mutation() {
        let q = engine();
        q.set_repeat_order(&[0, 1], 4);
        q.enqueue_many(&[2], 4).unwrap(); // bumps queue_version past repeat_version
        assert_eq!(q.advance_at_boundary(), 2); // pending wins
        assert_eq!(q.advance_at_boundary(), 2); // repeat order now stale, holds
    }

    #[test]
    fn queue_overflow_256_then_fail() {
        let q = engine();
        for _ in 0..256 {
            assert!(q.enqueue_many(&[0], 4).is_ok());
        }
        assert_eq!(q.enqueue_many(&[0], 4), Err(QueueError::Full));
        assert_eq!(q.pending_len(), 256);
    }

    #[test]
    fn combo_full_loop_repeats_whole_order() {
        let q = engine();
        q.enqueue_with_repeat(&[0, 1, 2], 4, RepeatMode::Full).unwrap();
        let visited: Vec<i32> = (0..7).map(|_| q.advance_at_boundary()).collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn combo_last_loop_repeats_final_only() {
        let q = engine();
        q.enqueue_with_repeat(&[0, 1, 2], 4, RepeatMode::Last).unwrap();
        let visited: Vec<i32> = (0..5).map(|_| q.advance_at_boundary()).collect();
        assert_eq!(visited, vec![0, 1, 2, 2, 2]);
    }

    #[test]
    fn r1_enqueue_then_clear_is_a_no_op_modulo_version() {
        let q = engine();
        q.enqueue_many(&[0, 1], 4).unwrap();
        q.clear();
        assert_eq!(q.pending_len(), 0);
        assert_eq!(q.advance_at_boundary(), -1);
    }

    #[test]
    fn p4_reducing_nseq_prunes_queue() {
        let q = engine();
        q.enqueue_many(&[0, 1, 2, 3], 4).unwrap();
        q.prune_to(2);
        assert_eq!(q.pending_len(), 2);
    }
}
