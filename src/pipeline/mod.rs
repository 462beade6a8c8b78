//! Media pipeline (component C): reader + sender graph over a single H.265
//! Annex-B elementary stream, re-timestamping every access unit and emitting
//! RTP/UDP with a monotonic PTS.

pub mod runner;
pub mod rtp_sender;
pub mod source;

use std::net::SocketAddr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderSlot {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Configured,
    Streaming,
    Faulted,
}

/// Everything the sample hot path and the control/monitor surfaces share,
/// guarded by exactly one mutex per SPEC_FULL.md §5.
pub struct PipelineState {
    inner: Mutex<Inner>,
}

struct Inner {
    phase: PipelinePhase,
    streaming: bool,
    next_pts_ns: u64,
    selected: SenderSlot,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: PipelinePhase::Configured,
                streaming: false,
                next_pts_ns: 0,
                selected: SenderSlot::Primary,
            }),
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        self.inner.lock().unwrap().phase
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().unwrap().streaming
    }

    /// Transitions CONFIGURED -> STREAMING, resetting `next_pts_ns` to 0 (I4).
    pub fn start(&self) {
        let mut st = self.inner.lock().unwrap();
        st.phase = PipelinePhase::Streaming;
        st.streaming = true;
        st.next_pts_ns = 0;
    }

    /// Transitions STREAMING -> CONFIGURED.
    pub fn stop(&self) {
        let mut st = self.inner.lock().unwrap();
        st.phase = PipelinePhase::Configured;
        st.streaming = false;
    }

    pub fn fault(&self) {
        let mut st = self.inner.lock().unwrap();
        st.phase = PipelinePhase::Faulted;
        st.streaming = false;
    }

    /// The sample hot path critical section: returns `(pts, streaming, selected)`
    /// and advances `next_pts_ns` by `frame_duration_ns`. O(1), no I/O.
    pub fn next_sample_slot(&self, frame_duration_ns: u64) -> (u64, bool, SenderSlot) {
        let mut st = self.inner.lock().unwrap();
        let pts = st.next_pts_ns;
        st.next_pts_ns += frame_duration_ns;
        (pts, st.streaming, st.selected)
    }

    pub fn select(&self, slot: SenderSlot) {
        self.inner.lock().unwrap().selected = slot;
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters a pipeline is (re)built from on `apply_config`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_path: std::path::PathBuf,
    pub fps: f64,
    pub primary: SocketAddr,
    pub secondary: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_pts_resets_to_zero_on_start_i4() {
        let state = PipelineState::new();
        state.start();
        let (pts, streaming, _) = state.next_sample_slot(1_000);
        assert_eq!(pts, 0);
        assert!(streaming);
        let (pts, _, _) = state.next_sample_slot(1_000);
        assert_eq!(pts, 1_000);

        state.stop();
        state.start();
        let (pts, _, _) = state.next_sample_slot(1_000);
        assert_eq!(pts, 0, "next_pts_ns must reset on every start, not just the first");
    }

    #[test]
    fn next_pts_is_monotonic_while_streaming() {
        let state = PipelineState::new();
        state.start();
        let mut previous = None;
        for _ in 0..5 {
            let (pts, _, _) = state.next_sample_slot(333);
            if let Some(prev) = previous {
                assert_eq!(pts, prev + 333);
            }
            previous = Some(pts);
        }
    }

    #[test]
    fn stop_clears_streaming_and_phase() {
        let state = PipelineState::new();
        state.start();
        assert!(state.is_streaming());
        assert_eq!(state.phase(), PipelinePhase::Streaming);

        state.stop();
        assert!(!state.is_streaming());
        assert_eq!(state.phase(), PipelinePhase::Configured);
    }

    #[test]
    fn fault_stops_streaming_and_sets_faulted_phase() {
        let state = PipelineState::new();
        state.start();
        state.fault();
        assert!(!state.is_streaming());
        assert_eq!(state.phase(), PipelinePhase::Faulted);
    }

    #[test]
    fn select_changes_the_slot_next_sample_slot_reports() {
        let state = PipelineState::new();
        let (_, _, slot) = state.next_sample_slot(1_000);
        assert_eq!(slot, SenderSlot::Primary);

        state.select(SenderSlot::Secondary);
        let (_, _, slot) = state.next_sample_slot(1_000);
        assert_eq!(slot, SenderSlot::Secondary);
    }
}
