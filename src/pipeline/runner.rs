//! Reader+sender loop and pipeline lifecycle (start/stop/apply_config).
//!
//! Grounded on the teacher's `pipeline/runner.rs` (`PipelineRunner` owning the
//! graph, a `run()` loop method) and `ingress/mod.rs`'s `spawn_pipeline`, which
//! runs the blocking, real-time-paced read/send cycle on a dedicated
//! `std::thread::spawn`'d thread rather than as an async task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::events::{Event, EventSink};
use crate::pipeline::rtp_sender::RtpSender;
use crate::pipeline::source::SourceFile;
use crate::pipeline::{PipelineConfig, PipelineState, SenderSlot};
use crate::queue::QueueEngine;
use crate::sequence::Registry;

/// Owns the reader/sender graph for one loaded configuration. `apply_config`
/// tears this down and rebuilds a fresh one; `start`/`stop` toggle the shared
/// `PipelineState` the background thread polls. `fault_tx` carries a reader
/// bus fault out to whoever holds a receiver (the process main loop), per
/// §7's "the event loop then exits gracefully" rule.
pub struct PipelineRunner {
    state: Arc<PipelineState>,
    registry: Arc<Registry>,
    queue: Arc<QueueEngine>,
    events: Arc<dyn EventSink>,
    config: PipelineConfig,
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    fault_tx: watch::Sender<bool>,
}

impl PipelineRunner {
    pub fn new(
        config: PipelineConfig,
        registry: Arc<Registry>,
        queue: Arc<QueueEngine>,
        events: Arc<dyn EventSink>,
        fault_tx: watch::Sender<bool>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            state: Arc::new(PipelineState::new()),
            registry,
            queue,
            events,
            config,
            thread: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            fault_tx,
        })
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// CONFIGURED -> STREAMING: spawns the reader/sender thread if not already
    /// running. Returns `true` if this call actually started it.
    pub fn start(&mut self) -> anyhow::Result<bool> {
        if self.is_running() {
            return Ok(false);
        }
        if self.registry.is_empty() {
            anyhow::bail!("cannot start: registry has no sequences");
        }
        if self.queue.active_idx() < 0 {
            self.queue.advance_at_boundary();
            if self.queue.active_idx() < 0 {
                // nothing queued and nothing to repeat: default to sequence 0
                self.queue.enqueue_many(&[0], self.registry.len()).ok();
                self.queue.advance_at_boundary();
            }
        }

        let source = SourceFile::load(&self.config.input_path)?;
        let au_count = source.access_unit_count();
        for seq in self.registry.sequences() {
            if seq.end_frame as usize >= au_count {
                anyhow::bail!(
                    "sequence '{}' end_frame {} is out of range for '{}' ({} access units)",
                    seq.name,
                    seq.end_frame,
                    self.config.input_path.display(),
                    au_count
                );
            }
        }

        self.shutdown.store(false, Ordering::SeqCst);
        self.fault_tx.send(false).ok();
        self.state.start();

        let state = self.state.clone();
        let registry = self.registry.clone();
        let queue = self.queue.clone();
        let events = self.events.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        let fault_tx = self.fault_tx.clone();

        self.thread = Some(std::thread::spawn(move || {
            if let Err(e) = run_loop(state.clone(), registry, queue, events.clone(), config, source, shutdown) {
                state.fault();
                events.emit(Event::Error(e.to_string()));
                fault_tx.send(true).ok();
            }
        }));

        self.events.emit(Event::Started);
        Ok(true)
    }

    /// STREAMING -> CONFIGURED: signals the background thread to exit and
    /// joins it. Returns `true` if this call actually stopped it.
    pub fn stop(&mut self) -> anyhow::Result<bool> {
        if !self.is_running() {
            return Ok(false);
        }
        self.shutdown.store(true, Ordering::SeqCst);
        self.state.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.events.emit(Event::Stopped);
        Ok(true)
    }

    /// Full teardown/rebuild: stops the current graph (if running) and
    /// replaces `config`. `next_pts_ns` resets to 0 the next time `start` runs.
    pub fn apply_config(&mut self, config: PipelineConfig, registry: Arc<Registry>) -> anyhow::Result<()> {
        let was_running = self.is_running();
        self.stop()?;
        self.config = config;
        self.registry = registry;
        if was_running {
            self.start()?;
        }
        Ok(())
    }
}

fn run_loop(
    state: Arc<PipelineState>,
    registry: Arc<Registry>,
    queue: Arc<QueueEngine>,
    events: Arc<dyn EventSink>,
    config: PipelineConfig,
    source: SourceFile,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    rt.block_on(async move {
        let mut primary = RtpSender::bind(config.primary).await?;
        let mut secondary = match config.secondary {
            Some(addr) => Some(RtpSender::bind(addr).await?),
            None => None,
        };
        let frame_duration_ns = (1_000_000_000.0 / config.fps).round() as u64;

        let mut active_idx = queue.active_idx();
        if active_idx < 0 {
            anyhow::bail!("no active sequence to stream");
        }
        let mut seq = registry.sequence(active_idx as usize).clone();
        let mut cursor = seq.start_frame;
        let mut next_due = Instant::now();

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            // Sample hot path (SPEC_FULL.md §4.C): one lock acquisition, index
            // and timestamp arithmetic only, no I/O under the lock.
            let (pts, streaming, target) = state.next_sample_slot(frame_duration_ns);
            if !streaming {
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            }

            let au = source.access_unit(cursor as usize);
            let sender: &mut RtpSender = match target {
                SenderSlot::Primary => &mut primary,
                SenderSlot::Secondary => secondary.as_mut().unwrap_or(&mut primary),
            };
            sender.send_access_unit(au, pts, frame_duration_ns).await?;

            next_due += Duration::from_nanos(frame_duration_ns);
            let now = Instant::now();
            if next_due > now {
                tokio::time::sleep(next_due - now).await;
            } else {
                next_due = now;
            }

            if cursor >= seq.end_frame {
                let new_active = queue.advance_at_boundary();
                let new_idx = if new_active >= 0 { new_active as usize } else { active_idx as usize };
                active_idx = new_idx as i32;
                seq = registry.sequence(new_idx).clone();
                cursor = seq.start_frame;
            } else {
                cursor += 1;
            }
        }
    })
}
