//! Wires the five components together into one process-lifetime object and
//! implements the `control::Controllable` seam the HTTP surface and the CLI
//! both drive.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::control::{Controllable, StartOutcome};
use crate::events::EventSink;
use crate::monitor::TrafficMonitor;
use crate::pipeline::runner::PipelineRunner;
use crate::pipeline::PipelineConfig;
use crate::queue::{QueueEngine, QueueError};
use crate::sequence::Registry;
use crate::settings::{ComboLoopMode, Settings};

pub struct App {
    registry: Arc<Registry>,
    queue: Arc<QueueEngine>,
    runner: Mutex<PipelineRunner>,
    combo_loop_mode: ComboLoopMode,
    monitor: Option<Arc<TrafficMonitor>>,
    fault_tx: watch::Sender<bool>,
}

impl App {
    pub fn new(
        settings: Settings,
        events: Arc<dyn EventSink>,
        monitor: Option<Arc<TrafficMonitor>>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::build(settings.entries, settings.stream.fps)?);
        let queue = Arc::new(QueueEngine::new(events.clone()));

        let primary: SocketAddr = format!("{}:{}", settings.stream.host, settings.stream.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid [stream] host/port: {e}"))?;

        let config = PipelineConfig {
            input_path: settings.stream.input,
            fps: settings.stream.fps,
            primary,
            secondary: None,
        };

        let (fault_tx, _) = watch::channel(false);
        let runner = PipelineRunner::new(config, registry.clone(), queue.clone(), events, fault_tx.clone())?;

        Ok(Self {
            registry,
            queue,
            runner: Mutex::new(runner),
            combo_loop_mode: settings.control.combo_loop_mode,
            monitor,
            fault_tx,
        })
    }

    pub fn queue(&self) -> Arc<QueueEngine> {
        self.queue.clone()
    }

    pub fn registry_arc(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn pipeline_state(&self) -> Arc<crate::pipeline::PipelineState> {
        self.runner.lock().unwrap().state()
    }

    /// A receiver that wakes whenever the pipeline thread faults, so the
    /// process main loop can terminate alongside `ctrl_c` (§7: a reader bus
    /// error exits the event loop).
    pub fn subscribe_fault(&self) -> watch::Receiver<bool> {
        self.fault_tx.subscribe()
    }
}

impl Controllable for App {
    fn start(&self) -> anyhow::Result<StartOutcome> {
        // I6: external-active must imply not-streaming at all times, so the
        // control surface (and the CLI, which also goes through here) can
        // never override the monitor's gate.
        if let Some(monitor) = &self.monitor {
            if monitor.is_external_active() {
                return Ok(StartOutcome::BlockedByMonitor);
            }
        }
        let started = self.runner.lock().unwrap().start()?;
        Ok(if started { StartOutcome::Started } else { StartOutcome::AlreadyRunning })
    }

    fn stop(&self) -> anyhow::Result<bool> {
        self.runner.lock().unwrap().stop()
    }

    fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    fn combo_loop_mode(&self) -> ComboLoopMode {
        self.combo_loop_mode
    }

    fn enqueue(&self, name: &str) -> Result<(), QueueError> {
        self.queue.enqueue_by_name(&self.registry, name, self.combo_loop_mode.as_repeat_mode())
    }
}
