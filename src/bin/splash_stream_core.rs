//! Process entry point: parses CLI args, loads config, starts the control
//! surface, the optional traffic monitor, and (when `--cli` is set) the
//! interactive stdin key loop.
//!
//! Grounded on the teacher's `src/bin/*.rs` (`Args::parse()`,
//! `pretty_env_logger::init()`, `Config::builder()...try_deserialize()` shape)
//! and `main.rs`'s top-level `#[tokio::main] async fn main()` structure.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use splash_stream_core::app::App;
use splash_stream_core::cli::{decode_key, Args, Key, RawStdin};
use splash_stream_core::control::{self, Controllable, StartOutcome};
use splash_stream_core::events::LogSink;
use splash_stream_core::monitor::TrafficMonitor;
use splash_stream_core::settings::Settings;

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let settings = match Settings::load(&args.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return Ok(ExitCode::from(1));
        }
    };

    let http_port = args.http_port.unwrap_or(settings.control.port);
    let monitor_settings = settings.monitor.clone();
    let combo_loop_mode = settings.control.combo_loop_mode;

    let events = Arc::new(LogSink);
    let monitor = monitor_settings.and_then(TrafficMonitor::try_start).map(Arc::new);
    let app = Arc::new(App::new(settings, events, monitor.clone())?);
    let mut fault_rx = app.subscribe_fault();

    let control_app: Arc<dyn control::Controllable> = app.clone();
    tokio::spawn(async move {
        if let Err(e) = control::serve(http_port, control_app).await {
            error!("control surface exited: {e}");
        }
    });

    if let Some(monitor) = monitor {
        let app_for_monitor = app.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(monitor.check_interval()).await;
                let streaming = app_for_monitor.pipeline_state().is_streaming();
                monitor.tick(streaming, |should_start| {
                    if should_start {
                        let _ = app_for_monitor.start();
                    } else {
                        let _ = app_for_monitor.stop();
                    }
                });
            }
        });
    }

    if args.cli {
        info!("interactive mode: 1-9 enqueue, c clear, s start, x stop, q quit");
        let raw = RawStdin::enable()?;
        loop {
            if *fault_rx.borrow() {
                error!("pipeline fault: shutting down");
                break;
            }
            if let Some(byte) = raw.read_key() {
                match decode_key(byte) {
                    Some(Key::EnqueueNth(n)) => {
                        let name = app.registry_arc().sequences().get(n as usize).map(|s| s.name.clone());
                        if let Some(name) = name {
                            if let Err(e) = app.queue().enqueue_by_name(&app.registry_arc(), &name, combo_loop_mode.as_repeat_mode()) {
                                error!("enqueue failed: {e:?}");
                            }
                        }
                    }
                    Some(Key::Clear) => app.queue().clear(),
                    Some(Key::Start) => match app.start() {
                        Ok(StartOutcome::BlockedByMonitor) => info!("start refused: external sender is active"),
                        Ok(_) => {}
                        Err(e) => error!("start failed: {e}"),
                    },
                    Some(Key::Stop) => {
                        let _ = app.stop();
                    }
                    Some(Key::Quit) => break,
                    None => {}
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        }
        let _ = app.stop();
    } else {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = fault_rx.changed() => {
                error!("pipeline fault: shutting down");
            }
        }
        let _ = app.stop();
    }

    info!("server closed");
    Ok(ExitCode::SUCCESS)
}
