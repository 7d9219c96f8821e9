//! Dual-Stream Liveness CLI
//!
//! Drives two mock cameras through one detection session and prints the
//! verdict.

use clap::Parser;
use dual_liveness::{
    analysis::{AnalysisPath, ScriptedAnalyzer},
    capture::{CameraHandle, MockCamera},
    config::FileConfig,
    device::{DeviceRole, FileRoleStore, MemoryRoleStore, ProductId, RecordingDeviceLayer, RoleStore},
    metrics::MetricsRegistry,
    session::{DeviceEvent, LivenessOrchestrator},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs one liveness session against simulated cameras.
#[derive(Debug, Parser)]
#[command(name = "dual-liveness", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// File holding a host payload applied on top of the configuration.
    #[arg(long)]
    payload: Option<PathBuf>,

    /// TOML file persisting role assignments. In-memory when omitted.
    #[arg(long)]
    role_store: Option<PathBuf>,

    /// Score reported for every infrared frame.
    #[arg(long, default_value_t = 0.9)]
    score: f32,

    /// Status reported for every visible frame (0 = live face).
    #[arg(long, default_value_t = 0)]
    visible_status: i32,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Dual-Stream Liveness v{}", dual_liveness::VERSION);
    info!("This is a demonstration using mock camera input");

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let file = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };

    let store: Box<dyn RoleStore> = match &cli.role_store {
        Some(path) => Box::new(FileRoleStore::open(path)?),
        None => Box::new(MemoryRoleStore::new()),
    };
    let analyzer = ScriptedAnalyzer::new()
        .with_infrared_scores([cli.score])
        .with_visible_statuses(AnalysisPath::VisibleSimple, [cli.visible_status])
        .with_visible_statuses(AnalysisPath::VisibleNormal, [cli.visible_status]);

    let orchestrator = Arc::new(LivenessOrchestrator::from_file_config(
        &file,
        store,
        Arc::new(RecordingDeviceLayer::new()),
        Arc::new(analyzer),
    )?);

    if let Some(path) = &cli.payload {
        let payload = std::fs::read_to_string(path)?;
        let applied = orchestrator.configure(&payload)?;
        info!(config = ?applied.session, devices = ?applied.devices, "Payload applied");
    }

    #[cfg(feature = "metrics")]
    spawn_metrics_server(&orchestrator, file.output.metrics_port);

    {
        let orchestrator = Arc::clone(&orchestrator);
        ctrlc::set_handler(move || {
            warn!("Interrupted, cancelling session");
            orchestrator.cancel_session();
        })?;
    }

    orchestrator.on_foreground();

    let defaults = [ProductId(0x2203), ProductId(0x2204)];
    for role in DeviceRole::ALL {
        let product = file.devices.get(role).unwrap_or(defaults[role.index()]);
        orchestrator.handle_device_event(DeviceEvent::Attached(product))?;
        let camera = CameraHandle::new(MockCamera::new(product));
        let outcome = orchestrator.handle_device_event(DeviceEvent::Connected(camera))?;
        info!(product = %product, ?outcome, "Camera ready");
    }

    if file.output.log_stream_events {
        for role in DeviceRole::ALL {
            let events = orchestrator.events(role);
            std::thread::Builder::new()
                .name(format!("events-{}", role))
                .spawn(move || {
                    for event in events.iter() {
                        info!(role = %role, ?event, "Stream event");
                    }
                })?;
        }
    }

    let config = orchestrator.start_session();
    info!(mode = ?config.mode, timeout_ms = config.timeout_ms, "Waiting for verdict...");
    let verdict = orchestrator.wait_for_verdict(config.timeout() + Duration::from_secs(1));

    let snapshot = orchestrator.metrics_snapshot();
    for role in &snapshot.roles {
        info!(
            role = %role.role,
            received = role.frames.received,
            analyzed = role.frames.analyzed,
            dropped_busy = role.frames.dropped_busy,
            "Stream summary"
        );
    }
    let registry = MetricsRegistry::new()?;
    registry.update(&snapshot);
    debug!("Final metrics:\n{}", registry.encode()?);

    match verdict {
        Some(verdict) => println!("Verdict: {}", verdict),
        None => println!("Verdict: no session"),
    }

    orchestrator.on_teardown();
    info!("Done. Sessions started: {}", snapshot.sessions_started);
    Ok(())
}

#[cfg(feature = "metrics")]
fn spawn_metrics_server(orchestrator: &Arc<LivenessOrchestrator>, port: u16) {
    use dual_liveness::metrics::{MetricsServer, MetricsServerConfig, SnapshotSource};

    if port == 0 {
        return;
    }
    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            return;
        }
    };
    let source: SnapshotSource = {
        let orchestrator = Arc::clone(orchestrator);
        Arc::new(move || orchestrator.metrics_snapshot())
    };

    let spawned = std::thread::Builder::new()
        .name("metrics".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Metrics runtime failed: {}", e);
                    return;
                }
            };
            let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry, source);
            if let Err(e) = runtime.block_on(server.run()) {
                warn!("Metrics server stopped: {}", e);
            }
        });
    if let Err(e) = spawned {
        warn!("Metrics thread failed to start: {}", e);
    }
}
