//! tapd — game traffic interception daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Handle;

use tap_core::config::{BackendKind, CaptureConfig, TapConfig};
use tap_services::PendingRegistry;

use tapd::capture::MemoryFactory;
use tapd::trace::PacketTrace;
use tapd::{BackendFactory, ObserverDispatcher, Scanner};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = TapConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = TapConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TapConfig::default()
    });
    tracing::info!(
        main_server = %config.network.main_server,
        backend = ?config.capture.backend,
        linger_ms = config.network.linger_ms,
        "tapd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // Observers
    let mut dispatcher = ObserverDispatcher::new();
    if config.dispatch.trace_packets {
        dispatcher.register(Arc::new(PacketTrace::new()));
    }
    tracing::info!(observers = dispatcher.len(), "observer dispatch ready");
    let (sink, dispatch_task) = dispatcher.spawn(shutdown_tx.subscribe());

    // Scanner
    let registry = PendingRegistry::new();
    let backends = backend_factory(&config.capture)?;
    let (scanner, stats) = Scanner::with_linker(
        config.network.clone(),
        backends,
        Handle::current(),
        registry.clone(),
        Arc::new(sink),
    );

    for ip in config.network.initial_watch() {
        scanner
            .add(ip)
            .with_context(|| format!("failed to start capture for {ip}"))?;
    }

    let status_printer = {
        let scanner = scanner.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                tracing::info!(
                    watched = ?scanner.watched(),
                    scans = scanner.outstanding(),
                    sessions = stats.sessions(),
                    linked = stats.linked(),
                    ignored = stats.ignored(),
                    pending_bulles = registry.len(),
                    "scanner status"
                );
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = dispatch_task       => tracing::error!("observer dispatch exited: {:?}", r),
        r = status_printer      => tracing::error!("status printer exited: {:?}", r),
    }

    scanner.stop();
    Ok(())
}

fn backend_factory(config: &CaptureConfig) -> Result<Arc<dyn BackendFactory>> {
    match config.backend {
        BackendKind::Pcap => pcap_factory(config),
        BackendKind::None => {
            tracing::warn!("capture backend disabled, no traffic will be seen");
            Ok(Arc::new(MemoryFactory::new()))
        }
    }
}

#[cfg(feature = "pcap")]
fn pcap_factory(config: &CaptureConfig) -> Result<Arc<dyn BackendFactory>> {
    Ok(Arc::new(tapd::capture::pcap::PcapFactory::new(config.clone())))
}

#[cfg(not(feature = "pcap"))]
fn pcap_factory(_config: &CaptureConfig) -> Result<Arc<dyn BackendFactory>> {
    anyhow::bail!("tapd was built without the `pcap` feature; set capture.backend = \"none\"")
}
