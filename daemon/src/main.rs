//! handsfree-daemon: reference host for the hands-free interaction core
//!
//! This daemon wires the core to stand-in devices and provides:
//! - Speech output written to the log
//! - Transcripts, gestures and lifecycle hooks over a Unix socket
//! - A file-backed camera and an HTTP uploader for receipt capture
//! - Process signals mapped onto lifecycle hooks

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use handsfree::capture::{HttpUploadTransport, JpegPassthrough};
use handsfree::config::Config;
use handsfree::controller::{Ports, TurnController};
use handsfree::events::{Event, EventSink, TurnEvent};
use handsfree::haptics::LogHaptics;
use handsfree::host::{FileCamera, LoggingSpeech, RecognitionRelay};
use handsfree::ipc::Server;
use handsfree::lifecycle::LifecycleSignals;
use handsfree::registry::ActionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "handsfree-daemon starting"
    );

    // Load configuration
    let config = Arc::new(Config::load()?);
    config
        .ensure_dirs()
        .context("failed to create data directory")?;
    info!(?config.socket_path, upload_url = %config.upload.url, "configuration loaded");

    if config.capture_fixture.is_none() {
        warn!("no capture fixture configured - captures will report the camera as not ready");
    }

    let registry = ActionRegistry::from_config(&config.commands)?;

    // Create channels for inter-component communication
    // Everything -> turn controller
    let (sink, inbox) = EventSink::channel();
    // Turn controller -> IPC status (and any other observer)
    let (event_tx, _event_rx) = broadcast::channel::<TurnEvent>(64);

    let relay = RecognitionRelay::new();
    let uploader =
        HttpUploadTransport::new(&config.upload).context("failed to build upload client")?;

    let ports = Ports {
        speech: Box::new(LoggingSpeech::new(
            sink.clone(),
            config.timing.speech_ms_per_char,
        )),
        recognizers: Box::new(relay.clone()),
        camera: Arc::new(FileCamera::new(config.capture_fixture.clone())),
        encoder: Arc::new(JpegPassthrough),
        uploader: Arc::new(uploader),
        haptics: Box::new(LogHaptics),
    };

    let mut controller = TurnController::new(
        Arc::clone(&config),
        registry,
        ports,
        sink.clone(),
        event_tx.clone(),
    );

    // Create IPC server forwarding host input to the controller
    let server = Server::new(&config.socket_path, sink.clone(), relay)?;

    // Subscribe to turn events for IPC status
    let mut status_rx = event_tx.subscribe();

    let mut signals = LifecycleSignals::new().context("failed to register signal handlers")?;

    sink.activate();
    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the controller (the only mutator of interaction state)
        _ = controller.run(inbox) => {
            info!("turn controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the IPC status snapshot in step with the controller
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(event) => server.apply_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "turn event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("turn event handler exited");
        }

        // Translate process signals into lifecycle hooks
        _ = async {
            loop {
                let command = signals.next().await;
                info!(%command, "signal received");
                if !sink.send(Event::Host(command)) {
                    break;
                }
            }
        } => {
            info!("signal handler exited");
        }
    }

    // Cleanup
    info!("shutting down...");

    controller.teardown();
    server.shutdown().await;

    info!("handsfree-daemon stopped");

    Ok(())
}
