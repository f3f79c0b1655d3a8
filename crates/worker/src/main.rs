//! `genq-worker`: runs the job tracker as a standalone process.
//!
//! With no arguments the worker starts the background sweep and runs
//! until interrupted.  Given an input JSON object (and optionally a model
//! id before it), it submits one request, waits for the result and
//! prints it to stdout:
//!
//! ```text
//! genq-worker '{"prompt": "a lighthouse at dusk"}'
//! genq-worker fal-ai/fast-sdxl '{"prompt": "a lighthouse at dusk"}'
//! ```

use std::sync::Arc;

use anyhow::{bail, Context};
use genq_queue::api::QueueApi;
use genq_queue::client::GenerationRequest;
use genq_queue::config::QueueConfig;
use genq_tracker::config::TrackerConfig;
use genq_tracker::events::TrackerEvent;
use genq_tracker::tracker::JobTracker;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genq_worker=info,genq_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let queue_config = QueueConfig::from_env().context("Failed to load queue configuration")?;
    let tracker_config = TrackerConfig::from_env();
    tracing::info!(
        queue_url = %queue_config.base_url,
        default_model = %queue_config.default_model,
        batch_concurrency = tracker_config.batch_concurrency,
        "Loaded configuration",
    );

    let request = parse_args(std::env::args().skip(1).collect())?;

    // --- Tracker ---
    let client = Arc::new(QueueApi::new(&queue_config)?);
    let tracker = Arc::new(JobTracker::new(
        client,
        queue_config.default_model.clone(),
        tracker_config,
    ));
    tracker.start().await;

    let events_cancel = CancellationToken::new();
    let events_handle = tokio::spawn(log_events(tracker.subscribe(), events_cancel.clone()));

    let outcome = match request {
        Some(request) => run_once(&tracker, request).await,
        None => {
            tracing::info!("Worker running, press Ctrl-C to stop");
            shutdown_signal().await;
            Ok(())
        }
    };

    tracker.shutdown().await;
    events_cancel.cancel();
    let _ = events_handle.await;

    tracing::info!("Worker stopped");
    outcome
}

/// Submit one request, wait for it, and print the result.
async fn run_once(tracker: &JobTracker, request: GenerationRequest) -> anyhow::Result<()> {
    let metadata = serde_json::json!({ "source": "genq-worker" });
    let request_id = tracker
        .submit_to_queue_with_tracking(&request, metadata)
        .await?;

    let result = tokio::select! {
        result = tracker.poll_for_result(&request_id, None) => result?,
        () = shutdown_signal() => {
            bail!("Interrupted while waiting for request {request_id}");
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// `[MODEL] INPUT_JSON` or nothing.
fn parse_args(args: Vec<String>) -> anyhow::Result<Option<GenerationRequest>> {
    let (model, input) = match args.as_slice() {
        [] => return Ok(None),
        [input] => (None, input),
        [model, input] => (Some(model.clone()), input),
        _ => bail!("Usage: genq-worker [MODEL] INPUT_JSON"),
    };

    let input: serde_json::Value =
        serde_json::from_str(input).context("INPUT_JSON is not valid JSON")?;
    let request = GenerationRequest::new(input);
    Ok(Some(match model {
        Some(model) => request.with_model(model),
        None => request,
    }))
}

/// Log every tracker lifecycle event until cancelled.
async fn log_events(
    mut events: tokio::sync::broadcast::Receiver<TrackerEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => tracing::debug!(
                    request_id = %event.request_id(),
                    event = ?event,
                    "Tracker event",
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
