//! Long-running processes: API server, worker, mock collaborator services.
//!
//! Every process shuts down on Ctrl+C or SIGTERM: pollers stop leasing,
//! in-flight tasks finish, then local run drivers are aborted. Runs stay
//! durable and are picked up by the next process that sweeps.

use anyhow::{Context, Result, bail};
use console::style;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::drivers::SWEEP_INTERVAL;
use crate::http;
use crate::state::AppState;

/// API server plus workers for every active queue.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    let queues = state.active_queue_names();
    state.check_extraction(&queues)?;

    let shutdown = shutdown_token();
    let pollers = state.workers.spawn(&queues, shutdown.clone());
    let sweeper = spawn_sweeper(&state, shutdown.clone());

    println!(
        "  {} docflow API listening on {}",
        style("⚡").bold(),
        style(format!("http://{addr}")).cyan()
    );
    println!("  Workers: {}", style(queues.join(", ")).dim());
    println!("  {}", style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    pollers.join_all().await;
    let _ = sweeper.await;

    println!("\n  Server stopped.");
    Ok(())
}

/// Dedicated worker process for a subset of queues.
pub async fn worker(state: AppState, queues: Vec<String>) -> Result<()> {
    let queues = if queues.is_empty() {
        state.active_queue_names()
    } else {
        queues
    };
    for queue in &queues {
        if state.router.queue(queue).is_none() {
            bail!(
                "unknown queue '{queue}' (configured: {})",
                state.config.queues.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
    }
    state.check_extraction(&queues)?;

    let shutdown = shutdown_token();
    let pollers = state.workers.spawn(&queues, shutdown.clone());
    let sweeper = spawn_sweeper(&state, shutdown.clone());

    println!(
        "  {} docflow worker polling {}",
        style("⚙").bold(),
        style(queues.join(", ")).cyan()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    pollers.join_all().await;
    let _ = sweeper.await;

    println!("\n  Worker stopped.");
    Ok(())
}

/// Fake OCR and NER services on their own ports.
pub async fn mock_services(host: &str, ocr_port: u16, ner_port: u16) -> Result<()> {
    let ocr_addr = format!("{host}:{ocr_port}");
    let ner_addr = format!("{host}:{ner_port}");
    let ocr_listener = tokio::net::TcpListener::bind(&ocr_addr)
        .await
        .with_context(|| format!("bind {ocr_addr}"))?;
    let ner_listener = tokio::net::TcpListener::bind(&ner_addr)
        .await
        .with_context(|| format!("bind {ner_addr}"))?;

    println!(
        "  {} Fake OCR on {}, fake NER on {}",
        style("🧪").bold(),
        style(format!("http://{ocr_addr}")).cyan(),
        style(format!("http://{ner_addr}")).cyan()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    let shutdown = shutdown_token();
    let ocr = async {
        axum::serve(ocr_listener, http::mock::mock_router())
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await
    };
    let ner = async {
        axum::serve(ner_listener, http::mock::mock_router())
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await
    };
    tokio::try_join!(ocr, ner)?;

    println!("\n  Mock services stopped.");
    Ok(())
}

fn spawn_sweeper(state: &AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(state.drivers.clone().run(SWEEP_INTERVAL, shutdown))
}

/// Token cancelled on Ctrl+C or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        trigger.cancel();
    });
    token
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
