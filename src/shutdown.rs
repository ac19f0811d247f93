//! Termination coordination.
//!
//! The process waits on two independent sources: an OS signal (SIGINT or
//! SIGTERM, Ctrl+C elsewhere) and a line typed on standard input. Whichever
//! resolves first wins; the other is simply abandoned.

use std::io::{BufRead, BufReader, Read};

use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// What ended the wait for termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSource {
    /// SIGINT or Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// A line read from the cancel input
    Input,
}

/// Watch `reader` for a single line on a dedicated thread.
///
/// The receiver resolves once a line (possibly empty) has been read. If the
/// reader hits end-of-file or fails first, the sender is dropped and the
/// receiver reports an error instead.
///
/// Runs on a plain thread: a read parked on the Tokio blocking pool would
/// hold up runtime shutdown until the user pressed Enter.
pub fn spawn_input_watcher<R>(reader: R) -> oneshot::Receiver<()>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    let spawned = std::thread::Builder::new()
        .name("tokengate-cancel-input".to_string())
        .spawn(move || {
            let mut line = String::new();
            match BufReader::new(reader).read_line(&mut line) {
                Ok(0) => info!("Cancel input closed; only signals will stop the server"),
                Ok(_) => {
                    let _ = tx.send(());
                }
                Err(e) => warn!(error = %e, "Failed to read cancel input"),
            }
        });

    if let Err(e) = spawned {
        warn!(error = %e, "Failed to spawn cancel input watcher");
    }

    rx
}

/// Block until a termination signal arrives or the cancel input fires.
///
/// With `input` set to `None` only OS signals are observed.
pub async fn wait_for_termination(input: Option<oneshot::Receiver<()>>) -> TerminationSource {
    tokio::select! {
        source = wait_for_signal() => {
            info!(source = ?source, "Received signal, initiating graceful shutdown");
            source
        }
        _ = wait_for_input(input) => {
            info!("Cancel input received, initiating graceful shutdown");
            TerminationSource::Input
        }
    }
}

async fn wait_for_input(input: Option<oneshot::Receiver<()>>) {
    if let Some(rx) = input {
        if rx.await.is_ok() {
            return;
        }
    }
    // Closed input never cancels; fall back to signals alone.
    std::future::pending::<()>().await
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_signal() -> TerminationSource {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => TerminationSource::Interrupt,
        _ = terminate => TerminationSource::Terminate,
    }
}
