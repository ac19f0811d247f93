//! HTTP server lifecycle: background start and bounded drain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::service::router;
use crate::error::{GateError, Result};
use crate::ratelimit::Admission;

/// How long shutdown waits for in-flight requests.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Simulated work done for every admitted request.
pub const PROCESSING_DELAY: Duration = Duration::from_millis(100);

/// Where a server is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Listening,
    Draining,
    /// `forced` is set when the grace period ran out while draining.
    Stopped { forced: bool },
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request finished within the grace period
    Clean,
    /// The grace period elapsed and the server task was abandoned
    Forced,
}

/// HTTP server gated by an admission controller.
pub struct ServerLifecycle<A: Admission + 'static> {
    /// Address to bind to
    addr: String,
    /// The admission controller shared by every request
    admission: Arc<A>,
    shutdown_grace: Duration,
    processing_delay: Duration,
    state: LifecycleState,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
    bound: Option<watch::Receiver<Option<SocketAddr>>>,
    /// Fixed when draining first begins; re-entered drains share it.
    drain_deadline: Option<tokio::time::Instant>,
}

impl<A: Admission + 'static> ServerLifecycle<A> {
    /// Create an idle server that will listen on `addr`.
    pub fn new(addr: impl Into<String>, admission: Arc<A>) -> Self {
        Self {
            addr: addr.into(),
            admission,
            shutdown_grace: SHUTDOWN_GRACE,
            processing_delay: PROCESSING_DELAY,
            state: LifecycleState::Idle,
            shutdown: CancellationToken::new(),
            server: None,
            bound: None,
            drain_deadline: None,
        }
    }

    /// Override the drain deadline.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Override the simulated per-request work.
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Start listening in the background.
    ///
    /// Returns immediately. Bind and serve failures arrive later on the
    /// returned channel. Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<mpsc::Receiver<GateError>> {
        if self.state != LifecycleState::Idle {
            return Err(GateError::AlreadyStarted);
        }

        let (error_tx, error_rx) = mpsc::channel(1);
        let (bound_tx, bound_rx) = watch::channel(None);
        let app = router(Arc::clone(&self.admission), self.processing_delay);
        let addr = self.addr.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let listener = match TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(source) => {
                    error!(addr = %addr, error = %source, "Failed to bind listener");
                    let _ = error_tx.send(GateError::Bind { addr, source }).await;
                    return;
                }
            };

            match listener.local_addr() {
                Ok(local) => {
                    info!(addr = %local, "Rate-limited server listening");
                    bound_tx.send_replace(Some(local));
                }
                Err(e) => warn!(error = %e, "Could not read bound address"),
            }

            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;

            if let Err(e) = served {
                error!(error = %e, "HTTP server failed");
                let _ = error_tx.send(GateError::Serve(e)).await;
            }
        });

        self.server = Some(handle);
        self.bound = Some(bound_rx);
        self.state = LifecycleState::Listening;
        Ok(error_rx)
    }

    /// Wait until the listener is bound and return its address.
    ///
    /// Returns `None` if the server was never started or failed to bind.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let mut bound = self.bound.clone()?;
        let addr = match bound.wait_for(Option::is_some).await {
            Ok(addr) => *addr,
            Err(_) => None,
        };
        addr
    }

    /// Stop accepting connections and drain in-flight requests.
    ///
    /// Waits at most the grace period, measured from the first call. If an
    /// earlier call was dropped mid-drain, this one waits out what is left of
    /// the same deadline. Calling this again after the server has stopped
    /// returns the first outcome without draining twice.
    pub async fn shutdown(&mut self) -> ShutdownOutcome {
        match self.state {
            LifecycleState::Stopped { forced } => return outcome(forced),
            LifecycleState::Idle => {
                self.state = LifecycleState::Stopped { forced: false };
                return ShutdownOutcome::Clean;
            }
            LifecycleState::Listening | LifecycleState::Draining => {}
        }

        let deadline = match self.drain_deadline {
            Some(deadline) => deadline,
            None => {
                self.state = LifecycleState::Draining;
                info!(
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "Shutting down the server gracefully"
                );
                self.shutdown.cancel();

                let deadline = tokio::time::Instant::now() + self.shutdown_grace;
                self.drain_deadline = Some(deadline);
                deadline
            }
        };

        // The handle stays in place until the wait resolves, so a dropped
        // shutdown future leaves the next call something to wait on.
        let forced = match self.server.as_mut() {
            Some(handle) => match tokio::time::timeout_at(deadline, &mut *handle).await {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    error!(error = %e, "Server task ended abnormally");
                    false
                }
                Err(_) => {
                    handle.abort();
                    true
                }
            },
            None => false,
        };
        self.server = None;

        self.state = LifecycleState::Stopped { forced };
        if forced {
            warn!("Server did not shut down within the grace period");
        } else {
            info!("Server has been shut down");
        }
        outcome(forced)
    }
}

fn outcome(forced: bool) -> ShutdownOutcome {
    if forced {
        ShutdownOutcome::Forced
    } else {
        ShutdownOutcome::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::TokenBucket;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_test::{assert_err, assert_ok};

    fn bucket(capacity: u64) -> Arc<TokenBucket> {
        Arc::new(TokenBucket::new(capacity, 0.001).unwrap())
    }

    async fn get(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[test]
    fn test_server_creation() {
        let server = ServerLifecycle::new("127.0.0.1:0", bucket(1));
        assert_eq!(server.state(), LifecycleState::Idle);
        assert_eq!(server.shutdown_grace, SHUTDOWN_GRACE);
    }

    #[tokio::test]
    async fn test_serves_and_rejects_over_socket() {
        let mut server =
            ServerLifecycle::new("127.0.0.1:0", bucket(1)).with_processing_delay(Duration::ZERO);
        let _errors = assert_ok!(server.start());
        assert_eq!(server.state(), LifecycleState::Listening);

        let addr = server.local_addr().await.unwrap();

        let first = get(addr).await;
        assert!(first.starts_with("HTTP/1.1 200"), "got: {}", first);
        assert!(first.ends_with("Request accepted"));

        let second = get(addr).await;
        assert!(second.starts_with("HTTP/1.1 429"), "got: {}", second);
        assert!(second.contains("x-ratelimit-limit: 1"));
        assert!(second.contains("x-ratelimit-remaining: 0"));
        assert!(second.contains("Rate limit exceeded"));

        assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut server = ServerLifecycle::new("127.0.0.1:0", bucket(1));
        let _errors = assert_ok!(server.start());
        assert!(matches!(assert_err!(server.start()), GateError::AlreadyStarted));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_reported_on_channel() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let mut server = ServerLifecycle::new(addr.to_string(), bucket(1));
        let mut errors = assert_ok!(server.start());

        match errors.recv().await {
            Some(GateError::Bind { addr: failed, .. }) => assert_eq!(failed, addr.to_string()),
            other => panic!("expected bind error, got {:?}", other),
        }
        assert_eq!(server.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_request() {
        let mut server = ServerLifecycle::new("127.0.0.1:0", bucket(5))
            .with_processing_delay(Duration::from_millis(300));
        let _errors = assert_ok!(server.start());
        let addr = server.local_addr().await.unwrap();

        let in_flight = tokio::spawn(get(addr));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
        assert_eq!(server.state(), LifecycleState::Stopped { forced: false });

        let response = in_flight.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);

        // The listener is gone once drained.
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_forced_after_grace_period() {
        let mut server = ServerLifecycle::new("127.0.0.1:0", bucket(5))
            .with_processing_delay(Duration::from_secs(3))
            .with_shutdown_grace(Duration::from_millis(200));
        let _errors = assert_ok!(server.start());
        let addr = server.local_addr().await.unwrap();

        let _in_flight = tokio::spawn(get(addr));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        assert_eq!(server.shutdown().await, ShutdownOutcome::Forced);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(server.state(), LifecycleState::Stopped { forced: true });
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut server = ServerLifecycle::new("127.0.0.1:0", bucket(1))
            .with_processing_delay(Duration::from_secs(3))
            .with_shutdown_grace(Duration::from_millis(100));
        let _errors = assert_ok!(server.start());
        let addr = server.local_addr().await.unwrap();

        let _in_flight = tokio::spawn(get(addr));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(server.shutdown().await, ShutdownOutcome::Forced);
        assert_eq!(server.shutdown().await, ShutdownOutcome::Forced);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_resumes_same_deadline() {
        let mut server = ServerLifecycle::new("127.0.0.1:0", bucket(5))
            .with_processing_delay(Duration::from_secs(3))
            .with_shutdown_grace(Duration::from_millis(500));
        let _errors = assert_ok!(server.start());
        let addr = server.local_addr().await.unwrap();

        let _in_flight = tokio::spawn(get(addr));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let abandoned = tokio::time::timeout(Duration::from_millis(50), server.shutdown()).await;
        assert!(abandoned.is_err());
        assert_eq!(server.state(), LifecycleState::Draining);

        // The request is still running, so the resumed drain must run out
        // the original grace period rather than report success.
        assert_eq!(server.shutdown().await, ShutdownOutcome::Forced);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(450), "returned after {:?}", waited);
        assert!(waited < Duration::from_secs(2), "returned after {:?}", waited);
        assert_eq!(server.state(), LifecycleState::Stopped { forced: true });
    }

    #[tokio::test]
    async fn test_new_connections_refused_while_draining() {
        let mut server = ServerLifecycle::new("127.0.0.1:0", bucket(5))
            .with_processing_delay(Duration::from_millis(800));
        let _errors = assert_ok!(server.start());
        let addr = server.local_addr().await.unwrap();

        let in_flight = tokio::spawn(get(addr));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (outcome, refused) = tokio::join!(server.shutdown(), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            TcpStream::connect(addr).await.is_err()
        });

        assert!(refused, "listener still accepting during drain");
        assert_eq!(outcome, ShutdownOutcome::Clean);

        let response = in_flight.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let mut server = ServerLifecycle::new("127.0.0.1:0", bucket(1));
        assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
        assert_eq!(server.state(), LifecycleState::Stopped { forced: false });
        assert!(matches!(server.start(), Err(GateError::AlreadyStarted)));
    }
}
