//! Owns exactly one HTTP/2 connection to a single [`Endpoint`] (§4.8).

use super::Endpoint;
use crate::body::BoxBody;
use crate::Status;
use hyper_timeout::TimeoutConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(120);

/// The exponential-backoff delay before reconnect attempt `attempt` (0
/// based), before jitter is applied: `min(base * 2^attempt, cap)` (§4.8).
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let scaled = BACKOFF_BASE
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .unwrap_or(BACKOFF_CAP);
    scaled.min(BACKOFF_CAP)
}

/// Applies the spec's `±20%` jitter band to a backoff delay.
fn jittered(delay: Duration) -> Duration {
    let factor = 0.8 + rand::Rng::gen_range(&mut rand::thread_rng(), 0.0..0.4);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// A subchannel's connectivity, observed by the owning [`super::Channel`]
/// when computing its ready set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubchannelState {
    Idle,
    Connecting,
    Ready,
    Down,
}

/// One HTTP/2 connection (via a single-endpoint `hyper_util` client,
/// configured `http2_only` with a pool capped at one idle connection, as a
/// practical stand-in for "exactly one connection") plus the
/// reconnect-with-backoff task that keeps it alive (§4.8).
pub struct Subchannel {
    endpoint: Endpoint,
    client: Client<TimeoutConnector<HttpConnector>, BoxBody>,
    ready: Arc<AtomicBool>,
    state_tx: watch::Sender<SubchannelState>,
    reconnect_attempt: Arc<Mutex<u32>>,
}

impl Subchannel {
    pub fn new(endpoint: Endpoint) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(endpoint.is_nodelay());
        connector.set_keepalive(endpoint.keepalive());
        connector.set_connect_timeout(endpoint.timeout());
        connector.enforce_http(false);

        // Connect timeout lives on the inner `HttpConnector`; the
        // `TimeoutConnector` wrapper covers the part `HttpConnector` can't,
        // a read or write stalling on an already-open connection.
        let mut connector = TimeoutConnector::new(connector);
        connector.set_read_timeout(endpoint.read_write_timeout());
        connector.set_write_timeout(endpoint.read_write_timeout());

        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .pool_max_idle_per_host(1)
            .build(connector);

        let (state_tx, _) = watch::channel(SubchannelState::Idle);

        Self {
            endpoint,
            client,
            // Matches `state_tx`'s initial `Idle`: a subchannel isn't ready
            // until something marks it up, either a successful call or
            // `dial`.
            ready: Arc::new(AtomicBool::new(false)),
            state_tx,
            reconnect_attempt: Arc::new(Mutex::new(0)),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SubchannelState {
        *self.state_tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Forwards one HTTP/2 request over this subchannel's connection.
    ///
    /// On a transport error this subchannel transitions to *down* (§4.8)
    /// and a background task begins reconnecting with backoff; the caller
    /// sees `UNAVAILABLE` for this attempt and should ask the channel to
    /// pick again.
    pub async fn call(&self, request: http::Request<BoxBody>) -> Result<http::Response<BoxBody>, Status> {
        match self.client.request(request).await {
            Ok(response) => {
                self.mark_up();
                Ok(response.map(crate::body::boxed))
            }
            Err(err) => {
                self.mark_down();
                Err(Status::unavailable(format!("transport error: {err}")))
            }
        }
    }

    /// Dials the endpoint once outside of a real call, for a channel
    /// configured to wait for its subchannels to come up before serving its
    /// first request instead of discovering readiness lazily.
    pub(crate) async fn dial(&self) -> bool {
        if probe(self.endpoint.uri()).await {
            self.mark_up();
            true
        } else {
            self.mark_down();
            false
        }
    }

    pub(crate) fn mark_up(&self) {
        self.ready.store(true, Ordering::Release);
        let _ = self.state_tx.send(SubchannelState::Ready);
    }

    pub(crate) fn mark_down(&self) {
        self.ready.store(false, Ordering::Release);
        let _ = self.state_tx.send(SubchannelState::Down);
        self.spawn_reconnect();
    }

    fn spawn_reconnect(&self) {
        let ready = self.ready.clone();
        let state_tx = self.state_tx.clone();
        let attempt_slot = self.reconnect_attempt.clone();
        let authority = self.endpoint.uri().clone();

        tokio::spawn(async move {
            let attempt = {
                let mut guard = attempt_slot.lock().await;
                let current = *guard;
                *guard += 1;
                current
            };
            let delay = jittered(backoff_delay(attempt));
            let _ = state_tx.send(SubchannelState::Connecting);
            tokio::time::sleep(delay).await;

            if probe(&authority).await {
                ready.store(true, Ordering::Release);
                let _ = state_tx.send(SubchannelState::Ready);
                *attempt_slot.lock().await = 0;
            } else {
                let _ = state_tx.send(SubchannelState::Down);
            }
        });
    }
}

async fn probe(uri: &http::Uri) -> bool {
    let Some(host) = uri.host() else { return false };
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("https") { 443 } else { 80 });
    tokio::net::TcpStream::connect((host, port)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_cap() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(10), Duration::from_secs(120));
        assert_eq!(backoff_delay(31), Duration::from_secs(120));
    }
}
