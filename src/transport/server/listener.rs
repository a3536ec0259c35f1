use crate::server::Routes;
use crate::transport::service::GrpcTimeout;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_service::Service;

#[cfg(feature = "tls")]
use std::sync::Arc;

/// Builds and runs the HTTP/2 listener over a compiled [`Routes`] (§4.7).
///
/// Built on `hyper_util`'s `auto` connection builder and its
/// `GracefulShutdown` helper, the same pattern a plain `hyper` server would
/// use outside of gRPC specifically.
pub struct Server {
    routes: Routes,
    name: Option<String>,
    drain_deadline: Duration,
    timeout: Option<Duration>,
    #[cfg(feature = "tls")]
    tls: Option<Arc<tokio_rustls::rustls::ServerConfig>>,
}

impl Server {
    pub fn new(routes: Routes) -> Self {
        Self {
            routes,
            name: None,
            drain_deadline: Duration::from_secs(10),
            timeout: None,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// A name surfaced in this server's log lines, the way an operator would
    /// tell several listeners in the same process apart. Unlike
    /// [`crate::transport::channel::Channel::into_shared`], this isn't
    /// backed by a process-wide registry: `serve`/`serve_with_shutdown`
    /// consume `self` into an accept loop that never hands back a shared
    /// handle for another part of the process to look up.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// How long `serve_with_shutdown` waits for in-flight calls to finish
    /// after shutdown is requested before returning anyway (§4.7).
    pub fn drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    /// A server-wide deadline applied to every call on top of whatever
    /// `grpc-timeout` the caller sent, via [`GrpcTimeout`]: the shorter of
    /// the two wins (§4.3, §4.10).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[cfg(feature = "tls")]
    pub fn tls_config(mut self, config: tokio_rustls::rustls::ServerConfig) -> Self {
        self.tls = Some(Arc::new(config));
        self
    }

    /// Serves until the process is killed; see [`Server::serve_with_shutdown`]
    /// for a version that drains on a signal.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), crate::BoxError> {
        self.serve_with_shutdown(addr, std::future::pending()).await
    }

    /// Accepts connections on `addr` until `shutdown` resolves, then stops
    /// accepting new ones and waits up to `drain_deadline` for in-flight
    /// calls to finish before returning (§4.7 "graceful shutdown").
    pub async fn serve_with_shutdown<F>(self, addr: SocketAddr, shutdown: F) -> Result<(), crate::BoxError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, name = self.name.as_deref().unwrap_or("unnamed"), "listening");

        let builder = ConnBuilder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let routes = self.routes.clone();
                    let timeout = self.timeout;
                    let builder = builder.clone();
                    let graceful = graceful.clone();
                    #[cfg(feature = "tls")]
                    let tls = self.tls.clone();

                    tokio::spawn(async move {
                        #[cfg(feature = "tls")]
                        if let Some(tls) = tls {
                            match tokio_rustls::TlsAcceptor::from(tls).accept(stream).await {
                                Ok(stream) => serve_one(&builder, &graceful, stream, routes, timeout, peer).await,
                                Err(err) => tracing::debug!(%peer, %err, "tls handshake failed"),
                            }
                            return;
                        }
                        serve_one(&builder, &graceful, stream, routes, timeout, peer).await;
                    });
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, draining connections");
                    break;
                }
            }
        }

        drop(listener);
        tokio::select! {
            _ = graceful.shutdown() => {
                tracing::info!("all connections drained");
            }
            _ = tokio::time::sleep(self.drain_deadline) => {
                tracing::warn!("drain deadline elapsed with connections still open");
            }
        }

        Ok(())
    }
}

async fn serve_one<IO>(
    builder: &ConnBuilder<TokioExecutor>,
    graceful: &GracefulShutdown,
    stream: IO,
    routes: Routes,
    timeout: Option<Duration>,
    peer: SocketAddr,
) where
    IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let timed = GrpcTimeout::new(routes, timeout);
    let service = hyper::service::service_fn(move |request: http::Request<hyper::body::Incoming>| {
        // `GrpcTimeout` is a `tower_service::Service` (`&mut self`), not a
        // `hyper::service::Service` (`&self`); a clone per call bridges the
        // two the same way a `tower::Buffer`-free client stub would.
        let mut timed = timed.clone();
        async move {
            match timed.call(request).await {
                Ok(response) => Ok::<_, std::convert::Infallible>(response),
                Err(err) => Ok(crate::Status::from_error(err).to_http()),
            }
        }
    });

    let conn = builder.serve_connection(io, service);
    let conn = graceful.watch(conn);
    if let Err(err) = conn.await {
        tracing::debug!(%peer, %err, "connection ended with error");
    }
}
