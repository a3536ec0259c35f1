//! One resolvable target address for a [`super::Channel`] (§4.9).

use std::time::Duration;

/// A single backend address plus the per-connection socket options a
/// [`super::Subchannel`] applies when dialing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    uri: http::Uri,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl Endpoint {
    pub fn new(uri: http::Uri) -> Self {
        Self {
            uri,
            tcp_nodelay: true,
            tcp_keepalive: None,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    pub fn tcp_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.tcp_keepalive = interval;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// How long a read or write on an already-established connection may
    /// stall before the subchannel gives up on it, independent of any
    /// per-call `grpc-timeout` deadline.
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn uri(&self) -> &http::Uri {
        &self.uri
    }

    pub fn is_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn read_write_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }
}

impl From<http::Uri> for Endpoint {
    fn from(uri: http::Uri) -> Self {
        Endpoint::new(uri)
    }
}
