//! The optional HTTP/2 transport: server listener, client channel, and the
//! subchannel/balancer/resolver stack behind it (§4.7, §4.8, §4.9).
//!
//! Everything in here is gated behind the `transport` feature; the codec,
//! call state machine, and dispatcher above it don't require it — a caller
//! can drive `Grpc<T>`/`Routes` over its own HTTP/2 stack instead.

pub(crate) mod service;

#[cfg(feature = "transport")]
pub(crate) mod registry;
#[cfg(feature = "transport")]
pub mod channel;
#[cfg(feature = "transport")]
pub mod server;

#[cfg(feature = "transport")]
pub use self::channel::{Balancer, Channel, Endpoint, Resolver, StaticResolver, Strategy, Subchannel, SubchannelState};
#[cfg(feature = "transport")]
pub use self::server::Server;

use std::fmt;

/// A call's deadline (derived from `grpc-timeout` or a server default)
/// elapsed before the peer responded.
#[derive(Debug)]
pub struct TimeoutExpired(pub(crate) ());

impl fmt::Display for TimeoutExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("deadline exceeded")
    }
}

impl std::error::Error for TimeoutExpired {}

impl From<TimeoutExpired> for crate::Status {
    fn from(_: TimeoutExpired) -> Self {
        crate::Status::deadline_exceeded("deadline exceeded")
    }
}
