//! A gRPC-over-HTTP/2 framework: typed services, streaming calls,
//! interceptors, and (behind the `transport` feature) a server listener and
//! a client channel with pluggable load balancing.
//!
//! The layering follows the wire protocol bottom-up: [`codec`] frames and
//! encodes/decodes individual messages, [`call`] and [`context`] track a
//! single RPC's state and deadline/cancellation, [`server`] and [`client`]
//! dispatch typed calls over an HTTP request/response pair, and
//! [`transport`] supplies the HTTP/2 plumbing underneath all of it. A caller
//! that wants to drive the codec/dispatch layers over its own HTTP/2 stack
//! can disable `transport` entirely.

pub mod body;
pub mod call;
pub mod client;
pub mod codec;
pub mod context;
pub mod interceptor;
pub mod metadata;
mod request;
mod response;
pub mod server;
mod status;
pub mod transport;

pub use call::Shape;
pub use context::Context;
pub use request::Request;
pub use response::Response;
pub use status::{Code, Status};

/// The crate-wide "any error" type used at boundaries where a concrete error
/// type would otherwise have to flow through generic code that doesn't care
/// what it is (transport bodies, user service errors before they're turned
/// into a [`Status`]).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
