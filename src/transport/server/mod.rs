//! The HTTP/2 listener (§4.7): accepts TCP connections, runs each over the
//! compiled service registry, and drains in-flight calls on shutdown.

mod listener;
pub use self::listener::Server;
