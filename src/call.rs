//! The per-stream call state machine (§4.3) and the user-facing stream
//! handle built on top of it (§4.4).

use crate::codec::{CompressionEncoding, EnabledCompressionEncodings};
use crate::context::{CancelReason, Context};
use crate::metadata::MetadataMap;
use crate::{Code, Status};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The RPC shape, fixed per method by its descriptor (§3 "Method descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Unary,
    ServerStream,
    ClientStream,
    BidiStream,
}

impl Shape {
    pub fn client_streams(&self) -> bool {
        matches!(self, Shape::ClientStream | Shape::BidiStream)
    }

    pub fn server_streams(&self) -> bool {
        matches!(self, Shape::ServerStream | Shape::BidiStream)
    }
}

/// Mirrors §4.3's states, kept identical on both peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    HeadersSent,
    MsgExchange,
    HalfClosedLocal,
    Closed,
    Cancelled,
}

/// Tracks the state machine for one call and enforces the shape constraints
/// in §4.3. This is the bookkeeping layer; a [`StreamHandle`] is the
/// ergonomic, user-facing wrapper around it.
pub struct CallMachine {
    shape: Shape,
    state: CallState,
    headers_sent: bool,
    requests_seen: u64,
    responses_sent: u64,
    status_set: AtomicBool,
}

impl CallMachine {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            state: CallState::Idle,
            headers_sent: false,
            requests_seen: 0,
            responses_sent: 0,
            status_set: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, CallState::Closed | CallState::Cancelled)
    }

    /// Transitions on sending initial metadata. Idempotent-guard: calling
    /// twice is a programmer error surfaced as `INTERNAL` (§4.3).
    pub fn send_headers(&mut self) -> Result<(), Status> {
        if self.headers_sent {
            return Err(Status::internal("initial metadata was already sent"));
        }
        self.headers_sent = true;
        self.state = CallState::HeadersSent;
        Ok(())
    }

    /// Called once per received/sent request message, enforcing shape
    /// constraints for the inbound direction.
    pub fn observe_request(&mut self) -> Result<(), Status> {
        if self.is_terminal() {
            return Err(Status::internal("message observed after call closed"));
        }
        self.requests_seen += 1;
        if self.shape == Shape::Unary || self.shape == Shape::ServerStream {
            if self.requests_seen > 1 {
                return Err(Status::invalid_argument(
                    "unary/server-streaming call received more than one request message",
                ));
            }
        }
        self.state = CallState::MsgExchange;
        Ok(())
    }

    /// Called once per sent response message, enforcing shape constraints
    /// for the outbound direction.
    pub fn observe_response(&mut self) -> Result<(), Status> {
        if self.is_terminal() {
            return Err(Status::internal("message sent after call closed"));
        }
        if !self.headers_sent {
            self.send_headers()?;
        }
        self.responses_sent += 1;
        if self.shape == Shape::Unary || self.shape == Shape::ClientStream {
            if self.responses_sent > 1 {
                return Err(Status::internal(
                    "unary/client-streaming handler sent more than one response message",
                ));
            }
        }
        self.state = CallState::MsgExchange;
        Ok(())
    }

    pub fn half_close_local(&mut self) {
        if !self.is_terminal() {
            self.state = CallState::HalfClosedLocal;
        }
    }

    /// Marks the call terminal. Returns `false` if a status was already set
    /// (§3 Call invariant: "after status is set, no further frames may be
    /// sent or observed" — callers use this to make `end()` idempotent-safe).
    pub fn set_status(&mut self) -> bool {
        if self.status_set.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state = CallState::Closed;
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.status_set.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state = CallState::Cancelled;
        true
    }
}

/// One per stream (§3 "Call"): the method, context, shape, negotiated
/// compression, and the terminal status slot.
pub struct Call {
    pub method: &'static str,
    pub shape: Shape,
    pub context: Context,
    pub send_encoding: Option<CompressionEncoding>,
    pub recv_encoding: Option<CompressionEncoding>,
    pub peer_accept_encodings: EnabledCompressionEncodings,
    machine: CallMachine,
}

impl Call {
    pub fn new(method: &'static str, shape: Shape, context: Context) -> Self {
        Self {
            method,
            shape,
            context,
            send_encoding: None,
            recv_encoding: None,
            peer_accept_encodings: EnabledCompressionEncodings::default(),
            machine: CallMachine::new(shape),
        }
    }

    pub fn machine(&mut self) -> &mut CallMachine {
        &mut self.machine
    }

    pub fn state(&self) -> CallState {
        self.machine.state
    }
}

/// The user-facing object for sending/receiving framed messages and
/// metadata on a call (§4.4).
///
/// A `StreamHandle` is exclusive to its call: safe for one concurrent send
/// and one concurrent recv, but not two concurrent sends (§3 "Stream
/// handle").
pub struct StreamHandle<Tx, Rx> {
    machine: Arc<tokio::sync::Mutex<CallMachine>>,
    context: Context,
    trailer: MetadataMap,
    sender: Tx,
    receiver: Rx,
}

impl<Tx, Rx> StreamHandle<Tx, Rx> {
    pub fn new(machine: CallMachine, context: Context, sender: Tx, receiver: Rx) -> Self {
        Self {
            machine: Arc::new(tokio::sync::Mutex::new(machine)),
            context,
            trailer: MetadataMap::new(),
            sender,
            receiver,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Buffers trailer metadata; not written until [`StreamHandle::end`].
    pub fn set_trailer(&mut self, metadata: MetadataMap) {
        self.trailer.merge(metadata);
    }

    pub async fn mark_headers_sent(&self) -> Result<(), Status> {
        self.machine.lock().await.send_headers()
    }

    pub async fn mark_request_observed(&self) -> Result<(), Status> {
        self.machine.lock().await.observe_request()
    }

    pub async fn mark_response_observed(&self) -> Result<(), Status> {
        self.machine.lock().await.observe_response()
    }

    /// Finalizes the call with the given terminal status. Idempotent: a
    /// second call is a no-op, matching "terminal status... set exactly
    /// once" (§3 Call invariant).
    pub async fn mark_ended(&self) -> bool {
        self.machine.lock().await.set_status()
    }

    pub fn trailer_metadata(&self) -> &MetadataMap {
        &self.trailer
    }

    pub fn sender(&mut self) -> &mut Tx {
        &mut self.sender
    }

    pub fn receiver(&mut self) -> &mut Rx {
        &mut self.receiver
    }

    pub fn into_parts(self) -> (Tx, Rx) {
        (self.sender, self.receiver)
    }
}

/// Maps a [`CancelReason`] observed on a call's context to the status it
/// should terminate with (§5 "In-flight `send`/`recv` fail with `CANCELLED`
/// or `DEADLINE_EXCEEDED` depending on cause").
pub fn status_for_cancel(reason: CancelReason) -> Status {
    match reason {
        CancelReason::Deadline => Status::new(Code::DeadlineExceeded, "deadline exceeded"),
        CancelReason::Explicit => Status::new(Code::Cancelled, "call was cancelled"),
        CancelReason::PeerClosed => Status::new(Code::Cancelled, "peer closed the stream"),
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("shape", &self.shape)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_rejects_second_request_message() {
        let mut m = CallMachine::new(Shape::Unary);
        m.observe_request().unwrap();
        let err = m.observe_request().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn unary_rejects_second_response_message() {
        let mut m = CallMachine::new(Shape::Unary);
        m.observe_response().unwrap();
        let err = m.observe_response().unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn bidi_allows_unrestricted_interleaving() {
        let mut m = CallMachine::new(Shape::BidiStream);
        for _ in 0..5 {
            m.observe_request().unwrap();
            m.observe_response().unwrap();
        }
    }

    #[test]
    fn double_send_headers_is_internal_error() {
        let mut m = CallMachine::new(Shape::Unary);
        m.send_headers().unwrap();
        let err = m.send_headers().unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn set_status_is_exactly_once() {
        let mut m = CallMachine::new(Shape::Unary);
        assert!(m.set_status());
        assert!(!m.set_status());
        assert_eq!(m.state(), CallState::Closed);
    }
}
