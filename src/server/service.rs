//! The four RPC-shape service traits a generated handler stub implements
//! (§4.5: "a typed handler plus its RPC shape").

use crate::codec::Streaming;
use crate::request::Request;
use crate::response::Response;
use crate::Status;
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;

pub trait UnaryService<R>: Send {
    type Response;
    type Future: Future<Output = Result<Response<Self::Response>, Status>> + Send;

    fn call(&mut self, request: Request<R>) -> Self::Future;
}

pub trait ServerStreamingService<R>: Send {
    type Response;
    type ResponseStream: Stream<Item = Result<Self::Response, Status>> + Send + 'static;
    type Future: Future<Output = Result<Response<Self::ResponseStream>, Status>> + Send;

    fn call(&mut self, request: Request<R>) -> Self::Future;
}

pub trait ClientStreamingService<R>: Send {
    type Response;
    type Future: Future<Output = Result<Response<Self::Response>, Status>> + Send;

    fn call(&mut self, request: Request<Streaming<R>>) -> Self::Future;
}

pub trait StreamingService<R>: Send {
    type Response;
    type ResponseStream: Stream<Item = Result<Self::Response, Status>> + Send + 'static;
    type Future: Future<Output = Result<Response<Self::ResponseStream>, Status>> + Send;

    fn call(&mut self, request: Request<Streaming<R>>) -> Self::Future;
}

/// A boxed, type-erased response stream, used once a handler's concrete
/// stream type has been hidden behind the dispatcher (§L5).
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;
