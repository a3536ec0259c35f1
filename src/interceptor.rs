//! The interceptor pipeline (§4.6): composes unary and streaming middleware
//! around a handler or, on the client side, around the call to the channel.

use crate::context::Context;
use crate::request::Request;
use crate::response::Response;
use crate::Status;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Information about the method being called, handed to interceptors so they
/// can make routing-aware decisions without parsing the path themselves.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub method: &'static str,
    pub is_client_streaming: bool,
    pub is_server_streaming: bool,
}

/// The continuation an interceptor invokes to proceed to the next
/// interceptor, or the handler if this is the innermost layer.
///
/// §4.6: "Interceptors MUST call `next` at most once."
pub struct Next<Req, Resp> {
    inner: Arc<dyn Fn(Context, Request<Req>) -> BoxFuture<'static, Result<(Context, Response<Resp>), Status>> + Send + Sync>,
}

impl<Req, Resp> Clone for Next<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req, Resp> Next<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn call(
        &self,
        ctx: Context,
        req: Request<Req>,
    ) -> BoxFuture<'static, Result<(Context, Response<Resp>), Status>> {
        (self.inner)(ctx, req)
    }
}

/// A unary interceptor: `(ctx, request, info, next) -> (ctx', response, status)`.
///
/// Implemented as a trait (rather than a bare closure type) so that stateful
/// interceptors — auth checks, metrics, logging — can carry fields.
pub trait UnaryInterceptor<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: Context,
        req: Request<Req>,
        info: &'a CallInfo,
        next: Next<Req, Resp>,
    ) -> BoxFuture<'a, Result<(Context, Response<Resp>), Status>>;
}

impl<Req, Resp, F> UnaryInterceptor<Req, Resp> for F
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: for<'a> Fn(
            Context,
            Request<Req>,
            &'a CallInfo,
            Next<Req, Resp>,
        ) -> BoxFuture<'a, Result<(Context, Response<Resp>), Status>>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        ctx: Context,
        req: Request<Req>,
        info: &'a CallInfo,
        next: Next<Req, Resp>,
    ) -> BoxFuture<'a, Result<(Context, Response<Resp>), Status>> {
        (self)(ctx, req, info, next)
    }
}

/// Folds a list of interceptors right-to-left so that earlier entries wrap
/// later ones (§4.6, invariant 5 in §8: the composition law).
pub fn chain_unary<Req, Resp>(
    interceptors: Vec<Arc<dyn UnaryInterceptor<Req, Resp>>>,
    info: CallInfo,
    handler: Arc<
        dyn Fn(Context, Request<Req>) -> BoxFuture<'static, Result<(Context, Response<Resp>), Status>>
            + Send
            + Sync,
    >,
) -> impl Fn(Context, Request<Req>) -> BoxFuture<'static, Result<(Context, Response<Resp>), Status>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let mut next = Next { inner: handler };

    for interceptor in interceptors.into_iter().rev() {
        let inner_next = next.clone();
        let interceptor = interceptor.clone();
        let info = info.clone();
        next = Next {
            inner: Arc::new(move |ctx, req| {
                let interceptor = interceptor.clone();
                let inner_next = inner_next.clone();
                let info = info.clone();
                Box::pin(async move {
                    // info must outlive the call; leak a clone onto the stack
                    // frame of this async block.
                    let info = info;
                    interceptor.call(ctx, req, &info, inner_next).await
                })
            }),
        };
    }

    move |ctx, req| next.call(ctx, req)
}

/// A streaming interceptor's capability surface (§9: "Normalize to... a
/// streaming capability `{new_stream, send_msg, recv_msg}`").
///
/// Implementations can wrap sends/receives (e.g. to count bytes for a stats
/// handler) or simply observe and pass through.
pub trait StreamingInterceptor: Send + Sync {
    /// Called once when a new stream begins, before any frames flow.
    fn new_stream(&self, _info: &CallInfo) {}

    /// Observes an outbound message just before it is framed and sent.
    fn send_msg(&self, _bytes_len: usize) {}

    /// Observes an inbound message just after it is decoded.
    fn recv_msg(&self, _bytes_len: usize) {}
}

/// The default no-op streaming interceptor.
#[derive(Default)]
pub struct NoopStreamingInterceptor;

impl StreamingInterceptor for NoopStreamingInterceptor {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler() -> Arc<
        dyn Fn(Context, Request<i32>) -> BoxFuture<'static, Result<(Context, Response<i32>), Status>>
            + Send
            + Sync,
    > {
        Arc::new(|ctx, req| Box::pin(async move { Ok((ctx, Response::new(*req.get_ref() + 1))) }))
    }

    struct Counting(Arc<AtomicUsize>);

    impl UnaryInterceptor<i32, i32> for Counting {
        fn call<'a>(
            &'a self,
            ctx: Context,
            req: Request<i32>,
            info: &'a CallInfo,
            next: Next<i32, i32>,
        ) -> BoxFuture<'a, Result<(Context, Response<i32>), Status>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let _ = info;
            Box::pin(next.call(ctx, req))
        }
    }

    #[tokio::test]
    async fn composition_wraps_left_to_right() {
        let order = Arc::new(AtomicUsize::new(0));
        let a = Arc::new(Counting(order.clone()));
        let b = Arc::new(Counting(order.clone()));
        let info = CallInfo {
            method: "/t/M",
            is_client_streaming: false,
            is_server_streaming: false,
        };
        let chained = chain_unary(vec![a, b], info, handler());
        let ctx = Context::root();
        let (_, resp) = chained(ctx, Request::new(41)).await.unwrap();
        assert_eq!(*resp.get_ref(), 42);
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }
}
