//! Applies a `grpc-timeout` header (possibly shortened by a server-side
//! default) as an actual deadline on the underlying connection's response
//! future (§4.3, §4.10).

use crate::{metadata::GRPC_TIMEOUT_HEADER, transport::TimeoutExpired};
use http::{HeaderMap, HeaderValue, Request};
use pin_project::pin_project;
use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Duration,
};
use tokio::time::Sleep;
use tower_service::Service;

#[derive(Debug, Clone)]
pub(crate) struct GrpcTimeout<S> {
    inner: S,
    server_timeout: Option<Duration>,
}

impl<S> GrpcTimeout<S> {
    pub(crate) fn new(inner: S, server_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            server_timeout,
        }
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for GrpcTimeout<S>
where
    S: Service<Request<ReqBody>>,
    S::Error: Into<crate::BoxError>,
{
    type Response = S::Response;
    type Error = crate::BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let client_timeout = parse_grpc_timeout(req.headers()).unwrap_or_else(|e| {
            tracing::trace!("error parsing grpc-timeout header {:?}", e);
            None
        });

        let timeout_duration = match (client_timeout, self.server_timeout) {
            (None, None) => None,
            (Some(dur), None) => Some(dur),
            (None, Some(dur)) => Some(dur),
            (Some(header), Some(server)) => Some(std::cmp::min(header, server)),
        };

        ResponseFuture {
            inner: self.inner.call(req),
            sleep: timeout_duration.map(tokio::time::sleep),
        }
    }
}

#[pin_project]
pub(crate) struct ResponseFuture<F> {
    #[pin]
    inner: F,
    #[pin]
    sleep: Option<Sleep>,
}

impl<F, Res, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Res, E>>,
    E: Into<crate::BoxError>,
{
    type Output = Result<Res, crate::BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let ready @ Poll::Ready(_) = this.inner.poll(cx) {
            return ready.map_err(Into::into);
        }

        match this.sleep.as_pin_mut() {
            Some(sleep) => {
                ready!(sleep.poll(cx));
                Poll::Ready(Err(TimeoutExpired(()).into()))
            }
            None => Poll::Pending,
        }
    }
}

const SECONDS_IN_HOUR: u64 = 60 * 60;
const SECONDS_IN_MINUTE: u64 = 60;

/// Parses a `grpc-timeout` header per the gRPC-over-HTTP/2 wire protocol:
/// up to 8 digits followed by a single-character unit (H/M/S/m/u/n). Returns
/// the offending `HeaderValue` on any parse failure so the caller can log it.
pub(crate) fn parse_grpc_timeout(
    headers: &HeaderMap<HeaderValue>,
) -> Result<Option<Duration>, &HeaderValue> {
    let Some(val) = headers.get(GRPC_TIMEOUT_HEADER) else {
        return Ok(None);
    };

    let (timeout_value, timeout_unit) = val
        .to_str()
        .map_err(|_| val)
        .and_then(|s| if s.is_empty() { Err(val) } else { Ok(s) })?
        .split_at(val.len() - 1);

    // gRPC spec caps TimeoutValue at 8 digits; this also prevents overflow.
    if timeout_value.len() > 8 {
        return Err(val);
    }

    let timeout_value: u64 = timeout_value.parse().map_err(|_| val)?;

    let duration = match timeout_unit {
        "H" => Duration::from_secs(timeout_value * SECONDS_IN_HOUR),
        "M" => Duration::from_secs(timeout_value * SECONDS_IN_MINUTE),
        "S" => Duration::from_secs(timeout_value),
        "m" => Duration::from_millis(timeout_value),
        "u" => Duration::from_micros(timeout_value),
        "n" => Duration::from_nanos(timeout_value),
        _ => return Err(val),
    };

    Ok(Some(duration))
}

/// The inverse of [`parse_grpc_timeout`]: renders a deadline as a
/// `grpc-timeout` header value, always in milliseconds and never more than
/// the wire format's 8 decimal digits (§4.3). A deadline long enough to
/// overflow that is clamped to the largest representable value rather than
/// sent malformed.
pub(crate) fn encode_grpc_timeout(timeout: Duration) -> HeaderValue {
    const MAX_DIGITS: u64 = 99_999_999;
    let millis = timeout.as_millis().min(MAX_DIGITS as u128) as u64;
    HeaderValue::from_str(&format!("{millis}m")).expect("digits followed by 'm' is always a valid header value")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn setup_map_try_parse(val: Option<&str>) -> Result<Option<Duration>, HeaderValue> {
        let mut hm = HeaderMap::new();
        if let Some(v) = val {
            hm.insert(GRPC_TIMEOUT_HEADER, HeaderValue::from_str(v).unwrap());
        };
        parse_grpc_timeout(&hm).map_err(|e| e.clone())
    }

    #[test]
    fn test_hours() {
        assert_eq!(
            setup_map_try_parse(Some("3H")).unwrap().unwrap(),
            Duration::from_secs(3 * 60 * 60)
        );
    }

    #[test]
    fn test_minutes() {
        assert_eq!(
            setup_map_try_parse(Some("1M")).unwrap().unwrap(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_seconds() {
        assert_eq!(
            setup_map_try_parse(Some("42S")).unwrap().unwrap(),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn test_milliseconds() {
        assert_eq!(
            setup_map_try_parse(Some("13m")).unwrap().unwrap(),
            Duration::from_millis(13)
        );
    }

    #[test]
    fn test_microseconds() {
        assert_eq!(
            setup_map_try_parse(Some("2u")).unwrap().unwrap(),
            Duration::from_micros(2)
        );
    }

    #[test]
    fn test_nanoseconds() {
        assert_eq!(
            setup_map_try_parse(Some("82n")).unwrap().unwrap(),
            Duration::from_nanos(82)
        );
    }

    #[test]
    fn test_header_not_present() {
        assert!(setup_map_try_parse(None).unwrap().is_none());
    }

    #[test]
    #[should_panic(expected = "82f")]
    fn test_invalid_unit() {
        setup_map_try_parse(Some("82f")).unwrap().unwrap();
    }

    #[test]
    #[should_panic(expected = "123456789H")]
    fn test_too_many_digits() {
        setup_map_try_parse(Some("123456789H")).unwrap().unwrap();
    }

    #[test]
    #[should_panic(expected = "oneH")]
    fn test_invalid_digits() {
        setup_map_try_parse(Some("oneH")).unwrap().unwrap();
    }

    #[quickcheck]
    fn fuzz(header_value: HeaderValueGen) -> bool {
        let _ = setup_map_try_parse(Some(&header_value.0));
        true
    }

    #[derive(Clone, Debug)]
    struct HeaderValueGen(String);

    impl Arbitrary for HeaderValueGen {
        fn arbitrary(g: &mut Gen) -> Self {
            let max = g.choose(&(1..70).collect::<Vec<_>>()).copied().unwrap();
            Self(gen_string(g, 0, max))
        }
    }

    fn gen_string(g: &mut Gen, min: usize, max: usize) -> String {
        let bytes: Vec<_> = (min..max)
            .map(|_| {
                *g.choose(b"ABCDEFGHIJKLMNOPQRSTUVabcdefghilpqrstuvwxyz----")
                    .unwrap()
            })
            .collect();
        String::from_utf8(bytes).unwrap()
    }
}
