//! A client channel: a [`Resolver`]-discovered set of [`Subchannel`]s picked
//! over by a [`Balancer`] (§4.9).

mod balancer;
mod endpoint;
mod resolver;
mod subchannel;

pub use self::balancer::{Balancer, Strategy};
pub use self::endpoint::Endpoint;
pub use self::resolver::{Resolver, StaticResolver};
pub use self::subchannel::{Subchannel, SubchannelState};

use self::resolver::diff_endpoints;
use crate::body::BoxBody;
use crate::transport::registry::NameRegistry;
use crate::Status;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::task::{Context as TaskContext, Poll};
use tower_service::Service;

fn channel_registry() -> &'static NameRegistry<Channel> {
    static REGISTRY: OnceLock<NameRegistry<Channel>> = OnceLock::new();
    REGISTRY.get_or_init(NameRegistry::default)
}

/// Knobs for [`Channel::balance_with`] that aren't part of picking a
/// [`Strategy`]: whether the channel registers itself under a process-wide
/// name, and whether construction waits for its subchannels to come up.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    /// Registers the channel under this name in the process-wide registry
    /// once built, so [`Channel::lookup`] can find it elsewhere without the
    /// caller threading an `Arc<Channel>` through its own state.
    pub name: Option<String>,
    /// Dials every resolved endpoint once before `balance_with` returns,
    /// rather than discovering readiness lazily on the first call. A
    /// channel built this way already has its ready set populated (modulo
    /// genuinely unreachable endpoints) by the time it's handed to a caller.
    pub sync_start: bool,
}

/// A handle to a gRPC backend: resolves a target to one or more endpoints,
/// keeps one [`Subchannel`] per endpoint alive, and picks among the ready
/// ones per its [`Strategy`] (§4.9).
///
/// `Channel` itself implements [`tower_service::Service`], so
/// `client::Grpc::new(channel, origin)` drives calls directly over it.
pub struct Channel {
    name: Option<String>,
    sync_start: bool,
    balancer: Balancer,
    subchannels: StdMutex<Vec<Arc<Subchannel>>>,
    claimed: Arc<StdMutex<Option<Arc<Subchannel>>>>,
}

impl Channel {
    /// Resolves `target` once via `resolver` and starts a subchannel per
    /// endpoint, balanced with `strategy`.
    pub async fn balance(strategy: Strategy, resolver: &dyn Resolver, target: &str) -> Self {
        Self::balance_with(strategy, resolver, target, ChannelOptions::default()).await
    }

    /// As [`Channel::balance`], with a name to register under and/or
    /// `sync_start` enabled (§4.9).
    pub async fn balance_with(strategy: Strategy, resolver: &dyn Resolver, target: &str, options: ChannelOptions) -> Self {
        let endpoints = resolver.resolve(target);
        let subchannels: Vec<Arc<Subchannel>> = endpoints
            .into_iter()
            .map(|endpoint| Arc::new(Subchannel::new(endpoint)))
            .collect();

        if options.sync_start {
            for subchannel in &subchannels {
                subchannel.dial().await;
            }
        }

        Self {
            name: options.name,
            sync_start: options.sync_start,
            balancer: Balancer::new(strategy),
            subchannels: StdMutex::new(subchannels),
            claimed: Arc::new(StdMutex::new(None)),
        }
    }

    /// A channel over a single fixed endpoint, the common case of dialing
    /// one known address directly.
    pub async fn connect(uri: http::Uri) -> Self {
        let resolver = StaticResolver::new(vec![Endpoint::new(uri)]);
        Self::balance(Strategy::Direct, &resolver, "").await
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn sync_start(&self) -> bool {
        self.sync_start
    }

    /// Registers `self` under its configured name in the process-wide
    /// registry and returns a shared handle, so callers elsewhere in the
    /// process can find it again with [`Channel::lookup`] instead of
    /// passing the `Arc` around by hand. A no-op registration (the `Arc` is
    /// still returned) if no name was configured.
    pub fn into_shared(self) -> Arc<Self> {
        let channel = Arc::new(self);
        if let Some(name) = channel.name.clone() {
            channel_registry().register(name, channel.clone());
        }
        channel
    }

    /// Looks up a channel previously published via [`Channel::into_shared`].
    pub fn lookup(name: &str) -> Option<Arc<Channel>> {
        channel_registry().lookup(name)
    }

    /// Re-resolves `target` and starts/stops subchannels for the endpoints
    /// that were added/removed, leaving unchanged endpoints' connections
    /// alone (§4.9).
    pub fn refresh(&self, resolver: &dyn Resolver, target: &str) {
        let resolved = resolver.resolve(target);
        let mut subchannels = self.subchannels.lock().unwrap();
        let current: Vec<Endpoint> = subchannels.iter().map(|s| s.endpoint().clone()).collect();
        let (added, removed) = diff_endpoints(&current, &resolved);

        subchannels.retain(|s| !removed.contains(s.endpoint()));
        subchannels.extend(added.into_iter().map(|endpoint| Arc::new(Subchannel::new(endpoint))));
    }

    pub fn is_ready(&self) -> bool {
        self.subchannels.lock().unwrap().iter().any(|s| s.is_ready())
    }

    fn ready_subchannels(&self) -> Vec<Arc<Subchannel>> {
        self.subchannels
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_ready())
            .cloned()
            .collect()
    }

    /// Picks a subchannel to carry the next call, per the channel's
    /// strategy (§4.9). `hash_key` is only consulted for
    /// [`Strategy::Hash`].
    ///
    /// For [`Strategy::Claim`], the first caller to pick a ready subchannel
    /// holds it exclusively until [`Channel::release_claim`]; any other
    /// concurrent call returns `None` ("no_endpoints" in §4.9's terms), even
    /// if other subchannels are ready.
    pub fn pick(&self, hash_key: Option<u64>) -> Option<Arc<Subchannel>> {
        if self.balancer.strategy() == Strategy::Claim {
            return self.pick_claim();
        }
        let ready = self.ready_subchannels();
        self.balancer.pick(&ready, hash_key).cloned()
    }

    fn pick_claim(&self) -> Option<Arc<Subchannel>> {
        let mut claimed = self.claimed.lock().unwrap();
        if claimed.is_some() {
            return None;
        }
        let subchannel = self.ready_subchannels().into_iter().next()?;
        *claimed = Some(Arc::clone(&subchannel));
        Some(subchannel)
    }

    /// Releases a held [`Strategy::Claim`] lease, making the channel
    /// available to the next caller's pick. A no-op under any other
    /// strategy.
    pub fn release_claim(&self) {
        *self.claimed.lock().unwrap() = None;
    }

    pub fn stop(&self) {
        self.subchannels.lock().unwrap().clear();
    }
}

impl Service<http::Request<BoxBody>> for Channel {
    type Response = http::Response<BoxBody>;
    type Error = Status;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        if self.is_ready() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    fn call(&mut self, request: http::Request<BoxBody>) -> Self::Future {
        let picked = self.pick(None);
        Box::pin(async move {
            let subchannel = picked.ok_or_else(|| Status::unavailable("no_endpoints: no ready subchannel for this channel"))?;
            subchannel.call(request).await
        })
    }
}

/// Picks a subchannel on a channel published in the process-wide registry
/// by name (§4.9), the lookup path used by a caller that only has a name,
/// not a live `Channel` handle.
///
/// Distinguishes two failure modes a caller needs to tell apart: no channel
/// was ever registered under `name` (`undefined_channel`, a configuration
/// bug) versus a registered channel with no ready subchannel right now
/// (`no_endpoints`, a transient condition worth retrying).
pub fn pick_named(name: &str, hash_key: Option<u64>) -> Result<Arc<Subchannel>, Status> {
    let channel = Channel::lookup(name).ok_or_else(|| Status::not_found(format!("undefined_channel: no channel registered as {name:?}")))?;
    channel
        .pick(hash_key)
        .ok_or_else(|| Status::unavailable(format!("no_endpoints: channel {name:?} has no ready subchannel")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(authority: &str) -> Endpoint {
        Endpoint::new(format!("http://{authority}").parse().unwrap())
    }

    /// `Subchannel::new` starts a subchannel idle/not-ready (no real dial
    /// happens in these tests), so tests that need a ready pick mark their
    /// subchannels up directly through the same-module private field.
    fn mark_all_up(channel: &Channel) {
        for subchannel in channel.subchannels.lock().unwrap().iter() {
            subchannel.mark_up();
        }
    }

    #[tokio::test]
    async fn claim_strategy_grants_one_lease_at_a_time() {
        let resolver = StaticResolver::new(vec![ep("a:1"), ep("b:1")]);
        let channel = Channel::balance(Strategy::Claim, &resolver, "ignored").await;
        mark_all_up(&channel);

        let first = channel.pick(None);
        assert!(first.is_some());
        assert!(channel.pick(None).is_none());

        channel.release_claim();
        assert!(channel.pick(None).is_some());
    }

    #[tokio::test]
    async fn round_robin_strategy_does_not_need_a_claim() {
        let resolver = StaticResolver::new(vec![ep("a:1"), ep("b:1")]);
        let channel = Channel::balance(Strategy::RoundRobin, &resolver, "ignored").await;
        mark_all_up(&channel);

        assert!(channel.pick(None).is_some());
        assert!(channel.pick(None).is_some());
    }

    #[tokio::test]
    async fn refresh_adds_and_removes_subchannels() {
        let initial = StaticResolver::new(vec![ep("a:1")]);
        let channel = Channel::balance(Strategy::RoundRobin, &initial, "ignored").await;
        assert_eq!(channel.subchannels.lock().unwrap().len(), 1);

        let updated = StaticResolver::new(vec![ep("b:1"), ep("c:1")]);
        channel.refresh(&updated, "ignored");

        let endpoints: Vec<_> = channel
            .subchannels
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.endpoint().clone())
            .collect();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.contains(&ep("b:1")));
        assert!(endpoints.contains(&ep("c:1")));
    }

    #[tokio::test]
    async fn sync_start_dials_every_endpoint_before_returning() {
        // Unreachable addresses: `dial` fails but the subchannel still ends
        // up in a known (down, not idle) state rather than never having
        // tried.
        let resolver = StaticResolver::new(vec![ep("192.0.2.1:1"), ep("192.0.2.1:2")]);
        let channel = Channel::balance_with(
            Strategy::RoundRobin,
            &resolver,
            "ignored",
            ChannelOptions {
                name: None,
                sync_start: true,
            },
        )
        .await;

        for subchannel in channel.subchannels.lock().unwrap().iter() {
            assert_ne!(subchannel.state(), SubchannelState::Idle);
        }
    }

    #[tokio::test]
    async fn named_channel_is_found_by_lookup_after_into_shared() {
        let resolver = StaticResolver::new(vec![ep("a:1")]);
        let name = "named-channel-lookup-test";
        let channel = Channel::balance_with(
            Strategy::RoundRobin,
            &resolver,
            "ignored",
            ChannelOptions {
                name: Some(name.to_string()),
                sync_start: false,
            },
        )
        .await
        .into_shared();

        assert!(Arc::ptr_eq(&channel, &Channel::lookup(name).unwrap()));
    }

    #[tokio::test]
    async fn pick_named_reports_undefined_channel_distinct_from_no_endpoints() {
        let missing = pick_named("no-such-channel-was-ever-registered", None).unwrap_err();
        assert_eq!(missing.code(), crate::Code::NotFound);
        assert!(missing.message().contains("undefined_channel"));

        let resolver = StaticResolver::new(vec![ep("a:1")]);
        let name = "pick-named-empty-channel-test";
        let _channel = Channel::balance_with(
            Strategy::RoundRobin,
            &resolver,
            "ignored",
            ChannelOptions {
                name: Some(name.to_string()),
                sync_start: false,
            },
        )
        .await
        .into_shared();

        let empty = pick_named(name, None).unwrap_err();
        assert_eq!(empty.code(), crate::Code::Unavailable);
        assert!(empty.message().contains("no_endpoints"));
    }
}
