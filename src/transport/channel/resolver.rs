//! Pluggable endpoint resolution (§4.9: "Resolver interface").

use super::Endpoint;
use std::time::Duration;

/// Resolves a channel's target name to a concrete set of endpoints.
///
/// The default, `Static`, is a pass-through over a fixed list supplied at
/// construction; a real implementation (DNS, a service mesh control plane)
/// plugs in here instead.
pub trait Resolver: Send + Sync {
    fn resolve(&self, target: &str) -> Vec<Endpoint>;

    /// How often the channel should call [`Resolver::resolve`] again to
    /// pick up changes. `None` means "resolve once at startup".
    fn refresh_interval(&self) -> Option<Duration> {
        None
    }
}

/// Always returns the same fixed endpoint list, regardless of `target`.
pub struct StaticResolver {
    endpoints: Vec<Endpoint>,
}

impl StaticResolver {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, _target: &str) -> Vec<Endpoint> {
        self.endpoints.clone()
    }
}

/// Computes which endpoints were added and which were removed between two
/// resolutions, so a channel can start subchannels for the former and stop
/// the latter without touching endpoints present in both (§4.9).
pub(crate) fn diff_endpoints(current: &[Endpoint], resolved: &[Endpoint]) -> (Vec<Endpoint>, Vec<Endpoint>) {
    let added = resolved
        .iter()
        .filter(|e| !current.contains(e))
        .cloned()
        .collect();
    let removed = current
        .iter()
        .filter(|e| !resolved.contains(e))
        .cloned()
        .collect();
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(authority: &str) -> Endpoint {
        Endpoint::new(format!("http://{authority}").parse().unwrap())
    }

    #[test]
    fn diff_reports_added_and_removed() {
        let current = vec![ep("a:1"), ep("b:1")];
        let resolved = vec![ep("b:1"), ep("c:1")];
        let (added, removed) = diff_endpoints(&current, &resolved);
        assert_eq!(added, vec![ep("c:1")]);
        assert_eq!(removed, vec![ep("a:1")]);
    }

    #[test]
    fn unchanged_set_diffs_to_empty() {
        let current = vec![ep("a:1")];
        let (added, removed) = diff_endpoints(&current, &current.clone());
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }
}
