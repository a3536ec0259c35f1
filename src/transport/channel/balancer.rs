//! Load-balancing strategies over a channel's ready subchannel set (§4.9).

use std::sync::atomic::{AtomicUsize, Ordering};

/// How a [`super::Channel`] picks among its ready subchannels.
///
/// `Claim` is handled separately by `Channel::pick` (it needs exclusive
/// lease bookkeeping the other strategies don't), so it isn't a variant
/// [`Balancer::pick`] dispatches on directly — callers route `Strategy::Claim`
/// around this type entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    Random,
    Hash,
    Direct,
    Claim,
}

/// Stateful picker for the non-`Claim` strategies. Round robin needs a
/// cursor; the others are pure functions of the ready set.
pub struct Balancer {
    strategy: Strategy,
    cursor: AtomicUsize,
}

impl Balancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Picks one element of `ready` per this balancer's strategy. `hash_key`
    /// is required (and only used) by [`Strategy::Hash`]; callers of
    /// `Strategy::Direct`/`Claim` pass `None`.
    ///
    /// Returns `None` only when `ready` is empty — the caller maps that to
    /// `no_endpoints` (§4.9).
    pub fn pick<'a, T>(&self, ready: &'a [T], hash_key: Option<u64>) -> Option<&'a T> {
        if ready.is_empty() {
            return None;
        }

        let index = match self.strategy {
            Strategy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % ready.len(),
            Strategy::Random => rand::Rng::gen_range(&mut rand::thread_rng(), 0..ready.len()),
            Strategy::Hash => (hash_key.unwrap_or(0) as usize) % ready.len(),
            Strategy::Direct => 0,
            Strategy::Claim => {
                // Claim exclusivity is channel-level state this type doesn't
                // hold; Channel::pick never reaches here for Strategy::Claim.
                0
            }
        };

        ready.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_in_order() {
        let b = Balancer::new(Strategy::RoundRobin);
        let ready = vec!["a", "b", "c"];
        let picks: Vec<_> = (0..6).map(|_| *b.pick(&ready, None).unwrap()).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn direct_always_picks_first() {
        let b = Balancer::new(Strategy::Direct);
        let ready = vec!["only"];
        assert_eq!(*b.pick(&ready, None).unwrap(), "only");
    }

    #[test]
    fn hash_is_deterministic_for_same_key() {
        let b = Balancer::new(Strategy::Hash);
        let ready = vec![1, 2, 3, 4];
        let first = *b.pick(&ready, Some(7)).unwrap();
        let second = *b.pick(&ready, Some(7)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_ready_set_yields_none() {
        let b = Balancer::new(Strategy::RoundRobin);
        let ready: Vec<&str> = vec![];
        assert!(b.pick(&ready, None).is_none());
    }

    #[test]
    fn random_stays_within_bounds() {
        let b = Balancer::new(Strategy::Random);
        let ready = vec![0, 1, 2];
        for _ in 0..50 {
            let picked = *b.pick(&ready, None).unwrap();
            assert!(ready.contains(&picked));
        }
    }
}
