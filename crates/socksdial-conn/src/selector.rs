//! Choosing which proxies to try for a given endpoint.

use crate::endpoint::{Endpoint, ProxyCandidate};
use crate::Error;

use tracing::warn;

/// One way to reach an endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum ProxyChoice {
    /// Connect straight to the endpoint.
    Direct,
    /// Connect through a SOCKS proxy.
    Socks(ProxyCandidate),
}

/// A source of proxy candidates.
///
/// The coordinator asks for candidates once per connect, tries them in
/// order, and reports every candidate that failed.
pub trait ProxySelector: Send + Sync {
    /// Return the ways to reach `target`, best first.
    ///
    /// An empty list, or one that starts with [`ProxyChoice::Direct`],
    /// means "connect directly".
    fn select(&self, target: &Endpoint) -> Vec<ProxyChoice>;

    /// Note that `candidate` failed to reach `target` with `err`.
    fn notify_failure(&self, target: &Endpoint, candidate: &ProxyCandidate, err: &Error);
}

/// A [`ProxySelector`] that offers the same list for every endpoint.
#[derive(Clone, Debug, Default)]
pub struct StaticSelector {
    /// The choices, in order.
    choices: Vec<ProxyChoice>,
}

impl StaticSelector {
    /// Return a selector that always offers `choices`.
    pub fn new(choices: Vec<ProxyChoice>) -> Self {
        StaticSelector { choices }
    }

    /// Return a selector that tries each of `candidates` in order.
    pub fn from_candidates<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = ProxyCandidate>,
    {
        Self::new(candidates.into_iter().map(ProxyChoice::Socks).collect())
    }
}

impl ProxySelector for StaticSelector {
    fn select(&self, _target: &Endpoint) -> Vec<ProxyChoice> {
        self.choices.clone()
    }

    fn notify_failure(&self, target: &Endpoint, candidate: &ProxyCandidate, err: &Error) {
        warn!("Unable to reach {} through {}: {}", target, candidate, err);
    }
}
