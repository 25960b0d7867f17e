//! Slave selection for read statements.

use crate::config::LoadBalanceMode;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks one slave out of a non-empty candidate list.
///
/// A strategy belongs to a master/slave data source and is shared by every
/// logical connection it hands out, so round-robin order spans connections.
#[derive(Debug)]
pub enum LoadBalanceStrategy {
    RoundRobin(AtomicUsize),
    Random,
}

impl LoadBalanceStrategy {
    pub fn new(mode: LoadBalanceMode) -> Self {
        match mode {
            LoadBalanceMode::RoundRobin => Self::RoundRobin(AtomicUsize::new(0)),
            LoadBalanceMode::Random => Self::Random,
        }
    }

    pub fn mode(&self) -> LoadBalanceMode {
        match self {
            Self::RoundRobin(_) => LoadBalanceMode::RoundRobin,
            Self::Random => LoadBalanceMode::Random,
        }
    }

    /// Pick a candidate. Returns None only for an empty list.
    pub fn pick<'a, T>(&self, candidates: &'a [T]) -> Option<&'a T> {
        if candidates.is_empty() {
            return None;
        }
        let index = match self {
            Self::RoundRobin(next) => next.fetch_add(1, Ordering::Relaxed) % candidates.len(),
            Self::Random => rand::thread_rng().gen_range(0..candidates.len()),
        };
        candidates.get(index)
    }
}

impl Default for LoadBalanceStrategy {
    fn default() -> Self {
        Self::new(LoadBalanceMode::default())
    }
}
