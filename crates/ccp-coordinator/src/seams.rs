//! Capabilities the coordinator needs from its surroundings
//!
//! - [`NodeMessenger`]: fire-and-forget messages to node managers' receivers
//! - [`RandomSource`]: randomness for template draws and seed ordering

use ccp_model::NodeAddress;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Outgoing messages to cluster nodes
#[cfg_attr(test, mockall::automock)]
pub trait NodeMessenger: Send + Sync {
    /// Ask the node at `address` to report its description
    fn request_description(&self, address: &NodeAddress);

    /// Ask the node at `address` to shut down for an upgrade
    fn shutdown(&self, address: &NodeAddress);
}

/// Source of randomness, replaceable by deterministic sequences
#[cfg_attr(test, mockall::automock)]
pub trait RandomSource: Send + Sync {
    /// Uniform value in `[0, 1)`
    fn next_f64(&mut self) -> f64;

    fn shuffle(&mut self, items: &mut [String]);
}

/// [`RandomSource`] backed by a seeded standard generator
pub struct StdRandom {
    rng: StdRng,
}

impl StdRandom {
    /// Seeded from the operating system
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for StdRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for StdRandom {
    fn next_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    fn shuffle(&mut self, items: &mut [String]) {
        items.shuffle(&mut self.rng);
    }
}
