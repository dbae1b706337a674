//! Think-time between client operation cycles
//!
//! Each client that pauses between cycles owns one `WaitTime`, reseeded from
//! a per-client key once it has connected so that two clients never share a
//! random sequence.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};
use serde::Serialize;
use tracing::warn;

/// Delay distribution selected at config load
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitSpec {
    /// Uniformly distributed in `[min, max]`
    Uniform { min: Duration, max: Duration },
    /// Exponentially distributed with rate `lambda` per second
    Exponential { lambda: f64 },
    /// Always the same interval, possibly zero
    Fixed(Duration),
}

#[derive(Debug, Clone, Copy)]
enum Sampler {
    Uniform { min: Duration, max: Duration },
    Exponential(Exp<f64>),
    Fixed(Duration),
}

impl Sampler {
    fn from_spec(spec: WaitSpec) -> Self {
        match spec {
            WaitSpec::Uniform { min, max } => Sampler::Uniform { min, max },
            WaitSpec::Exponential { lambda } => match Exp::new(lambda) {
                Ok(exp) => Sampler::Exponential(exp),
                Err(e) => {
                    warn!("Exponential rate {} rejected ({}), not pausing", lambda, e);
                    Sampler::Fixed(Duration::ZERO)
                }
            },
            WaitSpec::Fixed(interval) => Sampler::Fixed(interval),
        }
    }
}

/// A seeded sampler for one client
#[derive(Debug, Clone)]
pub struct WaitTime {
    spec: WaitSpec,
    sampler: Sampler,
    rng: ChaCha8Rng,
}

impl WaitTime {
    pub fn new(spec: WaitSpec) -> Self {
        Self {
            spec,
            sampler: Sampler::from_spec(spec),
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }

    pub fn spec(&self) -> WaitSpec {
        self.spec
    }

    /// Reseed from a key combining the client identity and its connect time
    pub fn seed<K: Hash + ?Sized>(&mut self, key: &K) {
        self.rng = ChaCha8Rng::seed_from_u64(seed_from_key(key));
    }

    /// Draw the next delay
    pub fn next_delay(&mut self) -> Duration {
        match self.sampler {
            Sampler::Uniform { min, max } => {
                if max <= min {
                    min
                } else {
                    self.rng.random_range(min..=max)
                }
            }
            Sampler::Exponential(exp) => secs_or_max(exp.sample(&mut self.rng)),
            Sampler::Fixed(interval) => interval,
        }
    }

    /// Sleep for the next drawn delay
    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Hash any key into a 64-bit seed
pub fn seed_from_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn secs_or_max(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
