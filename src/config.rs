use serde::{Deserialize, Serialize};

/// How a cache hit is disguised on the wire. One policy holds for the whole
/// session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheHitPolicy {
    /// Send a real-shaped punctured query built from a throwaway hint.
    #[default]
    DummyQuery,
    /// Send an empty request. Cheaper, but distinguishable by size.
    EmptyRequest,
}

/// Client session knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub cache_hit_policy: CacheHitPolicy,
    /// Chunks requested per preprocessing round trip.
    pub preprocess_batch_chunks: u64,
    /// Seed for the session RNG; entropy when absent.
    pub rng_seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_hit_policy: CacheHitPolicy::default(),
            preprocess_batch_chunks: 16,
            rng_seed: None,
        }
    }
}

impl ClientConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_cache_hit_policy(mut self, policy: CacheHitPolicy) -> Self {
        self.cache_hit_policy = policy;
        self
    }

    pub fn with_batch_chunks(mut self, chunks: u64) -> Self {
        self.preprocess_batch_chunks = chunks;
        self
    }
}
