use crate::engine::EngineOptions;
use crate::score::Metric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The 4-dim / 8-slot dot-product engine used by most scenario tests.
pub fn tiny_dot_options() -> EngineOptions {
    init_tracing();
    EngineOptions {
        dim: 4,
        max_count: 8,
        max_neighbors: 4,
        max_layers: 3,
        metric: Metric::Dot,
    }
}

/// Dot-product engine with roomier graph parameters.
pub fn dot_options(dim: usize, max_count: usize) -> EngineOptions {
    init_tracing();
    EngineOptions {
        dim,
        max_count,
        max_neighbors: 8,
        max_layers: 4,
        metric: Metric::Dot,
    }
}

/// Cosine engine (vectors normalised on ingress and query).
pub fn cosine_options(dim: usize, max_count: usize) -> EngineOptions {
    init_tracing();
    EngineOptions {
        dim,
        max_count,
        max_neighbors: 8,
        max_layers: 4,
        metric: Metric::Cosine,
    }
}

/// Deterministic random corpus for recall and persistence tests.
pub fn seeded_vectors(seed: u64, n: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}
