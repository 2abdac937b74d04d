mod engine;
mod types;

pub use engine::{
    SPIKE_SIGMA_MULTIPLE, Rng, analyze, decompose, detect_spikes, replay_deterministic,
    simulate_stochastic,
};
pub use types::{Analysis, AnalysisError, Decomposition, PricePoint, Spike};
