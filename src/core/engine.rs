use std::f64::consts::PI;

use super::types::{Analysis, AnalysisError, Decomposition, PricePoint, Spike};

/// Multiple of the residual standard deviation past which a period is
/// annotated as a spike.
pub const SPIKE_SIGMA_MULTIPLE: f64 = 1.5;

/// Splits a closing-price series into a constant planned change and a
/// per-period unexpected residual.
///
/// The first difference is defined as zero (no prior period). The planned
/// component is the mean of the remaining n-1 real differences, so the
/// residuals over periods 1..n sum to zero.
pub fn decompose(closes: &[f64]) -> Result<Decomposition, AnalysisError> {
    if closes.len() < 2 {
        return Err(AnalysisError::SeriesTooShort(closes.len()));
    }
    if let Some(idx) = closes.iter().position(|c| !c.is_finite()) {
        return Err(AnalysisError::NonFiniteClose(idx));
    }

    let mut diffs = Vec::with_capacity(closes.len());
    diffs.push(0.0);
    for pair in closes.windows(2) {
        diffs.push(pair[1] - pair[0]);
    }

    let planned = mean(&diffs[1..]);
    let unexpected = diffs.iter().map(|d| d - planned).collect();

    Ok(Decomposition { planned, unexpected })
}

/// Replays the planned + unexpected increments from the initial price.
///
/// With the historical residuals from [`decompose`] this reproduces the
/// original series exactly; it is an identity, not an approximation.
pub fn replay_deterministic(s0: f64, planned: f64, unexpected: &[f64]) -> Vec<f64> {
    let mut path = Vec::with_capacity(unexpected.len());
    if unexpected.is_empty() {
        return path;
    }
    path.push(s0);
    for t in 1..unexpected.len() {
        let prev = path[t - 1];
        path.push(prev + planned + unexpected[t]);
    }
    path
}

/// Builds an alternative path where each unexpected increment is replaced
/// by an independent draw from N(0, sigma) taken from the supplied source.
///
/// The random source is passed in explicitly: the same seed and sigma
/// always reproduce the same path, and independent simulations can run in
/// the same process without sharing state.
pub fn simulate_stochastic(
    s0: f64,
    planned: f64,
    sigma: f64,
    periods: usize,
    rng: &mut Rng,
) -> Vec<f64> {
    let mut path = Vec::with_capacity(periods);
    if periods == 0 {
        return path;
    }
    path.push(s0);
    for t in 1..periods {
        let shock = sigma * rng.standard_normal();
        path.push(path[t - 1] + planned + shock);
    }
    path
}

/// Flags every period whose unexpected component is at least
/// `SPIKE_SIGMA_MULTIPLE` residual standard deviations in magnitude.
pub fn detect_spikes(points: &[PricePoint], unexpected: &[f64], sigma: f64) -> Vec<Spike> {
    let threshold = SPIKE_SIGMA_MULTIPLE * sigma;
    points
        .iter()
        .zip(unexpected)
        .enumerate()
        .filter(|(_, (_, u))| u.abs() >= threshold)
        .map(|(index, (point, u))| Spike {
            index,
            date: point.date,
            unexpected: *u,
        })
        .collect()
}

/// Runs the full fetch-free pipeline: decompose, replay, simulate, flag.
pub fn analyze(points: &[PricePoint], seed: u64) -> Result<Analysis, AnalysisError> {
    let actual: Vec<f64> = points.iter().map(|p| p.close).collect();
    let decomposition = decompose(&actual)?;
    let sigma = std_dev(&decomposition.unexpected);

    let deterministic =
        replay_deterministic(actual[0], decomposition.planned, &decomposition.unexpected);

    let mut rng = Rng::new(splitmix64(seed));
    let stochastic =
        simulate_stochastic(actual[0], decomposition.planned, sigma, actual.len(), &mut rng);

    let spikes = detect_spikes(points, &decomposition.unexpected, sigma);

    Ok(Analysis {
        dates: points.iter().map(|p| p.date).collect(),
        actual,
        deterministic,
        stochastic,
        planned_change: decomposition.planned,
        unexpected_std_dev: sigma,
        spike_threshold: SPIKE_SIGMA_MULTIPLE * sigma,
        spikes,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation about the sample mean.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Seeded xorshift64* generator with Box-Muller normal sampling.
pub struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    pub fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        let z0 = r * theta.cos();
        let z1 = r * theta.sin();
        self.cached_normal = Some(z1);
        z0
    }
}
