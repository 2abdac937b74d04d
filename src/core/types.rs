use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// One closing-price observation from the market-data provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Split of the period-over-period price changes into a constant planned
/// component and per-period residuals.
///
/// `unexpected` has one entry per period. Entry 0 is `-planned`, so the
/// implied change for the first period (which has no prior price) is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub planned: f64,
    pub unexpected: Vec<f64>,
}

/// A period whose unexpected component cleared the annotation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Spike {
    pub index: usize,
    pub date: NaiveDate,
    pub unexpected: f64,
}

/// Full pipeline output: the actual series next to both reconstructed
/// paths, plus the decomposition stats and flagged spikes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub dates: Vec<NaiveDate>,
    pub actual: Vec<f64>,
    pub deterministic: Vec<f64>,
    pub stochastic: Vec<f64>,
    pub planned_change: f64,
    pub unexpected_std_dev: f64,
    pub spike_threshold: f64,
    pub spikes: Vec<Spike>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("price series must contain at least 2 points, got {0}")]
    SeriesTooShort(usize),
    #[error("price series contains a non-finite close at index {0}")]
    NonFiniteClose(usize),
}
