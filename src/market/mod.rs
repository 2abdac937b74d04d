use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use crate::core::PricePoint;

/// Default market-data provider host (Yahoo Finance v7 CSV download API).
pub const DEFAULT_PROVIDER_BASE: &str = "https://query1.finance.yahoo.com";

/// Sampling interval of the requested price history.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Interval {
    Daily,
    Weekly,
    #[default]
    Monthly,
}

impl Interval {
    pub fn provider_code(self) -> &'static str {
        match self {
            Interval::Daily => "1d",
            Interval::Weekly => "1wk",
            Interval::Monthly => "1mo",
        }
    }

    /// Parses the provider's interval code as it appears in query strings.
    pub fn from_provider_code(code: &str) -> Option<Self> {
        match code {
            "1d" => Some(Interval::Daily),
            "1wk" => Some(Interval::Weekly),
            "1mo" => Some(Interval::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("market data request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("market data provider returned HTTP {status} for {ticker}")]
    Status { ticker: String, status: u16 },
    #[error("malformed market data response: {0}")]
    Malformed(String),
    #[error("no usable price rows for {ticker} between {start} and {end}")]
    EmptySeries {
        ticker: String,
        start: NaiveDate,
        end: NaiveDate,
    },
}

/// Thin client for the provider's historical-price CSV endpoint.
#[derive(Clone)]
pub struct MarketClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for MarketClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_PROVIDER_BASE)
    }

    /// Points the client at a different host, used by tests and by
    /// deployments that sit behind an internal mirror of the provider.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn history_url(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> String {
        format!(
            "{}/v7/finance/download/{}?period1={}&period2={}&interval={}&events=history&includeAdjustedClose=true",
            self.base_url,
            ticker,
            unix_day_start(start),
            unix_day_start(end),
            interval.provider_code(),
        )
    }

    /// Fetches the provider's response body verbatim, for CSV passthrough.
    pub async fn fetch_history_csv(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<String, MarketError> {
        let url = self.history_url(ticker, start, end, interval);
        debug!("fetching price history from {url}");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MarketError::Status {
                ticker: ticker.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    /// Fetches and parses a closing-price series, failing on an empty
    /// result so downstream computation never sees a silent partial series.
    pub async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<Vec<PricePoint>, MarketError> {
        let csv = self.fetch_history_csv(ticker, start, end, interval).await?;
        let points = parse_history_csv(&csv)?;
        if points.is_empty() {
            return Err(MarketError::EmptySeries {
                ticker: ticker.to_string(),
                start,
                end,
            });
        }
        Ok(points)
    }
}

fn unix_day_start(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
        .timestamp()
}

/// Parses the provider's history CSV into a chronological price series.
///
/// The `Close` column is located from the header row, falling back to
/// `Adj Close`. Rows with a `null` or empty close are skipped (the provider
/// emits those for sessions without data). Duplicate dates violate the
/// series invariant and are treated as malformed input.
pub fn parse_history_csv(csv: &str) -> Result<Vec<PricePoint>, MarketError> {
    let mut lines = csv.lines().filter(|line| !line.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| MarketError::Malformed("empty response body".to_string()))?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();

    let date_idx = columns
        .iter()
        .position(|c| *c == "Date")
        .ok_or_else(|| MarketError::Malformed("header is missing a Date column".to_string()))?;
    let close_idx = columns
        .iter()
        .position(|c| *c == "Close")
        .or_else(|| columns.iter().position(|c| *c == "Adj Close"))
        .ok_or_else(|| MarketError::Malformed("header is missing a Close column".to_string()))?;

    let mut points = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() <= date_idx.max(close_idx) {
            return Err(MarketError::Malformed(format!(
                "row has {} fields, expected at least {}",
                fields.len(),
                date_idx.max(close_idx) + 1
            )));
        }

        let close_raw = fields[close_idx];
        if close_raw.is_empty() || close_raw.eq_ignore_ascii_case("null") {
            continue;
        }

        let date = NaiveDate::parse_from_str(fields[date_idx], "%Y-%m-%d").map_err(|e| {
            MarketError::Malformed(format!("bad date {:?}: {e}", fields[date_idx]))
        })?;
        let close: f64 = close_raw
            .parse()
            .map_err(|e| MarketError::Malformed(format!("bad close {close_raw:?}: {e}")))?;
        if !close.is_finite() || close <= 0.0 {
            continue;
        }

        points.push(PricePoint { date, close });
    }

    points.sort_by_key(|p| p.date);
    for pair in points.windows(2) {
        if pair[0].date == pair[1].date {
            return Err(MarketError::Malformed(format!(
                "duplicate date {}",
                pair[0].date
            )));
        }
    }

    Ok(points)
}
