use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::core::{self, Analysis, Spike};
use crate::market::{Interval, MarketClient};

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

const DEFAULT_TICKER: &str = "AAPL";
const DEFAULT_START: &str = "2024-01-01";
const DEFAULT_END: &str = "2025-12-31";
const DEFAULT_SEED: u64 = 42;

#[derive(Clone)]
struct AppState {
    market: MarketClient,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiInterval {
    #[serde(alias = "1d")]
    Daily,
    #[serde(alias = "1wk")]
    Weekly,
    #[serde(alias = "1mo")]
    Monthly,
}

impl From<ApiInterval> for Interval {
    fn from(value: ApiInterval) -> Self {
        match value {
            ApiInterval::Daily => Interval::Daily,
            ApiInterval::Weekly => Interval::Weekly,
            ApiInterval::Monthly => Interval::Monthly,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AnalyzePayload {
    ticker: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    interval: Option<ApiInterval>,
    seed: Option<u64>,
}

#[derive(Debug)]
struct AnalyzeRequest {
    ticker: String,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
    seed: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StockQuery {
    ticker: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    interval: Option<String>,
}

#[derive(Debug)]
struct StockRequest {
    ticker: String,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    ticker: String,
    interval: &'static str,
    seed: u64,
    starting_price: f64,
    final_actual: f64,
    final_deterministic: f64,
    final_stochastic: f64,
    planned_change: f64,
    unexpected_std_dev: f64,
    spike_threshold: f64,
    dates: Vec<NaiveDate>,
    actual: Vec<f64>,
    deterministic: Vec<f64>,
    stochastic: Vec<f64>,
    spikes: Vec<Spike>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn normalize_ticker(raw: &str) -> Result<String, String> {
    let ticker = raw.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err("ticker must not be empty".to_string());
    }
    if !ticker
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='))
    {
        return Err(format!("ticker {ticker:?} contains unsupported characters"));
    }
    Ok(ticker)
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field} must be formatted YYYY-MM-DD"))
}

fn analyze_request_from_payload(payload: AnalyzePayload) -> Result<AnalyzeRequest, String> {
    let ticker = normalize_ticker(payload.ticker.as_deref().unwrap_or(DEFAULT_TICKER))?;
    let start = parse_date(
        payload.start_date.as_deref().unwrap_or(DEFAULT_START),
        "startDate",
    )?;
    let end = parse_date(payload.end_date.as_deref().unwrap_or(DEFAULT_END), "endDate")?;
    if end <= start {
        return Err("endDate must be after startDate".to_string());
    }

    Ok(AnalyzeRequest {
        ticker,
        start,
        end,
        interval: payload.interval.map(Into::into).unwrap_or_default(),
        seed: payload.seed.unwrap_or(DEFAULT_SEED),
    })
}

fn stock_request_from_query(query: StockQuery) -> Result<StockRequest, String> {
    let Some(ticker) = query.ticker else {
        return Err("missing required parameter: ticker".to_string());
    };
    let Some(start) = query.start_date else {
        return Err("missing required parameter: startDate".to_string());
    };
    let Some(end) = query.end_date else {
        return Err("missing required parameter: endDate".to_string());
    };

    let ticker = normalize_ticker(&ticker)?;
    let start = parse_date(&start, "startDate")?;
    let end = parse_date(&end, "endDate")?;
    if end <= start {
        return Err("endDate must be after startDate".to_string());
    }

    let interval = match query.interval.as_deref() {
        None | Some("") => Interval::Monthly,
        Some(code) => Interval::from_provider_code(code)
            .ok_or_else(|| format!("unsupported interval {code:?}"))?,
    };

    Ok(StockRequest {
        ticker,
        start,
        end,
        interval,
    })
}

fn build_analyze_response(request: &AnalyzeRequest, analysis: Analysis) -> AnalyzeResponse {
    let last = analysis.actual.len() - 1;
    AnalyzeResponse {
        ticker: request.ticker.clone(),
        interval: request.interval.provider_code(),
        seed: request.seed,
        starting_price: analysis.actual[0],
        final_actual: analysis.actual[last],
        final_deterministic: analysis.deterministic[last],
        final_stochastic: analysis.stochastic[last],
        planned_change: analysis.planned_change,
        unexpected_std_dev: analysis.unexpected_std_dev,
        spike_threshold: analysis.spike_threshold,
        dates: analysis.dates,
        actual: analysis.actual,
        deterministic: analysis.deterministic,
        stochastic: analysis.stochastic,
        spikes: analysis.spikes,
    }
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState {
        market: MarketClient::new(),
    });

    let listener = TcpListener::bind(addr).await?;
    info!("pricepath server listening on http://{addr}");
    info!("local access: http://127.0.0.1:{port}/");

    axum::serve(listener, app).await
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/styles.css", get(styles_handler))
        .route("/app.js", get(app_js_handler))
        .route("/api/stock", get(stock_handler))
        .route(
            "/api/analyze",
            get(analyze_get_handler).post(analyze_post_handler),
        )
        .fallback(static_file_handler)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn styles_handler() -> impl IntoResponse {
    with_cache_control((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLES_CSS,
    ))
}

async fn app_js_handler() -> impl IntoResponse {
    with_cache_control((
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        APP_JS,
    ))
}

async fn stock_handler(State(state): State<AppState>, Query(query): Query<StockQuery>) -> Response {
    let request = match stock_request_from_query(query) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match state
        .market
        .fetch_history_csv(&request.ticker, request.start, request.end, request.interval)
        .await
    {
        Ok(csv) => {
            with_cache_control(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv))
        }
        Err(err) => {
            error!("proxy fetch for {} failed: {err}", request.ticker);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

async fn analyze_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<AnalyzePayload>,
) -> Response {
    analyze_handler_impl(state, payload).await
}

async fn analyze_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzePayload>,
) -> Response {
    analyze_handler_impl(state, payload).await
}

async fn analyze_handler_impl(state: AppState, payload: AnalyzePayload) -> Response {
    let request = match analyze_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let points = match state
        .market
        .fetch_history(&request.ticker, request.start, request.end, request.interval)
        .await
    {
        Ok(points) => points,
        Err(err) => {
            error!("history fetch for {} failed: {err}", request.ticker);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
    };

    match core::analyze(&points, request.seed) {
        Ok(analysis) => json_response(StatusCode::OK, build_analyze_response(&request, analysis)),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn static_file_handler(uri: Uri) -> Response {
    let Some(path) = sanitize_static_path(uri.path()) else {
        return error_response(StatusCode::FORBIDDEN, "path traversal is not allowed");
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(&path))],
            bytes,
        )
            .into_response(),
        Err(_) => error_response(StatusCode::NOT_FOUND, "Not found"),
    }
}

/// Maps a request path to a file path relative to the working directory.
/// Returns `None` when any segment is a parent-directory traversal.
fn sanitize_static_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim_start_matches('/');
    if trimmed.split('/').any(|segment| segment == "..") {
        return None;
    }
    if trimmed.is_empty() {
        Some("index.html".to_string())
    } else {
        Some(trimmed.to_string())
    }
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("csv") => "text/csv; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PricePoint;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn analyze_payload_from_json(json: &str) -> Result<AnalyzeRequest, String> {
        let payload = serde_json::from_str::<AnalyzePayload>(json)
            .map_err(|e| format!("invalid payload: {e}"))?;
        analyze_request_from_payload(payload)
    }

    #[test]
    fn analyze_request_applies_defaults() {
        let request = analyze_request_from_payload(AnalyzePayload::default()).expect("defaults");

        assert_eq!(request.ticker, "AAPL");
        assert_eq!(request.start, date(2024, 1, 1));
        assert_eq!(request.end, date(2025, 12, 31));
        assert_eq!(request.interval, Interval::Monthly);
        assert_eq!(request.seed, 42);
    }

    #[test]
    fn analyze_request_parses_web_keys() {
        let request = analyze_payload_from_json(
            r#"{
              "ticker": "msft",
              "startDate": "2023-06-01",
              "endDate": "2024-06-01",
              "interval": "1wk",
              "seed": 7
            }"#,
        )
        .expect("json should parse");

        assert_eq!(request.ticker, "MSFT");
        assert_eq!(request.start, date(2023, 6, 1));
        assert_eq!(request.end, date(2024, 6, 1));
        assert_eq!(request.interval, Interval::Weekly);
        assert_eq!(request.seed, 7);
    }

    #[test]
    fn analyze_request_rejects_inverted_range() {
        let err = analyze_payload_from_json(
            r#"{"startDate": "2024-06-01", "endDate": "2024-01-01"}"#,
        )
        .expect_err("must reject");
        assert!(err.contains("endDate"));
    }

    #[test]
    fn analyze_request_rejects_bad_date() {
        let err = analyze_payload_from_json(r#"{"startDate": "01/06/2024"}"#)
            .expect_err("must reject");
        assert!(err.contains("startDate"));
    }

    #[test]
    fn stock_request_requires_all_parameters() {
        for (query, missing) in [
            (StockQuery::default(), "ticker"),
            (
                StockQuery {
                    ticker: Some("AAPL".to_string()),
                    ..StockQuery::default()
                },
                "startDate",
            ),
            (
                StockQuery {
                    ticker: Some("AAPL".to_string()),
                    start_date: Some("2024-01-01".to_string()),
                    ..StockQuery::default()
                },
                "endDate",
            ),
        ] {
            let err = stock_request_from_query(query).expect_err("must reject");
            assert!(err.contains(missing), "expected {missing} in {err:?}");
        }
    }

    #[test]
    fn stock_request_parses_full_query() {
        let request = stock_request_from_query(StockQuery {
            ticker: Some("brk.b".to_string()),
            start_date: Some("2024-01-01".to_string()),
            end_date: Some("2024-12-31".to_string()),
            interval: Some("1d".to_string()),
        })
        .expect("valid query");

        assert_eq!(request.ticker, "BRK.B");
        assert_eq!(request.interval, Interval::Daily);
    }

    #[test]
    fn stock_request_defaults_interval_to_monthly() {
        let request = stock_request_from_query(StockQuery {
            ticker: Some("AAPL".to_string()),
            start_date: Some("2024-01-01".to_string()),
            end_date: Some("2024-12-31".to_string()),
            interval: None,
        })
        .expect("valid query");
        assert_eq!(request.interval, Interval::Monthly);
    }

    #[test]
    fn stock_request_rejects_unknown_interval() {
        let err = stock_request_from_query(StockQuery {
            ticker: Some("AAPL".to_string()),
            start_date: Some("2024-01-01".to_string()),
            end_date: Some("2024-12-31".to_string()),
            interval: Some("5m".to_string()),
        })
        .expect_err("must reject");
        assert!(err.contains("interval"));
    }

    #[test]
    fn ticker_is_normalized_and_validated() {
        assert_eq!(normalize_ticker(" aapl "), Ok("AAPL".to_string()));
        assert_eq!(normalize_ticker("brk.b"), Ok("BRK.B".to_string()));
        assert!(normalize_ticker("").is_err());
        assert!(normalize_ticker("BAD TICKER").is_err());
        assert!(normalize_ticker("../secret").is_err());
    }

    #[test]
    fn static_paths_reject_traversal_segments() {
        assert_eq!(sanitize_static_path("/"), Some("index.html".to_string()));
        assert_eq!(
            sanitize_static_path("/css/site.css"),
            Some("css/site.css".to_string())
        );
        assert_eq!(sanitize_static_path("/../etc/passwd"), None);
        assert_eq!(sanitize_static_path("/a/../b"), None);
        // Dots inside a name are not traversal.
        assert_eq!(sanitize_static_path("/a..b"), Some("a..b".to_string()));
    }

    #[test]
    fn content_types_cover_the_bundled_assets() {
        assert_eq!(content_type_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("styles.css"), "text/css; charset=utf-8");
        assert_eq!(
            content_type_for("app.js"),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(content_type_for("data.bin"), "application/octet-stream");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
    }

    #[test]
    fn analyze_response_serializes_camel_case_fields() {
        let points: Vec<PricePoint> = [100.0, 102.0, 101.0, 105.0]
            .iter()
            .enumerate()
            .map(|(i, &close)| PricePoint {
                date: date(2024, 1 + i as u32, 1),
                close,
            })
            .collect();
        let request = analyze_request_from_payload(AnalyzePayload::default()).expect("defaults");
        let analysis = core::analyze(&points, request.seed).expect("valid series");

        let response = build_analyze_response(&request, analysis);
        let json = serde_json::to_string(&response).expect("response should serialize");

        assert!(json.contains("\"startingPrice\""));
        assert!(json.contains("\"plannedChange\""));
        assert!(json.contains("\"unexpectedStdDev\""));
        assert!(json.contains("\"spikeThreshold\""));
        assert!(json.contains("\"deterministic\""));
        assert!(json.contains("\"stochastic\""));
        assert!(json.contains("\"spikes\""));
        assert!(json.contains("\"finalActual\""));
    }
}
