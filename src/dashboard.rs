//! Impact HTTP routes: JSON series/table, multi-post overlay and an HTML
//! summary page.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::grid::{GridRequest, PriceGrid};
use crate::impact::{
    build_impact_series, build_percent_change_table, effective_anchor_minute, ImpactSeries,
    PercentChangeTable, DEFAULT_HORIZONS,
};
use crate::overlay::{build_overlay, OverlayPost, OverlayReport, OverlayRequest};
use crate::source::{GridFetchError, PriceGridSource, SourceHealth};
use crate::view::{ChartSettings, DashboardState, ViewEvent, WINDOW_CHOICES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactDefaults {
    pub window_minutes: u32,
    pub pre_minutes: u32,
    /// Upper bound for both `minutes` and `pre`.
    pub max_minutes: u32,
    pub max_overlay_posts: usize,
}

impl Default for ImpactDefaults {
    fn default() -> Self {
        Self {
            window_minutes: 15,
            pre_minutes: 0,
            max_minutes: 1440,
            max_overlay_posts: 50,
        }
    }
}

#[derive(Debug, Error)]
pub enum ImpactApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("price source failed: {0}")]
    Upstream(#[from] GridFetchError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ImpactApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactResponse {
    pub anchor_minute_ts: i64,
    pub window_minutes: u32,
    pub pre_minutes: u32,
    pub series: ImpactSeries,
    pub table: PercentChangeTable,
}

impl ImpactResponse {
    pub fn from_grid(grid: &PriceGrid, req: &GridRequest) -> Self {
        let anchor = req.anchor_minute_ts();
        Self {
            anchor_minute_ts: effective_anchor_minute(grid, anchor),
            window_minutes: req.window_minutes,
            pre_minutes: req.pre_minutes,
            series: build_impact_series(grid, anchor, req.pre_minutes, req.window_minutes),
            table: build_percent_change_table(grid, anchor, &DEFAULT_HORIZONS),
        }
    }
}

pub fn impact_router(source: Arc<dyn PriceGridSource>) -> Router {
    impact_router_with_defaults(source, ImpactDefaults::default())
}

pub fn impact_router_with_defaults(
    source: Arc<dyn PriceGridSource>,
    defaults: ImpactDefaults,
) -> Router {
    Router::new()
        .route("/impact", get(get_impact))
        .route("/impact/overlay", get(get_impact_overlay))
        .route("/impact/page", get(get_impact_page))
        .route("/health", get(get_health))
        .with_state(ImpactAppState { source, defaults })
}

pub fn render_impact_html(response: &ImpactResponse) -> String {
    render_page(response, None)
}

/// Same page with window and pre-roll switches for the given chart settings.
pub fn render_impact_page(response: &ImpactResponse, chart: &ChartSettings) -> String {
    render_page(response, Some(chart))
}

fn render_page(response: &ImpactResponse, chart: Option<&ChartSettings>) -> String {
    let anchor_label = Utc
        .timestamp_opt(response.anchor_minute_ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| response.anchor_minute_ts.to_string());

    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Post Impact</title>\n");
    out.push_str("<style>:root{--bg:#f5f1e7;--card:#ffffff;--ink:#182026;--muted:#5f6a73;--line:#d7dce1;--head:#14343f;--up:#1d7a46;--down:#b3261e}*{box-sizing:border-box}body{margin:0;color:var(--ink);font-family:\"Space Grotesk\",\"Avenir Next\",\"Segoe UI\",sans-serif;background:linear-gradient(160deg,var(--bg),#e9f0f2);min-height:100vh}.shell{max-width:960px;margin:0 auto;padding:24px 18px 28px}.hero{background:linear-gradient(135deg,#102f3a 0%,#24576b 100%);color:#f7fbfc;border-radius:16px;padding:18px 20px}.hero h1{margin:0 0 8px;font-size:1.5rem}.hero-meta{display:flex;gap:16px;flex-wrap:wrap;font-size:.92rem;color:#dcebf0}.card{margin-top:16px;background:var(--card);border:1px solid #cbd4db;border-radius:16px;overflow:hidden}table{width:100%;border-collapse:collapse}thead th{background:var(--head);color:#f2f7f9;font-size:.8rem;text-transform:uppercase;padding:10px}tbody td{font-size:.86rem;padding:8px 10px;border-bottom:1px solid var(--line)}.up{color:var(--up)}.down{color:var(--down)}.absent{color:var(--muted)}.empty{padding:18px;color:var(--muted)}.controls{display:flex;gap:10px;margin-top:12px}.controls a{color:var(--head);font-size:.86rem}.controls a.active{font-weight:700}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str("<section class=\"hero\"><h1>Post Impact</h1><div class=\"hero-meta\">");
    out.push_str(&format!(
        "<span>Anchor: {}</span>",
        escape_html(&anchor_label)
    ));
    out.push_str(&format!(
        "<span>Window: -{}m / +{}m</span>",
        response.pre_minutes, response.window_minutes
    ));
    match response.series.baseline {
        Some(baseline) => out.push_str(&format!(
            "<span>Baseline: {} @ offset {}m</span>",
            baseline.value,
            baseline.minute_ts.saturating_sub(response.anchor_minute_ts) / 60
        )),
        None => out.push_str("<span>Baseline: none</span>"),
    }
    out.push_str("</div></section>\n");
    if let Some(chart) = chart {
        out.push_str(&chart_controls(response.anchor_minute_ts, chart));
    }

    if response.series.is_empty() && response.table.is_all_absent() {
        out.push_str("<section class=\"card\"><p class=\"empty\" id=\"no-data\">No price data for this window.</p></section>");
        out.push_str("</main></body></html>\n");
        return out;
    }

    out.push_str("<section class=\"card\"><table id=\"horizon-table\">\n");
    out.push_str("<thead><tr><th>Horizon</th><th>Change</th></tr></thead><tbody>\n");
    for entry in &response.table.entries {
        out.push_str(&format!("<tr><td>+{}m</td>", entry.horizon_min));
        out.push_str(&percent_cell(entry.percent_change));
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody></table></section>\n");

    out.push_str("<section class=\"card\"><table id=\"series-table\">\n");
    out.push_str("<thead><tr><th>Offset</th><th>Change</th></tr></thead><tbody>\n");
    for (offset, pct) in response.series.points() {
        out.push_str(&format!("<tr data-offset=\"{offset}\"><td>{offset:+}m</td>"));
        out.push_str(&percent_cell(Some(pct)));
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody></table></section>");
    out.push_str("</main></body></html>\n");
    out
}

fn chart_controls(anchor_minute_ts: i64, chart: &ChartSettings) -> String {
    let link = |window: u32, pre_roll: bool, label: String, active: bool| {
        format!(
            "<a class=\"{}\" href=\"/impact/page?start={anchor_minute_ts}&amp;window={window}&amp;pre_roll={}\">{}</a>",
            if active { "active" } else { "" },
            u8::from(pre_roll),
            escape_html(&label)
        )
    };

    let mut out = String::from("<nav class=\"controls\" id=\"chart-controls\">");
    for window in WINDOW_CHOICES {
        out.push_str(&link(
            window,
            chart.pre_roll,
            format!("{window}m"),
            window == chart.window_minutes,
        ));
    }
    out.push_str(&link(
        chart.window_minutes,
        !chart.pre_roll,
        format!(
            "pre-roll {}",
            if chart.pre_roll { "off" } else { "on" }
        ),
        false,
    ));
    out.push_str("</nav>\n");
    out
}

fn percent_cell(value: Option<f64>) -> String {
    match value {
        Some(pct) => {
            let class = if pct > 0.0 {
                "up"
            } else if pct < 0.0 {
                "down"
            } else {
                ""
            };
            format!("<td class=\"{class}\">{}</td>", escape_html(&format!("{pct:+.2}%")))
        }
        None => "<td class=\"absent\">-</td>".to_string(),
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Clone)]
struct ImpactAppState {
    source: Arc<dyn PriceGridSource>,
    defaults: ImpactDefaults,
}

type QueryPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;

fn query_pairs(query: QueryPairs) -> Result<Vec<(String, String)>, ImpactApiError> {
    query
        .map(|Query(pairs)| pairs)
        .map_err(|err| ImpactApiError::BadRequest(err.body_text()))
}

fn single<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_minutes(
    pairs: &[(String, String)],
    key: &str,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32, ImpactApiError> {
    let Some(raw) = single(pairs, key) else {
        return Ok(default);
    };
    let value: u32 = raw
        .parse()
        .map_err(|_| ImpactApiError::BadRequest(format!("`{key}` must be a whole number")))?;
    if value < min || value > max {
        return Err(ImpactApiError::BadRequest(format!(
            "`{key}` must be between {min} and {max}"
        )));
    }
    Ok(value)
}

fn parse_anchor(raw: &str, key: &str) -> Result<i64, ImpactApiError> {
    raw.trim().parse().map_err(|_| {
        ImpactApiError::BadRequest(format!("`{key}` must be a Unix timestamp in seconds"))
    })
}

fn window_params(
    pairs: &[(String, String)],
    defaults: &ImpactDefaults,
) -> Result<(u32, u32), ImpactApiError> {
    let window = parse_minutes(
        pairs,
        "minutes",
        defaults.window_minutes,
        1,
        defaults.max_minutes,
    )?;
    let pre = parse_minutes(pairs, "pre", defaults.pre_minutes, 0, defaults.max_minutes)?;
    Ok((window, pre))
}

fn single_request(
    pairs: &[(String, String)],
    defaults: &ImpactDefaults,
) -> Result<GridRequest, ImpactApiError> {
    let start = single(pairs, "start")
        .ok_or_else(|| ImpactApiError::BadRequest("`start` is required".to_string()))?;
    let anchor_ts = parse_anchor(start, "start")?;
    let (window, pre) = window_params(pairs, defaults)?;
    Ok(GridRequest::new(anchor_ts, window, pre))
}

async fn fetch_impact(
    source: Arc<dyn PriceGridSource>,
    req: GridRequest,
) -> Result<ImpactResponse, ImpactApiError> {
    let grid = tokio::task::spawn_blocking(move || source.fetch_grid(&req))
        .await
        .map_err(|err| ImpactApiError::Internal(format!("retrieval task failed: {err}")))??;
    Ok(ImpactResponse::from_grid(&grid, &req))
}

async fn get_impact(
    State(state): State<ImpactAppState>,
    query: QueryPairs,
) -> Result<Json<ImpactResponse>, ImpactApiError> {
    let req = single_request(&query_pairs(query)?, &state.defaults)?;
    info!(
        component = "dashboard",
        event = "http.impact.request",
        route = "/impact",
        anchor_ts = req.anchor_ts,
        window_minutes = req.window_minutes,
        pre_minutes = req.pre_minutes
    );
    Ok(Json(fetch_impact(state.source, req).await?))
}

/// Chart settings for the page: `window` must be one of the window choices
/// and `pre_roll` a 0/1 flag.
fn page_view(pairs: &[(String, String)]) -> Result<DashboardState, ImpactApiError> {
    let mut view = DashboardState::default();
    if let Some(raw) = single(pairs, "window") {
        let minutes = raw
            .parse::<u32>()
            .ok()
            .filter(|minutes| WINDOW_CHOICES.contains(minutes))
            .ok_or_else(|| {
                ImpactApiError::BadRequest(format!("`window` must be one of {WINDOW_CHOICES:?}"))
            })?;
        view = view.apply(ViewEvent::SetWindow { minutes });
    }
    if let Some(raw) = single(pairs, "pre_roll") {
        let enabled = match raw {
            "1" | "true" | "on" => true,
            "0" | "false" | "off" => false,
            _ => {
                return Err(ImpactApiError::BadRequest(
                    "`pre_roll` must be 0 or 1".to_string(),
                ))
            }
        };
        view = view.apply(ViewEvent::SetPreRoll { enabled });
    }
    Ok(view)
}

async fn get_health(State(state): State<ImpactAppState>) -> Json<SourceHealth> {
    Json(state.source.health())
}

async fn get_impact_page(
    State(state): State<ImpactAppState>,
    query: QueryPairs,
) -> Result<Html<String>, ImpactApiError> {
    let pairs = query_pairs(query)?;
    let start = single(&pairs, "start")
        .ok_or_else(|| ImpactApiError::BadRequest("`start` is required".to_string()))?;
    let anchor_ts = parse_anchor(start, "start")?;
    let view = page_view(&pairs)?;
    let req = view.chart_request(anchor_ts);
    info!(
        component = "dashboard",
        event = "http.impact.request",
        route = "/impact/page",
        anchor_ts = req.anchor_ts,
        window_minutes = req.window_minutes,
        pre_minutes = req.pre_minutes
    );
    let response = fetch_impact(state.source, req).await?;
    Ok(Html(render_impact_page(&response, &view.chart)))
}

async fn get_impact_overlay(
    State(state): State<ImpactAppState>,
    query: QueryPairs,
) -> Result<Json<OverlayReport>, ImpactApiError> {
    let pairs = query_pairs(query)?;
    let posts = pairs
        .iter()
        .filter(|(key, _)| key == "anchor")
        .map(|(_, raw)| {
            parse_anchor(raw, "anchor").map(|anchor_ts| OverlayPost {
                post_id: raw.trim().to_string(),
                anchor_ts,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if posts.is_empty() {
        return Err(ImpactApiError::BadRequest(
            "at least one `anchor` is required".to_string(),
        ));
    }
    if posts.len() > state.defaults.max_overlay_posts {
        return Err(ImpactApiError::BadRequest(format!(
            "at most {} anchors per overlay",
            state.defaults.max_overlay_posts
        )));
    }
    let (window_minutes, pre_minutes) = window_params(&pairs, &state.defaults)?;

    info!(
        component = "dashboard",
        event = "http.impact.request",
        route = "/impact/overlay",
        posts = posts.len(),
        window_minutes,
        pre_minutes
    );

    let req = OverlayRequest {
        posts,
        window_minutes,
        pre_minutes,
    };
    Ok(Json(build_overlay(state.source, &req).await))
}
