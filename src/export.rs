//! Offline dataset export: one CSV row of horizon percent changes per post.

use std::io::Write;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::grid::{GridRequest, PriceField};
use crate::impact::build_percent_change_table;
use crate::posts::Post;
use crate::source::PriceGridSource;

pub const EXPORT_HORIZONS: [u32; 22] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 30, 60,
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub horizons: Vec<u32>,
    pub display_tz: Tz,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// 0 exports every post in range.
    pub limit: usize,
    /// Minute price the changes are measured on. Opens by default.
    pub price_field: PriceField,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            horizons: EXPORT_HORIZONS.to_vec(),
            display_tz: chrono_tz::Europe::Warsaw,
            from: None,
            to: None,
            limit: 0,
            price_field: PriceField::Open,
        }
    }
}

impl ExportConfig {
    /// Reads `IMPACT_EXPORT_LIMIT`, `IMPACT_EXPORT_FROM`, `IMPACT_EXPORT_TO`,
    /// `IMPACT_EXPORT_PRICE` (`open` or `close`) and `IMPACT_DISPLAY_TZ`.
    /// Range bounds must be RFC3339.
    pub fn from_env() -> Result<Self, ExportError> {
        let mut cfg = Self::default();

        if let Some(limit) = env_value("IMPACT_EXPORT_LIMIT") {
            cfg.limit = limit.parse().map_err(|_| {
                ExportError::InvalidConfig(format!("IMPACT_EXPORT_LIMIT is not a count: {limit}"))
            })?;
        }
        if let Some(tz) = env_value("IMPACT_DISPLAY_TZ") {
            cfg.display_tz = tz.parse().map_err(|_| {
                ExportError::InvalidConfig(format!("unknown IMPACT_DISPLAY_TZ: {tz}"))
            })?;
        }
        if let Some(field) = env_value("IMPACT_EXPORT_PRICE") {
            cfg.price_field = field
                .parse()
                .map_err(|err| ExportError::InvalidConfig(format!("IMPACT_EXPORT_PRICE: {err}")))?;
        }
        cfg.from = env_value("IMPACT_EXPORT_FROM")
            .map(|raw| parse_bound("IMPACT_EXPORT_FROM", &raw))
            .transpose()?;
        cfg.to = env_value("IMPACT_EXPORT_TO")
            .map(|raw| parse_bound("IMPACT_EXPORT_TO", &raw))
            .transpose()?;

        validate_config(&cfg)?;
        Ok(cfg)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_bound(name: &str, raw: &str) -> Result<DateTime<Utc>, ExportError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| ExportError::InvalidConfig(format!("{name} is not RFC3339 ({err}): {raw}")))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub considered: u64,
    pub written: u64,
    pub skipped_no_baseline: u64,
    pub skipped_fetch_failed: u64,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid export config: {0}")]
    InvalidConfig(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn export_impact_dataset<W: Write>(
    posts: &[Post],
    source: &dyn PriceGridSource,
    cfg: &ExportConfig,
    out: W,
) -> Result<ExportReport, ExportError> {
    validate_config(cfg)?;
    let max_horizon = cfg.horizons.iter().copied().max().unwrap_or(0);

    let mut selected: Vec<&Post> = posts
        .iter()
        .filter(|post| cfg.from.map_or(true, |from| post.created_at >= from))
        .filter(|post| cfg.to.map_or(true, |to| post.created_at <= to))
        .collect();
    selected.sort_by_key(|post| post.created_at);
    if cfg.limit > 0 {
        selected.truncate(cfg.limit);
    }

    info!(
        component = "export",
        event = "export.start",
        posts_in_range = selected.len(),
        horizons = ?cfg.horizons,
        price_field = %cfg.price_field,
        limit = cfg.limit
    );

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(header_row(&cfg.horizons))?;

    let mut report = ExportReport::default();
    for post in selected {
        report.considered += 1;

        let req = GridRequest::new(post.created_ts(), max_horizon, 0)
            .with_price_field(cfg.price_field);
        let grid = match source.fetch_grid(&req) {
            Ok(grid) => grid,
            Err(err) => {
                report.skipped_fetch_failed += 1;
                warn!(
                    component = "export",
                    event = "export.post.fetch_failed",
                    post_id = %post.post_id,
                    error = %err
                );
                continue;
            }
        };

        let table = build_percent_change_table(&grid, req.anchor_minute_ts(), &cfg.horizons);
        let Some(baseline) = table.baseline else {
            report.skipped_no_baseline += 1;
            continue;
        };

        let mut row = vec![
            post.post_id.clone(),
            post.created_at
                .with_timezone(&cfg.display_tz)
                .format("%Y-%m-%d %H:%M:%S %Z")
                .to_string(),
            post.text.clone(),
            baseline.value.to_string(),
        ];
        row.extend(
            table
                .entries
                .iter()
                .map(|entry| entry.percent_change.map(format_percent).unwrap_or_default()),
        );
        writer.write_record(&row)?;
        report.written += 1;
    }

    writer.flush()?;

    info!(
        component = "export",
        event = "export.finish",
        considered = report.considered,
        written = report.written,
        skipped_no_baseline = report.skipped_no_baseline,
        skipped_fetch_failed = report.skipped_fetch_failed
    );

    Ok(report)
}

pub fn header_row(horizons: &[u32]) -> Vec<String> {
    let mut header = vec![
        "tweet_id".to_string(),
        "datetime".to_string(),
        "text".to_string(),
        "baseline_price".to_string(),
    ];
    header.extend(horizons.iter().map(|h| format!("change_{h}m")));
    header
}

fn format_percent(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    // avoid "-0.00"
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.2}")
}

fn validate_config(cfg: &ExportConfig) -> Result<(), ExportError> {
    if cfg.horizons.is_empty() {
        return Err(ExportError::InvalidConfig(
            "horizons must not be empty".to_string(),
        ));
    }
    if cfg.horizons.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(ExportError::InvalidConfig(
            "horizons must be strictly ascending".to_string(),
        ));
    }
    if cfg.horizons[0] == 0 {
        return Err(ExportError::InvalidConfig(
            "horizons must be > 0".to_string(),
        ));
    }
    if let (Some(from), Some(to)) = (cfg.from, cfg.to) {
        if to < from {
            return Err(ExportError::InvalidConfig(
                "export range end precedes its start".to_string(),
            ));
        }
    }
    Ok(())
}
