//! Local minute-bar store loaded from CSV exports of an instrument's prices.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::grid::{
    floor_to_minute, GridError, GridRequest, PriceField, PriceGrid, MINUTE_SECONDS,
};
use crate::source::{GridFetchError, PriceGridSource, SourceHealth};

const TIME_COLUMNS: [&str; 6] = ["datetime", "time", "timestamp", "date", "Date", "Time"];
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// 2025-01-02T14:30:00Z, the regular-session open used by the demo store.
pub const DEMO_SESSION_START_TS: i64 = 1_735_828_200;
const DEMO_SESSION_MINUTES: i64 = 390;

/// One CSV row. A missing or non-finite price is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinuteBar {
    pub ts: i64,
    pub open: Option<f64>,
    pub close: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MinutePrices {
    open: Option<f64>,
    close: Option<f64>,
}

impl MinutePrices {
    fn get(&self, field: PriceField) -> Option<f64> {
        match field {
            PriceField::Open => self.open,
            PriceField::Close => self.close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarStoreConfig {
    /// Zone used for timestamps that carry no offset.
    pub source_tz: Tz,
}

impl Default for BarStoreConfig {
    fn default() -> Self {
        Self {
            source_tz: chrono_tz::UTC,
        }
    }
}

impl BarStoreConfig {
    /// Reads `IMPACT_BARS_TZ`; unknown zone names keep UTC.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(tz) = std::env::var("IMPACT_BARS_TZ")
            .ok()
            .and_then(|raw| raw.trim().parse::<Tz>().ok())
        {
            cfg.source_tz = tz;
        }
        cfg
    }
}

#[derive(Debug, Error)]
pub enum BarLoadError {
    #[error("minute-bar directory not found: {0}")]
    MissingDir(PathBuf),
    #[error("no CSV files found under {0}")]
    NoCsvFiles(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("file {path} has no time column")]
    MissingTimeColumn { path: PathBuf },
    #[error("file {path} has no {column} column")]
    MissingPriceColumn {
        path: PathBuf,
        column: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinuteBarStore {
    minutes: BTreeMap<i64, MinutePrices>,
    files_loaded: usize,
    files_skipped: usize,
}

impl MinuteBarStore {
    /// Bars are ordered by timestamp. Inside a minute the last present open
    /// and the last present close win, each on its own.
    pub fn from_bars(bars: impl IntoIterator<Item = MinuteBar>) -> Self {
        let mut bars: Vec<MinuteBar> = bars.into_iter().collect();
        bars.sort_by_key(|bar| bar.ts);

        let mut minutes: BTreeMap<i64, MinutePrices> = BTreeMap::new();
        for bar in bars {
            let open = bar.open.filter(|value| value.is_finite());
            let close = bar.close.filter(|value| value.is_finite());
            if open.is_none() && close.is_none() {
                continue;
            }
            let prices = minutes.entry(floor_to_minute(bar.ts)).or_default();
            if open.is_some() {
                prices.open = open;
            }
            if close.is_some() {
                prices.close = close;
            }
        }

        Self {
            minutes,
            files_loaded: 0,
            files_skipped: 0,
        }
    }

    pub fn load_dir(dir: &Path, cfg: &BarStoreConfig) -> Result<Self, BarLoadError> {
        if !dir.is_dir() {
            return Err(BarLoadError::MissingDir(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        collect_csv_files(dir, &mut files)?;
        files.sort();
        if files.is_empty() {
            return Err(BarLoadError::NoCsvFiles(dir.to_path_buf()));
        }

        let mut bars = Vec::new();
        let mut files_loaded = 0usize;
        let mut files_skipped = 0usize;
        for path in &files {
            match load_csv_file(path, cfg) {
                Ok(mut parsed) => {
                    files_loaded += 1;
                    bars.append(&mut parsed);
                }
                Err(err) => {
                    files_skipped += 1;
                    warn!(
                        component = "bars",
                        event = "bars.load.file_skipped",
                        path = %path.display(),
                        error = %err
                    );
                }
            }
        }

        let mut store = Self::from_bars(bars);
        store.files_loaded = files_loaded;
        store.files_skipped = files_skipped;

        info!(
            component = "bars",
            event = "bars.load.finish",
            dir = %dir.display(),
            files_loaded,
            files_skipped,
            minutes = store.len(),
            first_minute_ts = store.first_minute_ts(),
            last_minute_ts = store.last_minute_ts()
        );

        Ok(store)
    }

    pub fn demo() -> Self {
        let bars = (0..DEMO_SESSION_MINUTES)
            .filter(|minute| minute % 7 != 3)
            .map(|minute| {
                let ts = DEMO_SESSION_START_TS + minute * MINUTE_SECONDS;
                let t = minute as f64;
                let close = 400.0 + 0.02 * t + 1.5 * (t / 9.0).sin();
                MinuteBar {
                    ts,
                    open: Some(close - 0.1),
                    close: Some(close),
                }
            });
        Self::from_bars(bars)
    }

    pub fn len(&self) -> usize {
        self.minutes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty()
    }

    pub fn files_loaded(&self) -> usize {
        self.files_loaded
    }

    pub fn files_skipped(&self) -> usize {
        self.files_skipped
    }

    pub fn first_minute_ts(&self) -> Option<i64> {
        self.minutes.keys().next().copied()
    }

    pub fn last_minute_ts(&self) -> Option<i64> {
        self.minutes.keys().next_back().copied()
    }

    pub fn price_at(&self, minute_ts: i64, field: PriceField) -> Option<f64> {
        self.minutes
            .get(&minute_ts)
            .and_then(|prices| prices.get(field))
    }

    pub fn open_at(&self, minute_ts: i64) -> Option<f64> {
        self.price_at(minute_ts, PriceField::Open)
    }

    pub fn close_at(&self, minute_ts: i64) -> Option<f64> {
        self.price_at(minute_ts, PriceField::Close)
    }

    /// Contiguous minutes from `anchor - pre` to `anchor + window` filled
    /// with the requested price, `None` wherever the store holds none. A
    /// window that leaves the i64 range yields an empty grid.
    pub fn grid_for(&self, req: &GridRequest) -> Result<PriceGrid, GridError> {
        let anchor = req.anchor_minute_ts();
        let pre = i64::from(req.pre_minutes) * MINUTE_SECONDS;
        let post = i64::from(req.window_minutes) * MINUTE_SECONDS;
        let (Some(first), Some(_)) = (anchor.checked_sub(pre), anchor.checked_add(post)) else {
            return Ok(PriceGrid::empty(Some(anchor)));
        };
        let count = i64::from(req.pre_minutes) + i64::from(req.window_minutes) + 1;

        let minute_ts: Vec<i64> = (0..count).map(|i| first + i * MINUTE_SECONDS).collect();
        let prices = minute_ts
            .iter()
            .map(|ts| self.price_at(*ts, req.price_field))
            .collect();

        PriceGrid::new(minute_ts, prices, Some(anchor))
    }
}

impl PriceGridSource for MinuteBarStore {
    fn fetch_grid(&self, req: &GridRequest) -> Result<PriceGrid, GridFetchError> {
        self.grid_for(req).map_err(GridFetchError::from)
    }

    fn health(&self) -> SourceHealth {
        SourceHealth {
            kind: "minute_bars",
            rows: Some(self.len()),
            first_minute_ts: self.first_minute_ts(),
            last_minute_ts: self.last_minute_ts(),
            files_loaded: Some(self.files_loaded),
            files_skipped: Some(self.files_skipped),
            endpoint: None,
        }
    }
}

fn collect_csv_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), BarLoadError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_csv_files(&path, out)?;
        } else if path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    Ok(())
}

fn load_csv_file(path: &Path, cfg: &BarStoreConfig) -> Result<Vec<MinuteBar>, BarLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let time_idx = TIME_COLUMNS
        .iter()
        .find_map(|name| column_index(&headers, name))
        .ok_or_else(|| BarLoadError::MissingTimeColumn {
            path: path.to_path_buf(),
        })?;
    let open_idx = price_column(&headers, path, "open")?;
    let close_idx = price_column(&headers, path, "close")?;

    let mut bars = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(ts) = record.get(time_idx).and_then(|raw| parse_timestamp(raw, cfg)) else {
            continue;
        };
        let open = parse_price(&record, open_idx);
        let close = parse_price(&record, close_idx);
        if open.is_none() && close.is_none() {
            continue;
        }
        bars.push(MinuteBar { ts, open, close });
    }

    Ok(bars)
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

fn price_column(
    headers: &StringRecord,
    path: &Path,
    column: &'static str,
) -> Result<usize, BarLoadError> {
    let capitalized = format!("{}{}", column[..1].to_ascii_uppercase(), &column[1..]);
    let upper = column.to_ascii_uppercase();
    column_index(headers, column)
        .or_else(|| column_index(headers, &capitalized))
        .or_else(|| column_index(headers, &upper))
        .ok_or_else(|| BarLoadError::MissingPriceColumn {
            path: path.to_path_buf(),
            column,
        })
}

fn parse_price(record: &StringRecord, idx: usize) -> Option<f64> {
    record
        .get(idx)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

pub(crate) fn parse_timestamp(raw: &str, cfg: &BarStoreConfig) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(numeric) = trimmed.parse::<i64>() {
        // Epoch values above ~year 33658 in seconds are treated as millis.
        return Some(if numeric.abs() >= 1_000_000_000_000 {
            numeric / 1_000
        } else {
            numeric
        });
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc).timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&Utc).timestamp());
    }

    NAIVE_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(trimmed, format).ok()?;
        cfg.source_tz
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    })
}
