//! Minute price grid consumed by the impact normalizer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MINUTE_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("grid length mismatch: {timestamps} timestamps vs {closes} closes")]
    LengthMismatch { timestamps: usize, closes: usize },
    #[error("grid timestamps must be strictly increasing: {previous} followed by {next} at index {index}")]
    NonIncreasing {
        index: usize,
        previous: i64,
        next: i64,
    },
    #[error("invalid close price {value} at minute {minute_ts}")]
    InvalidClose { minute_ts: i64, value: String },
}

/// Validated per-minute close prices around an anchor.
///
/// Timestamps are strictly increasing Unix seconds and `close` is
/// index-aligned with them. Present closes are finite; zero or negative
/// closes are kept but never chosen as a baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceGrid {
    minute_ts: Vec<i64>,
    close: Vec<Option<f64>>,
    tweet_minute_ts: Option<i64>,
}

impl PriceGrid {
    pub fn new(
        minute_ts: Vec<i64>,
        close: Vec<Option<f64>>,
        tweet_minute_ts: Option<i64>,
    ) -> Result<Self, GridError> {
        if minute_ts.len() != close.len() {
            return Err(GridError::LengthMismatch {
                timestamps: minute_ts.len(),
                closes: close.len(),
            });
        }

        for (index, pair) in minute_ts.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(GridError::NonIncreasing {
                    index: index + 1,
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }

        for (ts, value) in minute_ts.iter().zip(&close) {
            if let Some(value) = value {
                if !value.is_finite() {
                    return Err(GridError::InvalidClose {
                        minute_ts: *ts,
                        value: value.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            minute_ts,
            close,
            tweet_minute_ts,
        })
    }

    pub fn empty(tweet_minute_ts: Option<i64>) -> Self {
        Self {
            minute_ts: Vec::new(),
            close: Vec::new(),
            tweet_minute_ts,
        }
    }

    pub fn minute_ts(&self) -> &[i64] {
        &self.minute_ts
    }

    pub fn close(&self) -> &[Option<f64>] {
        &self.close
    }

    pub fn tweet_minute_ts(&self) -> Option<i64> {
        self.tweet_minute_ts
    }

    pub fn len(&self) -> usize {
        self.minute_ts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minute_ts.is_empty()
    }

    pub fn index_of(&self, minute_ts: i64) -> Option<usize> {
        self.minute_ts.binary_search(&minute_ts).ok()
    }

    pub fn close_at(&self, minute_ts: i64) -> Option<f64> {
        self.index_of(minute_ts).and_then(|idx| self.close[idx])
    }

    pub fn present_points(&self) -> usize {
        self.close.iter().filter(|value| value.is_some()).count()
    }
}

/// Which price of a minute bar fills the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Open,
    #[default]
    Close,
}

impl PriceField {
    pub fn as_str(self) -> &'static str {
        match self {
            PriceField::Open => "open",
            PriceField::Close => "close",
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceField {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(PriceField::Open),
            "close" => Ok(PriceField::Close),
            other => Err(format!("unknown price field: {other}")),
        }
    }
}

/// Parameters sent to the backend price endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRequest {
    pub anchor_ts: i64,
    pub window_minutes: u32,
    pub pre_minutes: u32,
    pub full_grid: bool,
    #[serde(default)]
    pub price_field: PriceField,
}

impl GridRequest {
    pub fn new(anchor_ts: i64, window_minutes: u32, pre_minutes: u32) -> Self {
        Self {
            anchor_ts,
            window_minutes,
            pre_minutes,
            full_grid: true,
            price_field: PriceField::Close,
        }
    }

    pub fn with_price_field(mut self, price_field: PriceField) -> Self {
        self.price_field = price_field;
        self
    }

    pub fn anchor_minute_ts(&self) -> i64 {
        floor_to_minute(self.anchor_ts)
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("start", self.anchor_ts.to_string()),
            ("minutes", self.window_minutes.to_string()),
            ("pre", self.pre_minutes.to_string()),
        ];
        if self.full_grid {
            pairs.push(("full", "1".to_string()));
        }
        pairs
    }
}

/// Body of the backend price endpoint, as far as the normalizer reads it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceGridResponse {
    #[serde(default)]
    pub minute_ts: Vec<i64>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub tweet_minute_ts: Option<i64>,
}

impl TryFrom<PriceGridResponse> for PriceGrid {
    type Error = GridError;

    fn try_from(value: PriceGridResponse) -> Result<Self, Self::Error> {
        PriceGrid::new(value.minute_ts, value.close, value.tweet_minute_ts)
    }
}

/// Floors to the minute boundary. Saturates at `i64::MIN`, which has no
/// representable boundary below it.
pub fn floor_to_minute(ts: i64) -> i64 {
    ts.saturating_sub(ts.rem_euclid(MINUTE_SECONDS))
}
