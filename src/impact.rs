//! Price-impact windowing and baseline normalization.
//!
//! Every function here is pure: the same grid and arguments always yield the
//! same output. "No data" is expressed as an empty series or an all-absent
//! table, never as an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grid::{floor_to_minute, PriceGrid, MINUTE_SECONDS};

pub const DEFAULT_HORIZONS: [u32; 13] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 15, 30, 60];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub index: usize,
    pub minute_ts: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactSeries {
    pub offsets_minutes: Vec<i64>,
    pub percent_changes: Vec<f64>,
    pub baseline: Option<Baseline>,
}

impl ImpactSeries {
    pub fn len(&self) -> usize {
        self.offsets_minutes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets_minutes.is_empty()
    }

    pub fn percent_at(&self, offset_minutes: i64) -> Option<f64> {
        self.offsets_minutes
            .binary_search(&offset_minutes)
            .ok()
            .map(|idx| self.percent_changes[idx])
    }

    pub fn points(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.offsets_minutes
            .iter()
            .copied()
            .zip(self.percent_changes.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonChange {
    pub horizon_min: u32,
    pub percent_change: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentChangeTable {
    pub entries: Vec<HorizonChange>,
    pub baseline: Option<Baseline>,
}

impl PercentChangeTable {
    pub fn get(&self, horizon_min: u32) -> Option<f64> {
        self.entries
            .iter()
            .find(|entry| entry.horizon_min == horizon_min)
            .and_then(|entry| entry.percent_change)
    }

    pub fn is_all_absent(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.percent_change.is_none())
    }
}

/// The anchor the grid producer resolved wins over the caller's value.
pub fn effective_anchor_minute(grid: &PriceGrid, anchor_minute_ts: i64) -> i64 {
    grid.tweet_minute_ts()
        .unwrap_or_else(|| floor_to_minute(anchor_minute_ts))
}

/// First strictly positive close at or after the effective anchor. A grid
/// without the anchor minute scans from its first index.
pub fn resolve_baseline(grid: &PriceGrid, anchor_minute_ts: i64) -> Option<Baseline> {
    if grid.is_empty() {
        return None;
    }

    let anchor = effective_anchor_minute(grid, anchor_minute_ts);
    let start = match grid.index_of(anchor) {
        Some(idx) => idx,
        None => {
            debug!(
                component = "impact",
                event = "impact.baseline.anchor_missing",
                anchor_minute_ts = anchor,
                grid_len = grid.len()
            );
            0
        }
    };

    let closes = grid.close();
    let minutes = grid.minute_ts();
    let baseline = (start..grid.len()).find_map(|idx| {
        closes[idx]
            .filter(|value| *value > 0.0)
            .map(|value| Baseline {
                index: idx,
                minute_ts: minutes[idx],
                value,
            })
    });

    if let Some(found) = baseline {
        if found.index != start {
            debug!(
                component = "impact",
                event = "impact.baseline.fallback_next",
                anchor_minute_ts = anchor,
                baseline_minute_ts = found.minute_ts
            );
        }
    }

    baseline
}

pub fn build_impact_series(
    grid: &PriceGrid,
    anchor_minute_ts: i64,
    pre_minutes: u32,
    window_minutes: u32,
) -> ImpactSeries {
    let Some(baseline) = resolve_baseline(grid, anchor_minute_ts) else {
        return ImpactSeries::default();
    };

    let lower = -i64::from(pre_minutes);
    let upper = i64::from(window_minutes);
    let mut series = ImpactSeries {
        offsets_minutes: Vec::new(),
        percent_changes: Vec::new(),
        baseline: Some(baseline),
    };

    for (ts, close) in grid.minute_ts().iter().zip(grid.close()) {
        let Some(close) = close else {
            continue;
        };
        let Some(delta) = ts.checked_sub(baseline.minute_ts) else {
            continue;
        };
        let offset = delta.div_euclid(MINUTE_SECONDS);
        if offset < lower || offset > upper {
            continue;
        }
        series.offsets_minutes.push(offset);
        series
            .percent_changes
            .push(percent_change(*close, baseline.value));
    }

    debug!(
        component = "impact",
        event = "impact.series.built",
        baseline_minute_ts = baseline.minute_ts,
        pre_minutes,
        window_minutes,
        points = series.len()
    );

    series
}

pub fn build_percent_change_table(
    grid: &PriceGrid,
    anchor_minute_ts: i64,
    horizons: &[u32],
) -> PercentChangeTable {
    let baseline = resolve_baseline(grid, anchor_minute_ts);
    let anchor = effective_anchor_minute(grid, anchor_minute_ts);

    let entries = horizons
        .iter()
        .map(|&horizon_min| {
            // A target past i64::MAX has no minute in any grid.
            let target = i64::from(horizon_min)
                .checked_mul(MINUTE_SECONDS)
                .and_then(|delta| anchor.checked_add(delta));
            let percent_change = baseline.zip(target).and_then(|(base, target)| {
                grid.close_at(target)
                    .map(|close| percent_change(close, base.value))
            });
            HorizonChange {
                horizon_min,
                percent_change,
            }
        })
        .collect();

    PercentChangeTable { entries, baseline }
}

fn percent_change(close: f64, baseline: f64) -> f64 {
    (close / baseline - 1.0) * 100.0
}
