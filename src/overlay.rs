//! Multi-post overlay: one impact series per selected post, retrieved
//! concurrently. A failed or empty post never aborts the others.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::grid::GridRequest;
use crate::impact::{build_impact_series, ImpactSeries};
use crate::source::PriceGridSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayPost {
    pub post_id: String,
    pub anchor_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayRequest {
    pub posts: Vec<OverlayPost>,
    pub window_minutes: u32,
    pub pre_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayTrace {
    pub post_id: String,
    pub anchor_ts: i64,
    pub series: ImpactSeries,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SkipReason {
    FetchFailed(String),
    NoData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPost {
    pub post_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayReport {
    pub traces: Vec<OverlayTrace>,
    pub skipped: Vec<SkippedPost>,
}

enum PostOutcome {
    Trace(OverlayTrace),
    Skipped(SkippedPost),
}

/// Fetches every post's grid on the blocking pool and collects results in
/// request order.
pub async fn build_overlay(
    source: Arc<dyn PriceGridSource>,
    req: &OverlayRequest,
) -> OverlayReport {
    let handles: Vec<_> = req
        .posts
        .iter()
        .cloned()
        .map(|post| {
            let source = Arc::clone(&source);
            let grid_req = GridRequest::new(post.anchor_ts, req.window_minutes, req.pre_minutes);
            let post_id = post.post_id.clone();
            let handle = tokio::task::spawn_blocking(move || {
                overlay_post(source.as_ref(), post, &grid_req)
            });
            (post_id, handle)
        })
        .collect();

    let mut report = OverlayReport::default();
    for (post_id, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => PostOutcome::Skipped(SkippedPost {
                post_id,
                reason: SkipReason::FetchFailed(format!("retrieval task failed: {err}")),
            }),
        };
        match outcome {
            PostOutcome::Trace(trace) => report.traces.push(trace),
            PostOutcome::Skipped(skipped) => {
                warn!(
                    component = "overlay",
                    event = "overlay.post.skipped",
                    post_id = %skipped.post_id,
                    reason = ?skipped.reason
                );
                report.skipped.push(skipped);
            }
        }
    }

    info!(
        component = "overlay",
        event = "overlay.build.finish",
        requested = req.posts.len(),
        traces = report.traces.len(),
        skipped = report.skipped.len()
    );

    report
}

fn overlay_post(source: &dyn PriceGridSource, post: OverlayPost, req: &GridRequest) -> PostOutcome {
    let grid = match source.fetch_grid(req) {
        Ok(grid) => grid,
        Err(err) => {
            return PostOutcome::Skipped(SkippedPost {
                post_id: post.post_id,
                reason: SkipReason::FetchFailed(err.to_string()),
            })
        }
    };

    let series = build_impact_series(
        &grid,
        req.anchor_minute_ts(),
        req.pre_minutes,
        req.window_minutes,
    );
    if series.is_empty() {
        return PostOutcome::Skipped(SkippedPost {
            post_id: post.post_id,
            reason: SkipReason::NoData,
        });
    }

    PostOutcome::Trace(OverlayTrace {
        post_id: post.post_id,
        anchor_ts: post.anchor_ts,
        series,
    })
}
