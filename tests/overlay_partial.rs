use std::sync::Arc;

use tweet_impact::{
    build_overlay, GridFetchError, GridRequest, MinuteBarStore, OverlayPost, OverlayRequest,
    PriceGrid, PriceGridSource, SkipReason, DEMO_SESSION_START_TS,
};

const OUTAGE_ANCHOR: i64 = 1;
const EMPTY_ANCHOR: i64 = 2;

/// Demo prices, except for two anchors that fail or come back empty.
struct FlakySource {
    store: MinuteBarStore,
}

impl PriceGridSource for FlakySource {
    fn fetch_grid(&self, req: &GridRequest) -> Result<PriceGrid, GridFetchError> {
        match req.anchor_ts {
            OUTAGE_ANCHOR => Err(GridFetchError::HttpRequest {
                url: "http://127.0.0.1:5000/api/price".to_string(),
                message: "simulated outage".to_string(),
            }),
            EMPTY_ANCHOR => Ok(PriceGrid::empty(None)),
            _ => self.store.fetch_grid(req),
        }
    }
}

fn post(post_id: &str, anchor_ts: i64) -> OverlayPost {
    OverlayPost {
        post_id: post_id.to_string(),
        anchor_ts,
    }
}

#[tokio::test]
async fn failed_and_empty_posts_do_not_abort_the_overlay() {
    let source: Arc<dyn PriceGridSource> = Arc::new(FlakySource {
        store: MinuteBarStore::demo(),
    });
    let req = OverlayRequest {
        posts: vec![
            post("first", DEMO_SESSION_START_TS + 60 * 60),
            post("down", OUTAGE_ANCHOR),
            post("quiet", EMPTY_ANCHOR),
            post("last", DEMO_SESSION_START_TS + 120 * 60),
        ],
        window_minutes: 30,
        pre_minutes: 5,
    };

    let report = build_overlay(source, &req).await;

    let traced: Vec<&str> = report.traces.iter().map(|t| t.post_id.as_str()).collect();
    assert_eq!(traced, vec!["first", "last"]);
    for trace in &report.traces {
        assert!(!trace.series.is_empty());
        assert!(trace
            .series
            .offsets_minutes
            .iter()
            .all(|offset| (-5..=30).contains(offset)));
    }

    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[0].post_id, "down");
    assert!(matches!(
        &report.skipped[0].reason,
        SkipReason::FetchFailed(message) if message.contains("simulated outage")
    ));
    assert_eq!(report.skipped[1].post_id, "quiet");
    assert_eq!(report.skipped[1].reason, SkipReason::NoData);
}

#[tokio::test]
async fn skip_reasons_serialize_with_kind_tag() {
    let source: Arc<dyn PriceGridSource> = Arc::new(FlakySource {
        store: MinuteBarStore::demo(),
    });
    let req = OverlayRequest {
        posts: vec![post("quiet", EMPTY_ANCHOR)],
        window_minutes: 15,
        pre_minutes: 0,
    };

    let report = build_overlay(source, &req).await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["traces"].as_array().unwrap().len(), 0);
    assert_eq!(json["skipped"][0]["reason"]["kind"], "no_data");
}
