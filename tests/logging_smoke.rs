use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tweet_impact::{
    export_impact_dataset, impact_router, log_app_bind, log_app_start, log_export_target,
    log_source_selected, ExportConfig, GridFetchError, GridRequest, LoggingConfig, MinuteBarStore,
    Post, PriceGrid, PriceGridSource, RunKind, DEMO_SESSION_START_TS,
};
use tower::util::ServiceExt;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

struct DownSource;

impl PriceGridSource for DownSource {
    fn fetch_grid(&self, _req: &GridRequest) -> Result<PriceGrid, GridFetchError> {
        Err(GridFetchError::HttpRequest {
            url: "http://127.0.0.1:5000/api/price".to_string(),
            message: "simulated outage".to_string(),
        })
    }
}

fn post_at(post_id: &str, ts: i64) -> Post {
    Post {
        post_id: post_id.to_string(),
        text: "hello".to_string(),
        created_at: chrono::DateTime::from_timestamp(ts, 0).expect("valid timestamp"),
        is_reply: false,
        is_retweet: false,
        is_quote: false,
    }
}

#[test]
fn export_logs_fetch_failures_and_summary() {
    let posts = vec![post_at("1", DEMO_SESSION_START_TS + 600)];
    let logs = capture_logs(Level::INFO, || {
        let report =
            export_impact_dataset(&posts, &DownSource, &ExportConfig::default(), Vec::<u8>::new())
                .expect("fetch failures are skipped, not fatal");
        assert_eq!(report.skipped_fetch_failed, 1);
        assert_eq!(report.written, 0);
    });

    assert!(logs.contains("\"event\":\"export.post.fetch_failed\""));
    assert!(logs.contains("\"event\":\"export.finish\""));
}

#[test]
fn baseline_fallback_is_logged_at_debug() {
    let store = MinuteBarStore::demo();
    let logs = capture_logs(Level::DEBUG, || {
        // Minute 3 of the demo session has no bar.
        let req = GridRequest::new(DEMO_SESSION_START_TS + 180, 5, 0);
        let grid = store.fetch_grid(&req).expect("demo grid should build");
        let series = tweet_impact::build_impact_series(&grid, req.anchor_minute_ts(), 0, 5);
        assert!(!series.is_empty());
    });

    assert!(logs.contains("\"event\":\"impact.baseline.fallback_next\""));
    assert!(logs.contains("\"event\":\"impact.series.built\""));
}

#[test]
fn server_lifecycle_logs_carry_source_coverage() {
    let store = MinuteBarStore::demo();
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start(RunKind::Server, &cfg);
        log_source_selected(RunKind::Server, &store.health(), "IMPACT_USE_DEMO");
        log_app_bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            &store.health(),
        );
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"component\":\"impact_server\""));
    assert!(logs.contains("\"event\":\"source.selected\""));
    assert!(logs.contains("\"origin\":\"IMPACT_USE_DEMO\""));
    assert!(logs.contains(&format!("\"rows\":{}", store.len())));
    assert!(logs.contains(&format!("\"first_minute_ts\":{DEMO_SESSION_START_TS}")));
    assert!(logs.contains("\"event\":\"app.bind\""));
    assert!(logs.contains("http://127.0.0.1:8080/impact/page"));
}

#[test]
fn export_lifecycle_names_its_output() {
    let logs = capture_logs(Level::INFO, || {
        log_app_start(RunKind::Export, &LoggingConfig::default());
        log_export_target(std::path::Path::new("data/tweets.csv"), 3, None);
    });

    assert!(logs.contains("\"component\":\"impact_export\""));
    assert!(logs.contains("\"event\":\"export.target\""));
    assert!(logs.contains("\"output\":\"stdout\""));
    assert!(logs.contains("\"posts_loaded\":3"));
}

#[test]
fn impact_route_emits_http_impact_event() {
    let logs = capture_logs(Level::INFO, || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("single-thread runtime should build");

        rt.block_on(async {
            let app = impact_router(Arc::new(MinuteBarStore::demo()));

            let response = app
                .oneshot(
                    Request::builder()
                        .uri(format!("/impact?start={}", DEMO_SESSION_START_TS + 600))
                        .body(Body::empty())
                        .expect("request should build"),
                )
                .await
                .expect("impact request should succeed");

            assert_eq!(response.status(), StatusCode::OK);
        });
    });

    assert!(logs.contains("\"event\":\"http.impact.request\""));
}
