//! Tweet impact core crate.
//!
//! Turns a per-minute price grid around a post's timestamp into a
//! baseline-normalized percent-change series and a fixed-horizon table.
//! Around that core:
//! - price grid sources (backend HTTP endpoint, local minute-bar CSVs)
//! - concurrent multi-post overlay with partial results
//! - dashboard view-model and axum impact routes
//! - offline per-post dataset export

mod bars;
mod dashboard;
mod export;
mod grid;
mod impact;
mod observability;
mod overlay;
mod posts;
mod source;
mod view;

pub use bars::{BarLoadError, BarStoreConfig, MinuteBar, MinuteBarStore, DEMO_SESSION_START_TS};
pub use dashboard::{
    impact_router, impact_router_with_defaults, render_impact_html, render_impact_page,
    ImpactApiError, ImpactDefaults, ImpactResponse,
};
pub use export::{
    export_impact_dataset, header_row, ExportConfig, ExportError, ExportReport, EXPORT_HORIZONS,
};
pub use grid::{
    floor_to_minute, GridError, GridRequest, PriceField, PriceGrid, PriceGridResponse,
    MINUTE_SECONDS,
};
pub use impact::{
    build_impact_series, build_percent_change_table, effective_anchor_minute, resolve_baseline,
    Baseline, HorizonChange, ImpactSeries, PercentChangeTable, DEFAULT_HORIZONS,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_export_target, log_source_selected,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError, RunKind,
};
pub use overlay::{
    build_overlay, OverlayPost, OverlayReport, OverlayRequest, OverlayTrace, SkipReason,
    SkippedPost,
};
pub use posts::{load_posts, Post, PostLoadError};
pub use source::{
    GridFetchError, HttpPriceGridSource, PriceApiConfig, PriceGridSource, SourceHealth,
};
pub use view::{
    ChartSettings, DashboardState, PostFilters, ViewEvent, DEFAULT_PER_PAGE,
    DEFAULT_PRE_ROLL_MINUTES, DEFAULT_WINDOW_MINUTES, WINDOW_CHOICES,
};
