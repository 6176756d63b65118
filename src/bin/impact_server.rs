use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use tweet_impact::{
    impact_router, init_logging, log_app_bind, log_app_start, log_source_selected,
    logging_config_from_env, BarStoreConfig, HttpPriceGridSource, MinuteBarStore,
    PriceApiConfig, PriceGridSource, RunKind,
};

// The HTTP source wraps a blocking reqwest client: it is created before the
// runtime starts and its last handle is dropped after the runtime returns.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(RunKind::Server, &logging_cfg);

    let addr: SocketAddr = std::env::var("IMPACT_DASHBOARD_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let source = source_from_env()?;
    let health = source.health();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let app = impact_router(Arc::clone(&source));
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        log_app_bind(bound_addr, &health);
        axum::serve(listener, app).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    drop(source);
    Ok(())
}

fn source_from_env() -> Result<Arc<dyn PriceGridSource>, Box<dyn std::error::Error>> {
    let force_demo = std::env::var("IMPACT_USE_DEMO")
        .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let (source, origin): (Arc<dyn PriceGridSource>, &str) = if force_demo {
        (Arc::new(MinuteBarStore::demo()), "IMPACT_USE_DEMO")
    } else if let Some(dir) = std::env::var_os("IMPACT_BARS_DIR").map(PathBuf::from) {
        let store = MinuteBarStore::load_dir(&dir, &BarStoreConfig::from_env())?;
        (Arc::new(store), "IMPACT_BARS_DIR")
    } else {
        let cfg = PriceApiConfig::from_env();
        (Arc::new(HttpPriceGridSource::new(cfg)?), "default")
    };

    log_source_selected(RunKind::Server, &source.health(), origin);
    Ok(source)
}
