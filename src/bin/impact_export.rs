use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use tweet_impact::{
    export_impact_dataset, init_logging, load_posts, log_app_start, log_export_target,
    log_source_selected, logging_config_from_env, BarStoreConfig, ExportConfig,
    HttpPriceGridSource, MinuteBarStore, PriceApiConfig, PriceField, PriceGridSource, RunKind,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(RunKind::Export, &logging_cfg);

    let posts_path = std::env::var("IMPACT_POSTS_CSV")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/tweets.csv"));
    let mut export_cfg = ExportConfig::from_env()?;

    let posts = load_posts(&posts_path)?;
    let source = source_from_env(&mut export_cfg)?;

    let out_path = std::env::var_os("IMPACT_EXPORT_OUT").map(PathBuf::from);
    log_export_target(&posts_path, posts.len(), out_path.as_deref());
    let out: Box<dyn Write> = match &out_path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    export_impact_dataset(&posts, source.as_ref(), &export_cfg, out)?;
    Ok(())
}

fn source_from_env(
    export_cfg: &mut ExportConfig,
) -> Result<Box<dyn PriceGridSource>, Box<dyn std::error::Error>> {
    if let Some(dir) = std::env::var_os("IMPACT_BARS_DIR").map(PathBuf::from) {
        let store = MinuteBarStore::load_dir(&dir, &BarStoreConfig::from_env())?;
        log_source_selected(RunKind::Export, &store.health(), "IMPACT_BARS_DIR");
        return Ok(Box::new(store));
    }

    // the backend endpoint serves closes only
    export_cfg.price_field = PriceField::Close;
    let source = HttpPriceGridSource::new(PriceApiConfig::from_env())?;
    log_source_selected(RunKind::Export, &source.health(), "default");
    Ok(Box::new(source))
}
