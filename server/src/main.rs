use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::{
    filter::FilterFn,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

mod checks;
mod http;
mod service;
mod thumb;

use api::SCRATCH_PATH;
use common::config::read_config;
use service::{GlimpseService, GsmRegistry};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "/etc/glimpse/config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // hyper's connection internals are far too chatty at debug level
    let crate_filter = FilterFn::new(|metadata| {
        !metadata.target().starts_with("hyper") && !metadata.target().starts_with("h2")
    })
    .with_max_level_hint(Level::INFO);

    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(crate_filter))
        .init();

    info!("glimpse server starting up, processing config file");

    let config = read_config(PathBuf::from(args.config)).await;

    info!("performing filesystem sanity checks");

    checks::dir_readable(&config.fs.media_srcdir).expect("media_srcdir is not readable");
    checks::create_temp_file(&config.fs.cache_dir).expect("cache_dir is not writeable");

    checks::subdir_exists(&config, SCRATCH_PATH)
        .expect("could not create scratch path in cache_dir");

    info!("starting core services");

    let registry = GsmRegistry::new();

    let thumb_svc = thumb::svc::ThumbService::create(config.clone(), &registry);
    let http_svc = http::svc::HttpService::create(config.clone(), &registry);

    thumb_svc.start(&registry).await?;
    http_svc.start(&registry).await?;

    info!("startup complete!");

    // the services own all of the long-running tasks
    std::future::pending::<()>().await;

    Ok(())
}
