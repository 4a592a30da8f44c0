use log::{error, info};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use topicrawl::common::model::Config;
use topicrawl::engine::Runtime;
use topicrawl::queue::JobHandler;
use topicrawl::utils::logger::{self, LoggerConfig};

/// Usage: `topicrawl-worker [config.toml]`. Environment variables override
/// file values; without a file the defaults plus environment are used.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1).or_else(|| std::env::var("TOPICRAWL_CONFIG").ok()) {
        Some(path) => {
            let mut config = Config::load(&path)?;
            config.apply_env()?;
            config
        }
        None => Config::from_env()?,
    };
    logger::init_logger(LoggerConfig::from(&config.logger))?;
    info!("Starting worker {} with {:?}", config.name, config.channel_config.topic);

    let runtime = Runtime::connect(&config).await?;
    runtime.health_check().await?;

    let shutdown = CancellationToken::new();
    let sync_handle = {
        let sync = runtime.cache_sync();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { sync.run(shutdown).await })
    };

    let consumer_handle = {
        let queue = runtime.queue.clone();
        let handler: Arc<dyn JobHandler> = Arc::new(runtime.worker());
        let shutdown = shutdown.clone();
        tokio::spawn(async move { queue.consume(handler, shutdown).await })
    };

    signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    shutdown.cancel();

    if let Err(e) = sync_handle.await {
        error!("Cache sync task ended abnormally: {}", e);
    }
    match consumer_handle.await {
        Ok(Err(e)) => error!("Consumer stopped with error: {}", e),
        Err(e) => error!("Consumer task ended abnormally: {}", e),
        Ok(Ok(())) => {}
    }
    runtime.close().await;
    Ok(())
}
