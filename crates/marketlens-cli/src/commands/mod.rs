mod cached;
mod flush;
mod live;
mod status;
mod watch;

use std::sync::Arc;

use marketlens_core::{
    AggregationService, AggregationServiceBuilder, AppConfig, CacheBackend, StateTransition,
    TransitionObserver,
};
use tracing::info;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Live(args) => live::run(args, &build_service(config, None).await?, cli.pretty).await,
        Command::Cached => {
            let service = persistent_cache_service(config, "cached").await?;
            cached::run(&service, cli.pretty).await
        }
        Command::Status => status::run(&build_service(config, None).await?, cli.pretty),
        Command::Flush => {
            let service = persistent_cache_service(config, "flush").await?;
            flush::run(&service, cli.pretty).await
        }
        Command::Watch(args) => {
            let observer: TransitionObserver = Arc::new(|transition: &StateTransition| {
                info!(
                    service = %transition.service,
                    previous = %transition.previous,
                    current = %transition.current,
                    at = %transition.at,
                    "breaker transition"
                );
            });
            watch::run(args, &build_service(config, Some(observer)).await?).await
        }
    }
}

/// Service for commands that read state left by an earlier process. Only
/// Redis outlives the process; the check is repeated after build because an
/// unreachable Redis falls back to the disabled cache.
async fn persistent_cache_service(
    config: AppConfig,
    command: &'static str,
) -> Result<AggregationService, CliError> {
    require_persistent(command, config.cache.backend)?;
    let service = build_service(config, None).await?;
    require_persistent(command, service.cache_backend())?;
    Ok(service)
}

fn require_persistent(command: &'static str, backend: CacheBackend) -> Result<(), CliError> {
    match backend {
        CacheBackend::Redis => Ok(()),
        backend => Err(CliError::PersistentCacheRequired { command, backend }),
    }
}

async fn build_service(
    config: AppConfig,
    observer: Option<TransitionObserver>,
) -> Result<AggregationService, CliError> {
    let builder = AggregationServiceBuilder::from_config(config);
    let builder = match observer {
        Some(observer) => builder.with_observer(observer),
        None => builder,
    };
    Ok(builder.build().await?)
}
