use std::time::Duration;

use marketlens_core::AggregationService;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cli::WatchArgs;
use crate::error::CliError;
use crate::output;

/// Refresh loop. Stops after `--iterations` passes or on Ctrl-C.
pub async fn run(args: &WatchArgs, service: &AggregationService) -> Result<(), CliError> {
    let options = args.live.to_options();
    options.validate()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut passes: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!(passes, "watch interrupted");
                return Ok(());
            }
        }

        let aggregate = service.get_live(&options).await;
        debug!(
            request_id = %aggregate.meta.request_id,
            status = %aggregate.status,
            "watch pass finished"
        );
        output::render_line(&aggregate)?;

        passes += 1;
        if args.iterations.is_some_and(|limit| passes >= limit) {
            return Ok(());
        }
    }
}
