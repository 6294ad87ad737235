use marketlens_core::AggregationService;
use tracing::info;

use crate::cli::LiveArgs;
use crate::error::CliError;
use crate::output;

/// A `status: error` aggregate is still a successful command.
pub async fn run(args: &LiveArgs, service: &AggregationService, pretty: bool) -> Result<(), CliError> {
    let options = args.to_options();
    options.validate()?;

    let aggregate = service.get_live(&options).await;
    info!(
        status = %aggregate.status,
        latency_ms = aggregate.meta.latency_ms,
        "live aggregation finished"
    );
    output::render(&aggregate, pretty)
}
