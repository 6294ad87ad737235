use marketlens_core::AggregationService;

use crate::error::CliError;
use crate::output;

pub async fn run(service: &AggregationService, pretty: bool) -> Result<(), CliError> {
    match service.get_cached().await {
        Some(aggregate) => output::render(&aggregate, pretty),
        None => Err(CliError::CacheMiss),
    }
}
