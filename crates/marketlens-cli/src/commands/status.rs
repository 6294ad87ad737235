use marketlens_core::AggregationService;

use crate::error::CliError;
use crate::output;

pub fn run(service: &AggregationService, pretty: bool) -> Result<(), CliError> {
    output::render(&service.circuit_breaker_statuses(), pretty)
}
