use marketlens_core::AggregationService;
use serde_json::json;

use crate::error::CliError;
use crate::output;

pub async fn run(service: &AggregationService, pretty: bool) -> Result<(), CliError> {
    let cleared = service.clear_cache().await;
    output::render(
        &json!({
            "backend": service.cache_backend(),
            "cleared": cleared,
        }),
        pretty,
    )
}
