use axum::response::Response;

use crate::error::ApiError;
use crate::filter::FilterOptions;
use crate::middleware::RequestId;
use crate::proxy::translate::{stat_request, ForwardContext};
use crate::proxy::{reshape, StatQuery};
use crate::AppState;

/// Run each stat's count in declaration order. A stat that fails validation
/// or gets an error status is left out; an unreachable upstream fails the batch.
pub(super) async fn collect(
    state: &AppState,
    table: &str,
    stats: &[StatQuery],
    options: &FilterOptions,
    ctx: &ForwardContext,
    request_id: &RequestId,
) -> Result<Response, ApiError> {
    let mut counts = Vec::with_capacity(stats.len());

    for stat in stats {
        if stat.name == "requestId" {
            tracing::warn!("Skipping stat with reserved name 'requestId'");
            continue;
        }

        let request = match stat_request(table, stat, options, ctx) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Stat '{}' on {} omitted, invalid filters: {}", stat.name, table, e);
                continue;
            }
        };

        let response = state.data_api.send(request).await?;
        if !response.status.is_success() {
            tracing::warn!("Stat '{}' on {} omitted, upstream responded {}", stat.name, table, response.status);
            continue;
        }

        match response.content_range_total() {
            Some(total) => counts.push((stat.name.clone(), total)),
            None => tracing::warn!("Stat '{}' on {} omitted, no count in response", stat.name, table),
        }
    }

    Ok(reshape::stats_response(counts, request_id))
}
