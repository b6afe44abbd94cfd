//! OpenAPI documentation definition.

use metrica_core::{Metric, MetricKind, StoreSnapshot};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_update_path,
        crate::handlers::handle_update_json,
        crate::handlers::handle_updates,
        crate::handlers::handle_value_path,
        crate::handlers::handle_value_json,
        crate::handlers::handle_list,
        crate::handlers::handle_ping,
    ),
    components(schemas(Metric, MetricKind, StoreSnapshot)),
    info(
        title = "metrica API",
        version = "1.0",
        description = "Metric ingestion API: gauge and counter updates from agents, value lookups and listing"
    )
)]
pub(crate) struct ApiDoc;
