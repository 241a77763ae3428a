//! Context catalog inspection endpoint.
//!
//! Lets operators confirm which prompt fragments were discovered for the
//! configured client without digging through logs.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn list_contexts(state: web::Data<AppState>) -> HttpResponse {
    let contexts: Vec<serde_json::Value> = state
        .catalog
        .names()
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "size_bytes": state.catalog.get(name).map(str::len).unwrap_or(0)
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "client_id": state.catalog.client_id(),
        "base_prompt_bytes": state.catalog.base_prompt().len(),
        "count": contexts.len(),
        "contexts": contexts
    }))
}
