use crate::config;
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let loaded = match state.dataset.get() {
        None => "pending",
        Some(Ok(_)) => "loaded",
        Some(Err(_)) => "failed",
    };
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "datasetPath": config::dataset_path(&state.config).to_string_lossy(),
            "datasetState": loaded,
            "sessionCount": state.sessions.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        _ => None,
    }
}
