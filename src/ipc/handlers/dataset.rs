use crate::ipc::error::{data_unavailable, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_dataset_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cached = state.dataset.get().is_some();
    let ds = match helpers::dataset(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut info = ds.info_json();
    info["cached"] = json!(cached);
    ok(&req.id, info)
}

/// Reports what is loaded without triggering a load.
fn handle_dataset_info(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.dataset.get() {
        None => ok(&req.id, json!({ "loaded": false })),
        Some(Ok(ds)) => {
            let mut info = ds.info_json();
            info["loaded"] = json!(true);
            ok(&req.id, info)
        }
        Some(Err(e)) => data_unavailable(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dataset.load" => Some(handle_dataset_load(state, req)),
        "dataset.info" => Some(handle_dataset_info(state, req)),
        _ => None,
    }
}
