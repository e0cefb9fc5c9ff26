use crate::filters::{self, Choice, FilterLevel};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_filters_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ds = match helpers::dataset(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sid = match helpers::session_id(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(selection) = state.sessions.get_mut(&sid) else {
        return helpers::unknown_session(req, &sid);
    };
    let corrected = selection.resolve(&ds);
    let mut result = filters::selection_json(&ds, selection, &corrected);
    result["sessionId"] = json!(sid);
    ok(&req.id, result)
}

fn handle_filters_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ds = match helpers::dataset(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sid = match helpers::session_id(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let level_raw = match helpers::required_str(req, "level") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(level) = FilterLevel::parse(&level_raw) else {
        return err(
            &req.id,
            "bad_params",
            "level must be one of: region, municipality, school",
            Some(json!({ "level": level_raw })),
        );
    };
    let choice = match Choice::parse(req.params.get("value"), "value") {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };

    let Some(selection) = state.sessions.get_mut(&sid) else {
        return helpers::unknown_session(req, &sid);
    };
    let changed = selection.select(level, choice);
    let corrected = selection.resolve(&ds);
    if !corrected.is_empty() {
        tracing::debug!(session = %sid, ?corrected, "stale filter values reset");
    }

    let mut result = filters::selection_json(&ds, selection, &corrected);
    result["sessionId"] = json!(sid);
    result["changed"] = json!(changed);
    ok(&req.id, result)
}

fn handle_filters_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ds = match helpers::dataset(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sid = match helpers::session_id(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(selection) = state.sessions.get_mut(&sid) else {
        return helpers::unknown_session(req, &sid);
    };
    selection.clear();

    let mut result = filters::selection_json(&ds, selection, &[]);
    result["sessionId"] = json!(sid);
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "filters.get" => Some(handle_filters_get(state, req)),
        "filters.set" => Some(handle_filters_set(state, req)),
        "filters.clear" => Some(handle_filters_clear(state, req)),
        _ => None,
    }
}
