use crate::filters::FilterSelection;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request, DEFAULT_SESSION};
use serde_json::json;
use uuid::Uuid;

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let sid = Uuid::new_v4().to_string();
    state
        .sessions
        .insert(sid.clone(), FilterSelection::default());
    tracing::info!(session = %sid, "session opened");
    ok(
        &req.id,
        json!({
            "sessionId": sid,
            "selection": FilterSelection::default(),
        }),
    )
}

fn handle_session_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let sid = match helpers::required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if sid == DEFAULT_SESSION {
        return err(
            &req.id,
            "bad_params",
            "the default session cannot be closed",
            None,
        );
    }
    if state.sessions.remove(&sid).is_none() {
        return helpers::unknown_session(req, &sid);
    }
    tracing::info!(session = %sid, "session closed");
    ok(&req.id, json!({ "sessionId": sid, "closed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.open" => Some(handle_session_open(state, req)),
        "session.close" => Some(handle_session_close(state, req)),
        _ => None,
    }
}
