use std::sync::Arc;

use crate::calc::{CalcError, DenominatorMode};
use crate::config;
use crate::dataset::{self, Dataset, LoadOptions};
use crate::filters::{self, FilterLevel, FilterSelection};
use crate::ipc::error::{calc_err, data_unavailable, err};
use crate::ipc::types::{AppState, Request, DEFAULT_SESSION};
use crate::ranking::SortKey;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn session_id(req: &Request) -> Result<String, serde_json::Value> {
    match req.params.get("sessionId") {
        None => Ok(DEFAULT_SESSION.to_string()),
        Some(v) if v.is_null() => Ok(DEFAULT_SESSION.to_string()),
        Some(v) => v
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| err(&req.id, "bad_params", "sessionId must be a string", None)),
    }
}

/// Memoized load of the configured source. The first call pays for the read;
/// later calls, including after a failure, return the stored outcome.
pub fn dataset(state: &AppState, req: &Request) -> Result<Arc<Dataset>, serde_json::Value> {
    let outcome = state.dataset.get_or_init(|| {
        let path = config::dataset_path(&state.config);
        let opts = LoadOptions {
            table: state.config.dataset.table.clone(),
            max_rows: state.config.dataset.max_rows,
        };
        dataset::load(&path, &opts).map(Arc::new).map_err(|e| {
            tracing::error!("dataset unavailable: {}", e);
            e
        })
    });
    match outcome {
        Ok(ds) => Ok(Arc::clone(ds)),
        Err(e) => Err(data_unavailable(&req.id, e)),
    }
}

/// Where the effective selection of a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Session,
    Explicit,
}

impl SelectionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionSource::Session => "session",
            SelectionSource::Explicit => "explicit",
        }
    }
}

pub struct ResolvedSelection {
    pub selection: FilterSelection,
    pub corrected: Vec<FilterLevel>,
    pub source: SelectionSource,
}

/// Explicit `params.filters` wins over the session. Either way stale values are
/// corrected; for a session the corrected selection is written back.
pub fn resolve_selection(
    state: &mut AppState,
    req: &Request,
    ds: &Dataset,
) -> Result<ResolvedSelection, serde_json::Value> {
    let explicit =
        filters::parse_selection(req.params.get("filters")).map_err(|e| calc_err(&req.id, e))?;
    if let Some(mut selection) = explicit {
        let corrected = selection.resolve(ds);
        return Ok(ResolvedSelection {
            selection,
            corrected,
            source: SelectionSource::Explicit,
        });
    }

    let sid = session_id(req)?;
    let Some(selection) = state.sessions.get_mut(&sid) else {
        return Err(unknown_session(req, &sid));
    };
    let corrected = selection.resolve(ds);
    Ok(ResolvedSelection {
        selection: selection.clone(),
        corrected,
        source: SelectionSource::Session,
    })
}

pub fn unknown_session(req: &Request, sid: &str) -> serde_json::Value {
    err(
        &req.id,
        "unknown_session",
        format!("no such session: {}", sid),
        Some(serde_json::json!({ "sessionId": sid })),
    )
}

pub fn parse_sort_by(req: &Request, default: &str) -> Result<SortKey, serde_json::Value> {
    let raw = match req.params.get("sortBy") {
        None => default,
        Some(v) if v.is_null() => default,
        Some(v) => v.as_str().ok_or_else(|| {
            err(&req.id, "bad_params", "sortBy must be a string", None)
        })?,
    };
    SortKey::parse(raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("sortBy must be one of: {}", SortKey::allowed().join(", ")),
            Some(serde_json::json!({ "sortBy": raw })),
        )
    })
}

/// Page numbers are clamped later, so any integer is accepted here; 0 and
/// negatives land on page 1.
pub fn parse_page(req: &Request) -> Result<usize, serde_json::Value> {
    let Some(value) = req.params.get("page") else {
        return Ok(1);
    };
    if value.is_null() {
        return Ok(1);
    }
    if let Some(p) = value.as_u64() {
        return Ok(p as usize);
    }
    if value.as_i64().is_some() {
        return Ok(1);
    }
    Err(err(&req.id, "bad_params", "page must be an integer", None))
}

pub fn parse_page_size(req: &Request, default: usize) -> Result<usize, serde_json::Value> {
    let Some(value) = req.params.get("pageSize") else {
        return Ok(default);
    };
    if value.is_null() {
        return Ok(default);
    }
    let Some(size) = value.as_u64() else {
        return Err(err(
            &req.id,
            "bad_params",
            "pageSize must be a positive integer",
            None,
        ));
    };
    if size == 0 || size > 500 {
        return Err(err(
            &req.id,
            "bad_params",
            "pageSize must be in range 1..=500",
            None,
        ));
    }
    Ok(size as usize)
}

pub fn parse_bimester(req: &Request) -> Result<usize, serde_json::Value> {
    let Some(value) = req.params.get("bimester") else {
        return Ok(1);
    };
    match value.as_u64() {
        Some(b) if (1..=dataset::BIMESTERS as u64).contains(&b) => Ok(b as usize),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("bimester must be in range 1..={}", dataset::BIMESTERS),
            Some(serde_json::json!({ "bimester": value })),
        )),
    }
}

pub fn parse_denominator(state: &AppState, req: &Request) -> Result<DenominatorMode, serde_json::Value> {
    let default = if state.config.report.per_bimester_denominator {
        DenominatorMode::PerBimester
    } else {
        DenominatorMode::Bimester1
    };
    let Some(value) = req.params.get("denominator") else {
        return Ok(default);
    };
    if value.is_null() {
        return Ok(default);
    }
    value
        .as_str()
        .and_then(DenominatorMode::parse)
        .ok_or_else(|| {
            calc_err(
                &req.id,
                CalcError::new(
                    "bad_params",
                    "denominator must be one of: bimester1, perBimester",
                )
                .with_details(serde_json::json!({ "denominator": value })),
            )
        })
}
