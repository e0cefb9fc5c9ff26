use std::sync::Arc;

use crate::calc::{self, AggregateOptions, SeriesKind};
use crate::dataset::Dataset;
use crate::filters;
use crate::ipc::error::ok;
use crate::ipc::helpers::{self, ResolvedSelection};
use crate::ipc::types::{AppState, Request};
use crate::ranking;
use serde_json::json;

fn prepare(
    state: &mut AppState,
    req: &Request,
) -> Result<(Arc<Dataset>, ResolvedSelection), serde_json::Value> {
    let ds = helpers::dataset(state, req)?;
    let resolved = helpers::resolve_selection(state, req, &ds)?;
    Ok((ds, resolved))
}

fn filter_meta(resolved: &ResolvedSelection) -> serde_json::Value {
    json!({
        "selection": resolved.selection,
        "corrected": resolved.corrected,
        "source": resolved.source.as_str(),
    })
}

fn totals_json(state: &AppState, totals: &calc::Totals) -> serde_json::Value {
    let shown = state.config.report.display_bimesters;
    json!({
        "totals": totals,
        "missingSeries": calc::bimester_series(totals, SeriesKind::Missing, shown),
        "submittedSeries": calc::bimester_series(totals, SeriesKind::Submitted, shown),
    })
}

fn handle_report_totals(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mode = match helpers::parse_denominator(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (ds, resolved) = match prepare(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rows = resolved.selection.apply(&ds);
    let totals = calc::compute_totals(&rows, mode);

    let mut result = totals_json(state, &totals);
    result["empty"] = json!(rows.is_empty());
    result["filters"] = filter_meta(&resolved);
    ok(&req.id, result)
}

fn handle_report_regions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let bimester = match helpers::parse_bimester(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (ds, resolved) = match prepare(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rows = resolved.selection.apply(&ds);
    let table = calc::RegionTable {
        bimester,
        label: calc::bimester_label(bimester),
        rows: calc::compute_per_region(&rows, bimester, state.config.report.region_label_len),
    };

    ok(
        &req.id,
        json!({
            "regions": table,
            "empty": rows.is_empty(),
            "filters": filter_meta(&resolved),
        }),
    )
}

fn handle_report_schools(state: &mut AppState, req: &Request) -> serde_json::Value {
    let sort_by = match helpers::parse_sort_by(req, &state.config.report.default_sort) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let page = match helpers::parse_page(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let page_size = match helpers::parse_page_size(req, state.config.report.page_size) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (ds, resolved) = match prepare(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rows = resolved.selection.apply(&ds);
    let per_school = calc::compute_per_school(&rows);
    let ranked = ranking::rank(per_school.rows, sort_by, page, page_size);

    ok(
        &req.id,
        json!({
            "schools": ranked,
            "failures": per_school.failures,
            "sortKeys": ranking::SortKey::allowed(),
            "empty": rows.is_empty(),
            "filters": filter_meta(&resolved),
        }),
    )
}

/// One interaction's worth of output: filter state, headline metrics, bar
/// series, per-region tables and the ranked school page.
fn handle_report_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mode = match helpers::parse_denominator(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sort_by = match helpers::parse_sort_by(req, &state.config.report.default_sort) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let page = match helpers::parse_page(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let page_size = match helpers::parse_page_size(req, state.config.report.page_size) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (ds, resolved) = match prepare(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let rows = resolved.selection.apply(&ds);
    let opts = AggregateOptions {
        mode,
        region_bimesters: (1..=state.config.report.display_bimesters).collect(),
        label_len: state.config.report.region_label_len,
    };
    let agg = calc::aggregate(&rows, &opts);
    let ranked = ranking::rank(agg.per_school.rows, sort_by, page, page_size);

    let mut result = totals_json(state, &agg.totals);
    result["empty"] = json!(agg.empty);
    result["filters"] = filter_meta(&resolved);
    result["options"] = json!(filters::all_options(&ds, &resolved.selection));
    result["regions"] = json!(agg.per_region);
    result["schools"] = json!(ranked);
    result["failures"] = json!(agg.per_school.failures);
    result["sortKeys"] = json!(ranking::SortKey::allowed());
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.totals" => Some(handle_report_totals(state, req)),
        "report.regions" => Some(handle_report_regions(state, req)),
        "report.schools" => Some(handle_report_schools(state, req)),
        "report.open" => Some(handle_report_open(state, req)),
        _ => None,
    }
}
