use crate::dataset::{GradeRecord, BIMESTERS};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Bimesters shown in the per-school ranking table.
pub const RANKED_BIMESTERS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Nearest integer, with exact halves going to the even neighbour.
pub fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - x.signum()
    } else {
        r
    }
}

/// 1-decimal rounding used by every percentage in the report.
pub fn round_1_decimal(x: f64) -> f64 {
    round_half_even(x * 10.0) / 10.0
}

/// `round(part / whole * 100, 1)`, or 0 when the denominator is empty.
pub fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 && part.is_finite() && whole.is_finite() {
        round_1_decimal(part / whole * 100.0)
    } else {
        0.0
    }
}

/// Column sums skip NaN cells, matching how the exported table was summed upstream.
fn sum_counts<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().filter(|v| !v.is_nan()).sum()
}

pub fn bimester_label(bimester: usize) -> String {
    format!("{}º Bimestre", bimester)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DenominatorMode {
    /// Every bimester is divided by the 1st bimester's submitted+missing.
    #[default]
    Bimester1,
    PerBimester,
}

impl DenominatorMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "bimester1" => Some(DenominatorMode::Bimester1),
            "perBimester" => Some(DenominatorMode::PerBimester),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterTotals {
    pub bimester: usize,
    pub label: String,
    pub submitted: f64,
    pub missing: f64,
    pub denominator: f64,
    pub submitted_pct: f64,
    pub missing_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub row_count: usize,
    pub total_registros: f64,
    pub denominator_mode: DenominatorMode,
    pub bimesters: Vec<BimesterTotals>,
}

pub fn compute_totals(rows: &[&GradeRecord], mode: DenominatorMode) -> Totals {
    let mut submitted = [0.0_f64; BIMESTERS];
    let mut missing = [0.0_f64; BIMESTERS];
    for b in 0..BIMESTERS {
        submitted[b] = sum_counts(rows.iter().map(|r| r.submitted[b]));
        missing[b] = sum_counts(rows.iter().map(|r| r.missing[b]));
    }
    let total_registros = submitted[0] + missing[0];

    let bimesters = (0..BIMESTERS)
        .map(|b| {
            let denominator = match mode {
                DenominatorMode::Bimester1 => total_registros,
                DenominatorMode::PerBimester => submitted[b] + missing[b],
            };
            BimesterTotals {
                bimester: b + 1,
                label: bimester_label(b + 1),
                submitted: submitted[b],
                missing: missing[b],
                denominator,
                submitted_pct: percent(submitted[b], denominator),
                missing_pct: percent(missing[b], denominator),
            }
        })
        .collect();

    Totals {
        row_count: rows.len(),
        total_registros,
        denominator_mode: mode,
        bimesters,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Missing,
    Submitted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub category: String,
    pub value: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub points: Vec<SeriesPoint>,
    pub max_value: f64,
    pub total_registros: f64,
}

/// Bar-chart rows for the first `display_bimesters` bimesters.
pub fn bimester_series(totals: &Totals, kind: SeriesKind, display_bimesters: usize) -> ChartSeries {
    let points: Vec<SeriesPoint> = totals
        .bimesters
        .iter()
        .take(display_bimesters)
        .map(|b| {
            let (value, percentage) = match kind {
                SeriesKind::Missing => (b.missing, b.missing_pct),
                SeriesKind::Submitted => (b.submitted, b.submitted_pct),
            };
            SeriesPoint {
                category: b.label.clone(),
                value,
                percentage,
            }
        })
        .collect();
    let max_value = points.iter().map(|p| p.value).fold(0.0_f64, f64::max);
    ChartSeries {
        points,
        max_value,
        total_registros: totals.total_registros,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionAggregate {
    pub region: String,
    pub label: String,
    pub submitted: f64,
    pub missing: f64,
    pub total: f64,
    pub submitted_pct: f64,
    pub missing_pct: f64,
}

pub fn truncate_label(region: &str, max_chars: usize) -> String {
    region.chars().take(max_chars).collect()
}

/// One row per distinct non-blank region, sorted by region, for one bimester.
pub fn compute_per_region(
    rows: &[&GradeRecord],
    bimester: usize,
    label_len: usize,
) -> Vec<RegionAggregate> {
    let b = bimester - 1;
    let mut groups: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for r in rows {
        if r.region.trim().is_empty() {
            continue;
        }
        let entry = groups.entry(r.region.as_str()).or_insert((0.0, 0.0));
        if !r.submitted[b].is_nan() {
            entry.0 += r.submitted[b];
        }
        if !r.missing[b].is_nan() {
            entry.1 += r.missing[b];
        }
    }

    groups
        .into_iter()
        .map(|(region, (submitted, missing))| {
            let submitted = round_half_even(submitted);
            let missing = round_half_even(missing);
            let total = submitted + missing;
            RegionAggregate {
                region: region.to_string(),
                label: truncate_label(region, label_len),
                submitted,
                missing,
                total,
                submitted_pct: percent(submitted, total),
                missing_pct: percent(missing, total),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionTable {
    pub bimester: usize,
    pub label: String,
    pub rows: Vec<RegionAggregate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolAggregate {
    pub school_id: String,
    pub region: String,
    pub municipality: String,
    pub school: String,
    pub missing_pct_b1: f64,
    pub missing_pct_b2: f64,
    pub missing_pct_b3: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolFailure {
    pub school_id: String,
    pub school: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerSchool {
    pub rows: Vec<SchoolAggregate>,
    pub failures: Vec<SchoolFailure>,
}

struct SchoolAcc<'a> {
    first: &'a GradeRecord,
    submitted: [f64; RANKED_BIMESTERS],
    missing: [f64; RANKED_BIMESTERS],
    fault: Option<String>,
}

/// NaN is an absent cell and is skipped like in the column sums; infinities
/// and negative counts make the school unrankable.
fn count_fault(value: f64, column: &str, bimester: usize) -> Option<String> {
    if value.is_nan() {
        None
    } else if value.is_infinite() {
        Some(format!("infinite {} count in bimester {}", column, bimester))
    } else if value < 0.0 {
        Some(format!("negative {} count in bimester {}", column, bimester))
    } else {
        None
    }
}

/// One row per distinct school identifier, in first-appearance order.
///
/// A school with a malformed count is moved to `failures` and the rest of the
/// schools are still computed.
pub fn compute_per_school(rows: &[&GradeRecord]) -> PerSchool {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut accs: Vec<SchoolAcc> = Vec::new();

    for &r in rows {
        let idx = *index.entry(r.school_id.as_str()).or_insert_with(|| {
            accs.push(SchoolAcc {
                first: r,
                submitted: [0.0; RANKED_BIMESTERS],
                missing: [0.0; RANKED_BIMESTERS],
                fault: None,
            });
            accs.len() - 1
        });
        let acc = &mut accs[idx];
        for b in 0..RANKED_BIMESTERS {
            if acc.fault.is_none() {
                acc.fault = count_fault(r.submitted[b], "submitted", b + 1)
                    .or_else(|| count_fault(r.missing[b], "missing", b + 1));
            }
            if !r.submitted[b].is_nan() {
                acc.submitted[b] += r.submitted[b];
            }
            if !r.missing[b].is_nan() {
                acc.missing[b] += r.missing[b];
            }
        }
    }

    let mut out = PerSchool::default();
    for acc in accs {
        let school = acc.first.school_label.clone();
        if let Some(reason) = acc.fault {
            tracing::warn!(school_id = %acc.first.school_id, "skipping school: {}", reason);
            out.failures.push(SchoolFailure {
                school_id: acc.first.school_id.clone(),
                school,
                reason,
            });
            continue;
        }
        let pct = |b: usize| percent(acc.missing[b], acc.submitted[b] + acc.missing[b]);
        out.rows.push(SchoolAggregate {
            school_id: acc.first.school_id.clone(),
            region: acc.first.region.clone(),
            municipality: acc.first.municipality.clone(),
            school,
            missing_pct_b1: pct(0),
            missing_pct_b2: pct(1),
            missing_pct_b3: pct(2),
        });
    }
    out
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub mode: DenominatorMode,
    pub region_bimesters: Vec<usize>,
    pub label_len: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub empty: bool,
    pub totals: Totals,
    pub per_region: Vec<RegionTable>,
    pub per_school: PerSchool,
}

/// Totals, per-region tables and per-school rows for an already filtered set.
/// An empty set is not an error: everything degrades to zeros and empty lists.
pub fn aggregate(rows: &[&GradeRecord], opts: &AggregateOptions) -> Aggregate {
    let per_region = opts
        .region_bimesters
        .iter()
        .map(|&b| RegionTable {
            bimester: b,
            label: bimester_label(b),
            rows: compute_per_region(rows, b, opts.label_len),
        })
        .collect();
    Aggregate {
        empty: rows.is_empty(),
        totals: compute_totals(rows, opts.mode),
        per_region,
        per_school: compute_per_school(rows),
    }
}
