use crate::calc::SchoolAggregate;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortKey {
    #[serde(rename = "missingPctB1")]
    MissingPctB1,
    #[serde(rename = "missingPctB2")]
    MissingPctB2,
    #[serde(rename = "missingPctB3")]
    MissingPctB3,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "missingPctB1" => Some(SortKey::MissingPctB1),
            "missingPctB2" => Some(SortKey::MissingPctB2),
            "missingPctB3" => Some(SortKey::MissingPctB3),
            _ => None,
        }
    }

    pub fn allowed() -> &'static [&'static str] {
        &["missingPctB1", "missingPctB2", "missingPctB3"]
    }

    fn value(self, row: &SchoolAggregate) -> f64 {
        match self {
            SortKey::MissingPctB1 => row.missing_pct_b1,
            SortKey::MissingPctB2 => row.missing_pct_b2,
            SortKey::MissingPctB3 => row.missing_pct_b3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPage {
    pub rows: Vec<SchoolAggregate>,
    pub sort_by: SortKey,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_rows: usize,
    /// 1-based, inclusive; both 0 when there are no rows.
    pub range_start: usize,
    pub range_end: usize,
}

pub fn total_pages(total_rows: usize, page_size: usize) -> usize {
    let page_size = page_size.max(1);
    std::cmp::max(1, (total_rows + page_size - 1) / page_size)
}

/// Sort descending by `sort_by` (stable, so equal values keep insertion order)
/// and cut out `page`, clamped into `[1, total_pages]`.
pub fn rank(
    mut rows: Vec<SchoolAggregate>,
    sort_by: SortKey,
    page: usize,
    page_size: usize,
) -> RankedPage {
    let page_size = page_size.max(1);
    rows.sort_by(|a, b| {
        sort_by
            .value(b)
            .partial_cmp(&sort_by.value(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total_rows = rows.len();
    let total_pages = total_pages(total_rows, page_size);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * page_size;
    let end = std::cmp::min(start + page_size, total_rows);
    let paged: Vec<SchoolAggregate> = if start < end {
        rows.drain(start..end).collect()
    } else {
        Vec::new()
    };

    RankedPage {
        range_start: if paged.is_empty() { 0 } else { start + 1 },
        range_end: if paged.is_empty() { 0 } else { end },
        rows: paged,
        sort_by,
        page,
        page_size,
        total_pages,
        total_rows,
    }
}
