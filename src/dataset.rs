use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use std::time::Instant;

pub const BIMESTERS: usize = 4;

pub const COL_REGION: &str = "DIREC";
pub const COL_MUNICIPALITY: &str = "MUNICÍPIO";
pub const COL_SCHOOL: &str = "ESCOLA";
pub const COL_SCHOOL_ID: &str = "INEP ESCOLA";
pub const COL_STAGE: &str = "ETAPA_RESUMIDA";
pub const COL_GRADE_LEVEL: &str = "SÉRIE";

pub fn submitted_column(bimester: usize) -> String {
    format!("{}B_Notas Lancadas", bimester)
}

pub fn missing_column(bimester: usize) -> String {
    format!("{}B_Notas Nao Lancadas", bimester)
}

/// Every column the loader requires, in the order rows are decoded.
pub fn expected_columns() -> Vec<String> {
    let mut cols: Vec<String> = [
        COL_REGION,
        COL_MUNICIPALITY,
        COL_SCHOOL,
        COL_SCHOOL_ID,
        COL_STAGE,
        COL_GRADE_LEVEL,
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    for b in 1..=BIMESTERS {
        cols.push(submitted_column(b));
        cols.push(missing_column(b));
    }
    cols
}

/// One school/series/subject-period grouping unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub region: String,
    pub municipality: String,
    pub school_name: String,
    pub school_id: String,
    pub school_label: String,
    pub stage: String,
    pub grade_level: String,
    /// Index 0 is the 1st bimester.
    pub submitted: [f64; BIMESTERS],
    pub missing: [f64; BIMESTERS],
}

impl GradeRecord {
    pub fn new(region: &str, municipality: &str, school_name: &str, school_id: &str) -> Self {
        let school_name = school_name.trim().to_string();
        let school_id = canonical_id(school_id);
        let school_label = display_label(&school_name, &school_id);
        Self {
            region: region.trim().to_string(),
            municipality: municipality.trim().to_string(),
            school_name,
            school_id,
            school_label,
            stage: String::new(),
            grade_level: String::new(),
            submitted: [0.0; BIMESTERS],
            missing: [0.0; BIMESTERS],
        }
    }

    #[cfg(test)]
    pub fn with_counts(mut self, bimester: usize, submitted: f64, missing: f64) -> Self {
        self.submitted[bimester - 1] = submitted;
        self.missing[bimester - 1] = missing;
        self
    }
}

pub fn display_label(name: &str, id: &str) -> String {
    format!("{} (cód. Inep: {})", name, id)
}

/// Identifiers arrive as text, integers or integer-valued reals depending on the
/// exporter. All of them collapse to the same digits-only key.
pub fn canonical_id(raw: &str) -> String {
    let t = raw.trim();
    if let Some((int, frac)) = t.split_once('.') {
        if !int.is_empty()
            && !frac.is_empty()
            && int.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b == b'0')
        {
            return int.to_string();
        }
    }
    t.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Sqlite,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(SourceFormat::Csv),
            "sqlite" | "sqlite3" | "db" => Some(SourceFormat::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub path: String,
    pub format: SourceFormat,
    pub fingerprint: String,
    pub loaded_at: String,
    pub load_ms: u128,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("dataset file not found: {0}")]
    NotFound(String),
    #[error("failed to read dataset {path}: {message}")]
    Unreadable { path: String, message: String },
    #[error("unsupported dataset format: {0}")]
    UnsupportedFormat(String),
    #[error("dataset is missing expected columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("row {row}: column {column} is not numeric: {value:?}")]
    BadValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("row {row}: expected {expected} fields, found {found}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("dataset has more than {limit} rows")]
    TooLarge { limit: usize },
}

impl LoadError {
    pub fn details(&self) -> serde_json::Value {
        match self {
            LoadError::NotFound(path) => json!({ "path": path }),
            LoadError::Unreadable { path, .. } => json!({ "path": path }),
            LoadError::UnsupportedFormat(path) => {
                json!({ "path": path, "supported": ["csv", "sqlite", "sqlite3", "db"] })
            }
            LoadError::MissingColumns(cols) => json!({ "missingColumns": cols }),
            LoadError::BadValue { row, column, value } => {
                json!({ "row": row, "column": column, "value": value })
            }
            LoadError::RaggedRow {
                row,
                expected,
                found,
            } => json!({ "row": row, "expectedFields": expected, "foundFields": found }),
            LoadError::TooLarge { limit } => json!({ "maxRows": limit }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub table: String,
    pub max_rows: usize,
}

/// Read-only, normalized grade-submission table.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub rows: Vec<GradeRecord>,
    pub source: Option<SourceInfo>,
}

impl Dataset {
    #[cfg(test)]
    pub fn from_rows(rows: Vec<GradeRecord>) -> Self {
        Self { rows, source: None }
    }

    pub fn distinct<'a, F>(&'a self, f: F) -> Vec<&'a str>
    where
        F: Fn(&'a GradeRecord) -> &'a str,
    {
        let set: BTreeSet<&str> = self
            .rows
            .iter()
            .map(f)
            .filter(|v| !v.trim().is_empty())
            .collect();
        set.into_iter().collect()
    }

    pub fn info_json(&self) -> serde_json::Value {
        json!({
            "rowCount": self.rows.len(),
            "regionCount": self.distinct(|r| r.region.as_str()).len(),
            "municipalityCount": self.distinct(|r| r.municipality.as_str()).len(),
            "schoolCount": self.distinct(|r| r.school_id.as_str()).len(),
            "stages": self.distinct(|r| r.stage.as_str()),
            "gradeLevels": self.distinct(|r| r.grade_level.as_str()),
            "source": self.source,
        })
    }
}

/// Raw cell as handed over by either backend, before normalization.
#[derive(Debug, Clone)]
enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    fn text(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Int(i) => i.to_string(),
            Cell::Real(f) => f.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }

    fn number(&self, row: usize, column: &str) -> Result<f64, LoadError> {
        match self {
            Cell::Null => Ok(0.0),
            Cell::Int(i) => Ok(*i as f64),
            Cell::Real(f) => Ok(*f),
            Cell::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return Ok(0.0);
                }
                t.parse::<f64>().map_err(|_| LoadError::BadValue {
                    row,
                    column: column.to_string(),
                    value: s.clone(),
                })
            }
        }
    }
}

fn decode_row(row: usize, cells: &[Cell], columns: &[String]) -> Result<GradeRecord, LoadError> {
    let mut rec = GradeRecord::new(
        &cells[0].text(),
        &cells[1].text(),
        &cells[2].text(),
        &cells[3].text(),
    );
    rec.stage = cells[4].text();
    rec.grade_level = cells[5].text();
    for b in 0..BIMESTERS {
        let s_idx = 6 + 2 * b;
        let m_idx = s_idx + 1;
        rec.submitted[b] = cells[s_idx].number(row, &columns[s_idx])?;
        rec.missing[b] = cells[m_idx].number(row, &columns[m_idx])?;
    }
    Ok(rec)
}

/// Load and normalize the source table.
pub fn load(path: &Path, opts: &LoadOptions) -> Result<Dataset, LoadError> {
    let started = Instant::now();
    let path_str = path.to_string_lossy().to_string();
    if !path.is_file() {
        return Err(LoadError::NotFound(path_str));
    }
    let Some(format) = SourceFormat::from_path(path) else {
        return Err(LoadError::UnsupportedFormat(path_str));
    };

    let rows = match format {
        SourceFormat::Csv => read_csv(path, opts)?,
        SourceFormat::Sqlite => read_sqlite(path, opts)?,
    };
    let fingerprint = file_fingerprint(path)?;
    let load_ms = started.elapsed().as_millis();

    tracing::info!(
        rows = rows.len(),
        load_ms = load_ms as u64,
        fingerprint = %fingerprint,
        "dataset loaded from {}",
        path_str
    );

    Ok(Dataset {
        rows,
        source: Some(SourceInfo {
            path: path_str,
            format,
            fingerprint,
            loaded_at: chrono::Utc::now().to_rfc3339(),
            load_ms,
        }),
    })
}

fn unreadable(path: &Path, e: impl std::fmt::Display) -> LoadError {
    LoadError::Unreadable {
        path: path.to_string_lossy().to_string(),
        message: e.to_string(),
    }
}

fn file_fingerprint(path: &Path) -> Result<String, LoadError> {
    let mut file = File::open(path).map_err(|e| unreadable(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| unreadable(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn csv_error(path: &Path, row: usize, e: csv::Error) -> LoadError {
    if let csv::ErrorKind::UnequalLengths { expected_len, len, .. } = e.kind() {
        return LoadError::RaggedRow {
            row,
            expected: *expected_len as usize,
            found: *len as usize,
        };
    }
    unreadable(path, e)
}

fn read_csv(path: &Path, opts: &LoadOptions) -> Result<Vec<GradeRecord>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|e| unreadable(path, e))?;
    let headers = rdr.headers().map_err(|e| unreadable(path, e))?.clone();

    let columns = expected_columns();
    let mut positions: Vec<usize> = Vec::with_capacity(columns.len());
    let mut missing: Vec<String> = Vec::new();
    for col in &columns {
        match headers.iter().position(|h| h == col) {
            Some(i) => positions.push(i),
            None => missing.push(col.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns(missing));
    }

    let mut out = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        // Header is line 1.
        let row = idx + 2;
        let record = result.map_err(|e| csv_error(path, row, e))?;
        if out.len() >= opts.max_rows {
            return Err(LoadError::TooLarge {
                limit: opts.max_rows,
            });
        }
        let cells: Vec<Cell> = positions
            .iter()
            .map(|&i| match record.get(i) {
                Some(v) => Cell::Text(v.to_string()),
                None => Cell::Null,
            })
            .collect();
        out.push(decode_row(row, &cells, &columns)?);
    }
    Ok(out)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn read_sqlite(path: &Path, opts: &LoadOptions) -> Result<Vec<GradeRecord>, LoadError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| unreadable(path, e))?;

    let table = quote_ident(&opts.table);
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(|e| unreadable(path, e))?;
    let present: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(1))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| unreadable(path, e))?;

    let columns = expected_columns();
    let missing: Vec<String> = columns
        .iter()
        .filter(|c| !present.iter().any(|p| p == *c))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns(missing));
    }

    let select = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {} FROM {} ORDER BY rowid", select, table);
    let mut stmt = conn.prepare(&sql).map_err(|e| unreadable(path, e))?;
    let mut rows = stmt.query([]).map_err(|e| unreadable(path, e))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| unreadable(path, e))? {
        if out.len() >= opts.max_rows {
            return Err(LoadError::TooLarge {
                limit: opts.max_rows,
            });
        }
        let mut cells = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let v: Value = row.get(i).map_err(|e| unreadable(path, e))?;
            cells.push(match v {
                Value::Null => Cell::Null,
                Value::Integer(n) => Cell::Int(n),
                Value::Real(f) if i == 3 && f.fract() == 0.0 => Cell::Int(f as i64),
                Value::Real(f) => Cell::Real(f),
                Value::Text(s) => Cell::Text(s),
                Value::Blob(b) => Cell::Text(String::from_utf8_lossy(&b).to_string()),
            });
        }
        out.push(decode_row(out.len() + 1, &cells, &columns)?);
    }
    Ok(out)
}
