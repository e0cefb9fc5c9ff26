use crate::calc::CalcError;
use crate::dataset::{Dataset, GradeRecord};
use serde::{Serialize, Serializer};
use serde_json::json;
use std::collections::BTreeSet;

/// Sentinel shown first in every option list.
pub const ALL: &str = "ALL";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Choice {
    #[default]
    All,
    Value(String),
}

impl Choice {
    #[cfg(test)]
    pub fn value(v: impl Into<String>) -> Self {
        Choice::Value(v.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Choice::All => ALL,
            Choice::Value(v) => v.as_str(),
        }
    }

    fn admits(&self, v: &str) -> bool {
        match self {
            Choice::All => true,
            Choice::Value(x) => x == v,
        }
    }

    /// `null`, a missing key and `"ALL"` (any case) all mean no restriction.
    pub fn parse(raw: Option<&serde_json::Value>, key: &str) -> Result<Choice, CalcError> {
        match raw {
            None => Ok(Choice::All),
            Some(v) if v.is_null() => Ok(Choice::All),
            Some(v) => {
                let Some(s) = v.as_str() else {
                    return Err(CalcError::new(
                        "bad_params",
                        format!("{} must be a string or null", key),
                    ));
                };
                if s.eq_ignore_ascii_case(ALL) || s.trim().is_empty() {
                    Ok(Choice::All)
                } else {
                    Ok(Choice::Value(s.to_string()))
                }
            }
        }
    }
}

impl Serialize for Choice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterLevel {
    Region,
    Municipality,
    School,
}

impl FilterLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterLevel::Region => "region",
            FilterLevel::Municipality => "municipality",
            FilterLevel::School => "school",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "region" => Some(FilterLevel::Region),
            "municipality" => Some(FilterLevel::Municipality),
            "school" => Some(FilterLevel::School),
            _ => None,
        }
    }
}

impl Serialize for FilterLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Cascading region → municipality → school selection.
///
/// Changing a level always resets every level below it; the school level
/// holds a display label, not a bare identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterSelection {
    pub region: Choice,
    pub municipality: Choice,
    pub school: Choice,
}

impl FilterSelection {
    pub fn get(&self, level: FilterLevel) -> &Choice {
        match level {
            FilterLevel::Region => &self.region,
            FilterLevel::Municipality => &self.municipality,
            FilterLevel::School => &self.school,
        }
    }

    /// Returns whether the selection changed. Re-selecting the current value is
    /// a no-op and keeps the lower levels.
    pub fn select(&mut self, level: FilterLevel, choice: Choice) -> bool {
        if *self.get(level) == choice {
            return false;
        }
        match level {
            FilterLevel::Region => {
                self.region = choice;
                self.municipality = Choice::All;
                self.school = Choice::All;
            }
            FilterLevel::Municipality => {
                self.municipality = choice;
                self.school = Choice::All;
            }
            FilterLevel::School => {
                self.school = choice;
            }
        }
        true
    }

    pub fn clear(&mut self) {
        *self = FilterSelection::default();
    }

    /// Validate top-down against the dataset; a value that is no longer among
    /// its level's options falls back to ALL together with everything below it.
    pub fn resolve(&mut self, ds: &Dataset) -> Vec<FilterLevel> {
        let mut corrected = Vec::new();
        for level in [
            FilterLevel::Region,
            FilterLevel::Municipality,
            FilterLevel::School,
        ] {
            let Choice::Value(v) = self.get(level).clone() else {
                continue;
            };
            let options = options_for(level, ds, self);
            if !options.iter().skip(1).any(|o| *o == v) {
                self.select(level, Choice::All);
                corrected.push(level);
            }
        }
        corrected
    }

    pub fn matches(&self, r: &GradeRecord) -> bool {
        self.region.admits(&r.region)
            && self.municipality.admits(&r.municipality)
            && self.school.admits(&r.school_label)
    }

    pub fn apply<'a>(&self, ds: &'a Dataset) -> Vec<&'a GradeRecord> {
        ds.rows.iter().filter(|r| self.matches(r)).collect()
    }
}

fn with_all(values: BTreeSet<&str>) -> Vec<String> {
    let mut out = Vec::with_capacity(values.len() + 1);
    out.push(ALL.to_string());
    out.extend(values.into_iter().map(|v| v.to_string()));
    out
}

/// Sorted distinct options for `level`, narrowed by the levels above it.
/// Always starts with the ALL sentinel.
pub fn options_for(level: FilterLevel, ds: &Dataset, sel: &FilterSelection) -> Vec<String> {
    let values: BTreeSet<&str> = match level {
        FilterLevel::Region => ds.rows.iter().map(|r| r.region.as_str()).collect(),
        FilterLevel::Municipality => ds
            .rows
            .iter()
            .filter(|r| sel.region.admits(&r.region))
            .map(|r| r.municipality.as_str())
            .collect(),
        FilterLevel::School => ds
            .rows
            .iter()
            .filter(|r| sel.region.admits(&r.region) && sel.municipality.admits(&r.municipality))
            .map(|r| r.school_label.as_str())
            .collect(),
    };
    with_all(values.into_iter().filter(|v| !v.trim().is_empty()).collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub regions: Vec<String>,
    pub municipalities: Vec<String>,
    pub schools: Vec<String>,
}

pub fn all_options(ds: &Dataset, sel: &FilterSelection) -> FilterOptions {
    FilterOptions {
        regions: options_for(FilterLevel::Region, ds, sel),
        municipalities: options_for(FilterLevel::Municipality, ds, sel),
        schools: options_for(FilterLevel::School, ds, sel),
    }
}

/// Parse an explicit `{region, municipality, school}` object. Absent object
/// means "use the session selection".
pub fn parse_selection(raw: Option<&serde_json::Value>) -> Result<Option<FilterSelection>, CalcError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "filters must be an object"));
    };
    let region = Choice::parse(obj.get("region"), "filters.region")?;
    let municipality = Choice::parse(obj.get("municipality"), "filters.municipality")?;
    let school = Choice::parse(obj.get("school"), "filters.school")?;
    Ok(Some(FilterSelection {
        region,
        municipality,
        school,
    }))
}

pub fn selection_json(ds: &Dataset, sel: &FilterSelection, corrected: &[FilterLevel]) -> serde_json::Value {
    json!({
        "selection": sel,
        "options": all_options(ds, sel),
        "corrected": corrected,
    })
}
