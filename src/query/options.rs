use crate::driver::{Collation, CollationStrength, FindOneOptions, FindOptions};
use bson::Document;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Native encoding: `1` ascending, `-1` descending.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

impl From<&str> for SortDirection {
    /// `"desc"`/`"descending"` (any case) is descending; everything else ascending.
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "desc" | "descending" | "-1" => Self::Descending,
            _ => Self::Ascending,
        }
    }
}

/// Generic query options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryOption {
    FirstRow,
    MaxRows(i64),
    Fields(Vec<String>),
    Sort { field: String, direction: SortDirection },
    CaseSensitive(bool),
}

impl QueryOption {
    #[must_use]
    pub const fn first_row() -> Self {
        Self::FirstRow
    }

    #[must_use]
    pub const fn max_rows(n: i64) -> Self {
        Self::MaxRows(n)
    }

    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fields(fields.into_iter().map(Into::into).collect())
    }

    pub fn sort_asc(field: impl Into<String>) -> Self {
        Self::Sort { field: field.into(), direction: SortDirection::Ascending }
    }

    pub fn sort_desc(field: impl Into<String>) -> Self {
        Self::Sort { field: field.into(), direction: SortDirection::Descending }
    }

    #[must_use]
    pub const fn case_sensitive(sensitive: bool) -> Self {
        Self::CaseSensitive(sensitive)
    }
}

impl fmt::Display for QueryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstRow => f.write_str("first-row"),
            Self::MaxRows(n) => write!(f, "max-rows({n})"),
            Self::Fields(fields) => write!(f, "fields({})", fields.join(",")),
            Self::Sort { field, direction } => write!(f, "sort({field} {})", direction.as_i32()),
            Self::CaseSensitive(b) => write!(f, "case-sensitive({b})"),
        }
    }
}

/// Renders an option list for error details and logs.
#[must_use]
pub fn describe(options: &[QueryOption]) -> String {
    let parts: Vec<String> = options.iter().map(ToString::to_string).collect();
    format!("options: [{}]", parts.join(", "))
}

/// Native options for a multi-document find; `None` when `options` is empty.
///
/// Options apply in encounter order, later ones of the same kind overwriting earlier ones.
/// `FirstRow` is the exception: once present the limit is 1 whatever `MaxRows` says.
#[must_use]
pub fn to_multi_options(options: &[QueryOption]) -> Option<FindOptions> {
    if options.is_empty() {
        return None;
    }
    let mut out = FindOptions::default();
    let mut first_row = false;
    for option in options {
        match option {
            QueryOption::FirstRow => first_row = true,
            QueryOption::MaxRows(n) => {
                if *n > 0 {
                    out.limit = Some(*n);
                }
            }
            QueryOption::Fields(fields) => out.projection = Some(projection(fields)),
            QueryOption::Sort { field, direction } => {
                let mut sort = Document::new();
                sort.insert(field.as_str(), direction.as_i32());
                out.sort = Some(sort);
            }
            QueryOption::CaseSensitive(sensitive) => out.collation = Some(collation(*sensitive)),
        }
    }
    if first_row {
        out.limit = Some(1);
    }
    Some(out)
}

/// Native options for a single-document find; `None` when `options` is empty.
/// Row limits and sorting mean nothing for a single result and are ignored.
#[must_use]
pub fn to_single_options(options: &[QueryOption]) -> Option<FindOneOptions> {
    if options.is_empty() {
        return None;
    }
    let mut out = FindOneOptions::default();
    for option in options {
        match option {
            QueryOption::Fields(fields) => out.projection = Some(projection(fields)),
            QueryOption::CaseSensitive(sensitive) => out.collation = Some(collation(*sensitive)),
            QueryOption::FirstRow | QueryOption::MaxRows(_) | QueryOption::Sort { .. } => {}
        }
    }
    Some(out)
}

fn projection(fields: &[String]) -> Document {
    let mut out = Document::new();
    for field in fields.iter().filter(|f| !f.is_empty()) {
        out.insert(field.as_str(), 1);
    }
    out
}

fn collation(case_sensitive: bool) -> Collation {
    if case_sensitive {
        Collation::new(CollationStrength::Tertiary)
    } else {
        Collation::new(CollationStrength::Secondary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn empty_options_yield_none() {
        assert!(to_multi_options(&[]).is_none());
        assert!(to_single_options(&[]).is_none());
    }

    #[test]
    fn non_positive_max_rows_sets_no_limit() {
        assert_eq!(to_multi_options(&[QueryOption::max_rows(0)]).unwrap().limit, None);
        assert_eq!(to_multi_options(&[QueryOption::max_rows(-5)]).unwrap().limit, None);
        assert_eq!(to_multi_options(&[QueryOption::max_rows(25)]).unwrap().limit, Some(25));
    }

    #[test]
    fn first_row_wins_regardless_of_order() {
        let before = to_multi_options(&[QueryOption::first_row(), QueryOption::max_rows(10)]).unwrap();
        let after = to_multi_options(&[QueryOption::max_rows(10), QueryOption::first_row()]).unwrap();
        assert_eq!(before.limit, Some(1));
        assert_eq!(after.limit, Some(1));
    }

    #[test]
    fn projection_skips_blank_names() {
        let out = to_multi_options(&[QueryOption::fields(["name", "", "age"])]).unwrap();
        assert_eq!(out.projection, Some(doc! { "name": 1, "age": 1 }));
    }

    #[test]
    fn later_sort_overwrites_earlier() {
        let out = to_multi_options(&[QueryOption::sort_asc("a"), QueryOption::sort_desc("b")]).unwrap();
        assert_eq!(out.sort, Some(doc! { "b": -1 }));
    }

    #[test]
    fn collation_strength_follows_case_sensitivity() {
        let sensitive = to_multi_options(&[QueryOption::case_sensitive(true)]).unwrap();
        let insensitive = to_single_options(&[QueryOption::case_sensitive(false)]).unwrap();
        assert_eq!(sensitive.collation.unwrap().strength.level(), 3);
        let c = insensitive.collation.unwrap();
        assert_eq!(c.strength.level(), 2);
        assert_eq!(c.locale, "en");
    }

    #[test]
    fn single_options_ignore_limits_and_sort() {
        let out = to_single_options(&[
            QueryOption::first_row(),
            QueryOption::sort_desc("a"),
            QueryOption::fields(["a"]),
        ])
        .unwrap();
        assert_eq!(out, FindOneOptions { projection: Some(doc! { "a": 1 }), collation: None });
    }

    #[test]
    fn sort_direction_parsing() {
        assert_eq!(SortDirection::from("DESC"), SortDirection::Descending);
        assert_eq!(SortDirection::from("up"), SortDirection::Ascending);
    }
}
