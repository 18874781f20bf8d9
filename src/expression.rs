//! Backend-neutral boolean expressions.
//!
//! Callers build an [`Expression`] tree; the adapter only ever consumes it (see
//! [`crate::query::compile`]).

use crate::geo::GeoJson;
use bson::Bson;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved field name that turns a predicate into a full-text search.
pub const FULL_TEXT_FIELD: &str = "$fullText";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterOrEqual,
    GreaterThan,
    In,
    NotIn,
    InAll,
    BeginsWith,
    Contains,
    EndsWith,
    Exists,
    GeoWithin,
    GeoIntersects,
}

impl Operator {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::GreaterThan => ">",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::InAll => "ALL",
            Self::BeginsWith => "BEGINS",
            Self::Contains => "CONTAINS",
            Self::EndsWith => "ENDS",
            Self::Exists => "EXISTS",
            Self::GeoWithin => "GEO-WITHIN",
            Self::GeoIntersects => "GEO-INTERSECTS",
        }
    }

    /// Parses an operator name. Symbols and words are accepted case-insensitively;
    /// anything unrecognised is treated as equality.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().replace(['_', '-'], " ").as_str() {
            "!=" | "<>" | "NE" | "NOT EQUAL" => Self::NotEqual,
            "<" | "LT" | "LESS THAN" => Self::LessThan,
            "<=" | "LTE" | "LESS OR EQUAL" => Self::LessOrEqual,
            ">=" | "GTE" | "GREATER OR EQUAL" => Self::GreaterOrEqual,
            ">" | "GT" | "GREATER THAN" => Self::GreaterThan,
            "IN" => Self::In,
            "NOT IN" | "NIN" => Self::NotIn,
            "ALL" | "IN ALL" => Self::InAll,
            "BEGINS" | "BEGINS WITH" => Self::BeginsWith,
            "CONTAINS" => Self::Contains,
            "ENDS" | "ENDS WITH" => Self::EndsWith,
            "EXISTS" => Self::Exists,
            "GEO WITHIN" => Self::GeoWithin,
            "GEO INTERSECTS" => Self::GeoIntersects,
            _ => Self::Equal,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Operator {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl From<String> for Operator {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

/// A composable boolean expression over document fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expression {
    Predicate { field: String, operator: Operator, value: Bson },
    And(Vec<Expression>),
    Or(Vec<Expression>),
}

impl Expression {
    pub fn predicate(field: impl Into<String>, operator: Operator, value: impl Into<Bson>) -> Self {
        Self::Predicate { field: field.into(), operator, value: value.into() }
    }

    /// An empty conjunction: matches every document.
    #[must_use]
    pub const fn all() -> Self {
        Self::And(Vec::new())
    }

    pub fn equal(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::predicate(field, Operator::Equal, value)
    }

    pub fn not_equal(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::predicate(field, Operator::NotEqual, value)
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::predicate(field, Operator::LessThan, value)
    }

    pub fn less_or_equal(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::predicate(field, Operator::LessOrEqual, value)
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::predicate(field, Operator::GreaterThan, value)
    }

    pub fn greater_or_equal(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::predicate(field, Operator::GreaterOrEqual, value)
    }

    pub fn in_values<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        Self::predicate(field, Operator::In, values)
    }

    pub fn not_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        Self::predicate(field, Operator::NotIn, values)
    }

    pub fn in_all<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        Self::predicate(field, Operator::InAll, values)
    }

    pub fn begins_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::predicate(field, Operator::BeginsWith, prefix.into())
    }

    pub fn contains(field: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::predicate(field, Operator::Contains, fragment.into())
    }

    pub fn ends_with(field: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::predicate(field, Operator::EndsWith, suffix.into())
    }

    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Self::predicate(field, Operator::Exists, present)
    }

    pub fn full_text(search: impl Into<String>) -> Self {
        Self::predicate(FULL_TEXT_FIELD, Operator::Equal, search.into())
    }

    pub fn geo_within(field: impl Into<String>, shape: &impl GeoJson) -> Self {
        Self::predicate(field, Operator::GeoWithin, shape.geo_json())
    }

    pub fn geo_intersects(field: impl Into<String>, shape: &impl GeoJson) -> Self {
        Self::predicate(field, Operator::GeoIntersects, shape.geo_json())
    }

    /// Conjunction of `self` and `other`. An existing `And` is extended in place.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction of `self` and `other`. An existing `Or` is extended in place.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// True for an `And`/`Or` without children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Predicate { .. } => false,
            Self::And(children) | Self::Or(children) => children.is_empty(),
        }
    }
}

impl Default for Expression {
    fn default() -> Self {
        Self::all()
    }
}
