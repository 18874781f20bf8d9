use bson::Document;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default locale used for every collation the adapter requests.
pub const DEFAULT_LOCALE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollationStrength {
    /// Base characters only.
    Primary = 1,
    /// Base characters and accents; case-insensitive.
    Secondary = 2,
    /// Base characters, accents and case.
    Tertiary = 3,
}

impl CollationStrength {
    #[must_use]
    pub const fn level(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub const fn is_case_sensitive(self) -> bool {
        matches!(self, Self::Tertiary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collation {
    pub locale: String,
    pub strength: CollationStrength,
}

impl Collation {
    #[must_use]
    pub fn new(strength: CollationStrength) -> Self {
        Self { locale: DEFAULT_LOCALE.to_string(), strength }
    }
}

/// Options for a multi-document find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub limit: Option<i64>,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub collation: Option<Collation>,
}

/// Options for a single-document find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneOptions {
    pub projection: Option<Document>,
    pub collation: Option<Collation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadConcern {
    Local,
    Majority,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteConcern {
    Acknowledged,
    Majority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
    pub read_preference: ReadPreference,
    pub max_commit_time: Option<Duration>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            read_concern: ReadConcern::Majority,
            write_concern: WriteConcern::Majority,
            read_preference: ReadPreference::Primary,
            max_commit_time: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub causal_consistency: bool,
    pub default_transaction_options: TransactionOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { causal_consistency: true, default_transaction_options: TransactionOptions::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}
