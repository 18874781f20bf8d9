use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Audit trail embedded in every persisted object under the `journal` key.
///
/// Dates are unix milliseconds; zero means "never".
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Journal {
    pub create_date: i64,
    pub update_date: i64,
    pub delete_date: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
    pub revision: i64,
}

impl Journal {
    /// Key under which the journal is stored.
    pub const FIELD: &'static str = "journal";
    /// Path of the soft-delete marker inside a stored document.
    pub const DELETE_DATE_PATH: &'static str = "journal.deleteDate";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True until the object has been created in the database.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.create_date == 0
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.delete_date > 0
    }

    pub fn set_created(&mut self, note: &str) {
        self.create_date = now_millis();
        self.note = note.to_string();
    }

    pub fn set_updated(&mut self, note: &str) {
        self.update_date = now_millis();
        self.note = note.to_string();
        self.revision += 1;
    }

    pub fn set_deleted(&mut self, note: &str) {
        self.delete_date = now_millis();
        self.note = note.to_string();
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut j = Journal::new();
        assert!(j.is_new());
        j.set_updated("first");
        j.set_created("first");
        assert!(!j.is_new());
        assert_eq!(j.revision, 1);
        j.set_deleted("gone");
        assert!(j.is_deleted());
        assert_eq!(j.note, "gone");
    }

    #[test]
    fn serializes_camel_case() {
        let j = Journal { create_date: 5, ..Journal::default() };
        let doc = bson::serialize_to_document(&j).unwrap();
        assert_eq!(doc.get_i64("createDate").unwrap(), 5);
        assert_eq!(doc.get_i64("deleteDate").unwrap(), 0);
        assert!(!doc.contains_key("note"));
    }
}
