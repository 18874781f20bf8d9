//! Objects the adapter persists.

mod journal;

pub use journal::Journal;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A value stored as one document of a collection.
///
/// The adapter never owns these objects. It only stamps the journal before writing them.
/// `id` must render the object's `_id` as the hex form of an `ObjectId`.
pub trait PersistentObject: Serialize + DeserializeOwned {
    fn id(&self) -> String;

    fn journal(&self) -> &Journal;

    fn journal_mut(&mut self) -> &mut Journal;

    fn is_new(&self) -> bool {
        self.journal().is_new()
    }

    fn set_created(&mut self, note: &str) {
        self.journal_mut().set_created(note);
    }

    fn set_updated(&mut self, note: &str) {
        self.journal_mut().set_updated(note);
    }

    fn set_deleted(&mut self, note: &str) {
        self.journal_mut().set_deleted(note);
    }
}
