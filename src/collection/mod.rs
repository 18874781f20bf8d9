//! Accessor for one named collection.

mod core;
mod ops;

pub use self::core::{Collection, CollectionSettings, CursorOf, SaveStrategy};
