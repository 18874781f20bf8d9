//! Translation of expressions and generic query options into native query structures.

mod compile;
mod options;

pub use compile::{compile, compile_or_empty};
pub use options::{QueryOption, SortDirection, describe, to_multi_options, to_single_options};
