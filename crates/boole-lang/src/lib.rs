//! # boole-lang
//!
//! Textual boolean-tree grammar for BooleDB.
//!
//! ## Serialized list form
//!
//! ```text
//! {u {l wheel I} {- {l hub {1 0 0 4 0 1 0 0 0 0 1 0 0 0 0 1}} {N}}}
//! ```
//!
//! `u`/`n`/`-`/`^` are the binary operators, `!`/`G`/`X` the unary
//! ones, `{l name matrix}` a member leaf, and `{N}` the empty tree.
//! [`parser::parse`] and [`printer::serialize`] are inverses;
//! [`printer::describe`] is a human-readable indented rendering.

pub mod error;
pub mod parser;
pub mod printer;

pub use error::LangError;
pub use parser::parse;
pub use printer::{describe, serialize};
