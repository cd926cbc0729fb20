//! Core value types for the vellum editing kernel.
//!
//! Everything in this crate is an immutable value: a [`schema::Schema`]
//! describes which documents are well formed, [`node::Node`] trees represent
//! them, and [`replace`] produces edited trees that share every untouched
//! subtree with the original. Higher-level machinery (steps, transactions,
//! plugins) lives in `vellum-lib` and consumes these types.

use smartstring::{
  LazyCompact,
  SmartString,
};

pub mod markup;
pub mod node;
pub mod position;
pub mod replace;
pub mod schema;
pub mod serialize;
pub mod slice;

#[cfg(test)]
pub(crate) mod testutil;

/// Compact string type used for text payloads.
pub type Text = SmartString<LazyCompact>;
