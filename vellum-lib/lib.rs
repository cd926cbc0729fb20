//! Editing machinery over the `vellum-core` document model.
//!
//! The layering mirrors how an edit flows through the system: a [`command`]
//! builds a [`transaction`] out of [`step`]s, the [`state`] applies it and
//! re-runs every [`plugin`], [`history`] records the inverse steps, and
//! [`decoration`]s and the [`selection`] are remapped through the step maps.

pub mod command;
pub mod decoration;
pub mod history;
pub mod keymap;
pub mod plugin;
pub mod selection;
pub mod state;
pub mod step;
pub mod suggestion;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testutil;
