#![forbid(unsafe_code)]

//! Edit buffer with autosave.
//!
//! Companion utility to the viewcycle core: local optimistic edits over an
//! upstream record, with merge-on-conflict when upstream changes while
//! edits are pending, and debounced persistence that flushes synchronously
//! on teardown.
//!
//! # Key Components
//!
//! - [`EditBuffer`] - Merged view of an upstream base plus key-level local
//!   edits, with an optional three-way conflict resolver
//! - [`Autosave`] - Debounced, latest-wins persistence worker with
//!   flush-on-drop

pub mod autosave;
pub mod buffer;

pub use autosave::Autosave;
pub use buffer::{EditBuffer, MergeFn};
