//! Command implementations for the XRAG CLI
//!
//! `classify` drives a classification run over a dataset and fills the result
//! store. The remaining commands are offline: `reduce` turns a store into
//! per-model statistics, `compare` sets two such documents against each other, and
//! `materialize` exports the contracts both runs got wrong for human review.

pub mod classify;
pub mod compare;
pub mod materialize;
pub mod reduce;
