//! Embedding surface for Rill: the [`Engine`] facade driving the full
//! parse → typecheck → optimize → materialize → sink pipeline.

pub mod engine;

pub use engine::{Engine, OutputSpec, Prepared};
