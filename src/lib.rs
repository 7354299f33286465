//! cleared — a deterministic, reversible de-identification engine for
//! tabular data.
//!
//! A configuration (spec §3) names one or more tables, each a DAG of
//! transformers (ID surrogation, DateTime shifting, value casts, column
//! drops) applied column-by-column over row frames read from a
//! [`TableStore`](io::TableStore). Surrogate/shift assignments are recorded
//! in a [`ReferenceStore`](refstore::ReferenceStore) so a later run can
//! reverse them exactly (spec §5 "Reversibility").
//!
//! # Crate layout
//!
//! - [`model`] — the configuration types deserialized from YAML (spec §3).
//! - [`frame`] — the in-memory row/column representation ([`Frame`](frame::Frame), [`Value`](frame::Value)).
//! - [`dag`] — generic dependency-ordering used for both the table graph and each table's transformer graph.
//! - [`hash`] — the content-addressed surrogate/shift hashing primitives.
//! - [`filter`] — row/segment filtering shared by transformers.
//! - [`transformers`] — the compiled transformer kinds and their `apply`/`reverse` semantics.
//! - [`refstore`] — the reference store: surrogate and shift assignments, loaded once and flushed once per run.
//! - [`io`] — table storage backends (filesystem, SQL stub).
//! - [`pipeline`] — a single table's compiled transformer chain.
//! - [`engine`] — orchestration across tables: `run`, `run_reverse`, `verify`.
//! - [`config`] — YAML loading with `defaults:` resolution.
//! - [`lint`] — static configuration linting (spec §4.8).
//! - [`verify`] — the reverse+compare verification report.
//! - [`init`] — project scaffolding and config maintenance helpers.
//! - [`error`] — the crate-wide error type.

#![allow(dead_code)]

pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod filter;
pub mod frame;
pub mod hash;
pub mod init;
pub mod io;
pub mod lint;
pub mod model;
pub mod pipeline;
pub mod refstore;
pub mod transformers;
pub mod verify;

pub use engine::{Engine, RunReport};
pub use error::DeidError;
pub use model::EngineConfig;
