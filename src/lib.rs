//! # ragline
//!
//! Retrieval-augmented chat over project documents, backed by SQLite.
//!
//! The pipeline itself (segmenting, embedding, vector search, context
//! assembly, sanitizing, and the two orchestrators) lives in
//! [`ragline_core`]. This crate supplies the pieces around it: TOML
//! configuration, the SQLite store and usage meter, OpenAI providers,
//! and the `ragline` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐   ┌───────────────┐
//! │  ragline   │──▶│    ragline-core      │──▶│    SQLite     │
//! │   (CLI)    │   │ ingest  │  retrieval │   │ docs, chunks, │
//! └────────────┘   └────┬─────────┬───────┘   │ vectors, usage│
//!                       ▼         ▼           └───────────────┘
//!                 ┌──────────┐ ┌──────────┐
//!                 │embeddings│ │   chat   │   (OpenAI)
//!                 └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragline init
//! ragline ingest acme ./docs/handbook.md
//! ragline search acme "vacation policy"
//! ragline ask acme "How many vacation days do I get?"
//! ragline usage acme
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and `RAGLINE_*` overrides |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema bootstrap |
//! | [`sqlite_store`] | [`Store`](ragline_core::store::Store) on SQLite |
//! | [`sqlite_meter`] | [`UsageMeter`](ragline_core::metering::UsageMeter) on SQLite |
//! | [`openai`] | OpenAI embedding and chat providers |
//! | [`app`] | Wiring from config to orchestrators |
//! | [`logging`] | tracing subscriber setup |

pub mod app;
pub mod config;
pub mod db;
pub mod documents;
pub mod ingest_cmd;
pub mod logging;
pub mod migrate;
pub mod openai;
pub mod query;
pub mod sqlite_meter;
pub mod sqlite_store;
pub mod usage_cmd;
