//! # DriveSmart
//!
//! A bounded-latency answer pipeline for driving-test questions.
//!
//! Every question gets an answer within a fixed time budget. The pipeline
//! degrades through quality tiers instead of blocking or failing: an exact
//! cache hit, an instant keyword answer, a document-grounded answer written
//! by a language model (or extracted from the documents when the model is
//! unavailable), and finally a canned fallback.
//!
//! ## Architecture
//!
//! ```text
//!   question + jurisdiction
//!            │
//!            ▼
//!   ┌─────────────────┐  hit   ┌───────────────┐
//!   │ ResponseCache   │──────▶ │               │
//!   └────────┬────────┘        │               │
//!            ▼                 │               │
//!   ┌─────────────────┐  match │               │
//!   │ FallbackLibrary │──────▶ │  AnswerResult │
//!   │  (quick table)  │        │               │
//!   └────────┬────────┘        │               │
//!            ▼                 │               │
//!   ┌─────────────────┐ in time│               │
//!   │ RelevanceSearch │──────▶ │               │
//!   │ + Synthesizer   │        │               │
//!   └────────┬────────┘        │               │
//!            ▼ timeout/error   │               │
//!   ┌─────────────────┐        │               │
//!   │ FallbackLibrary │──────▶ │               │
//!   └─────────────────┘        └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dsm init                       # create the answer cache
//! dsm corpus                     # load ./state_rules and list jurisdictions
//! dsm ask "What is the speed limit in school zones?"
//! dsm serve                      # start the HTTP chat API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Chunks, tiers, and answer records |
//! | [`error`] | Pipeline error taxonomy |
//! | [`extract`] | Text extraction from PDF rule manuals |
//! | [`chunk`] | Paragraph and line segmentation |
//! | [`corpus`] | Jurisdiction corpus store |
//! | [`similarity`] | Partial LCS similarity for fuzzy matching |
//! | [`search`] | Five-signal relevance ranking |
//! | [`db`] | SQLite connection for the cache store |
//! | [`migrate`] | Cache schema |
//! | [`cache`] | Persisted response cache |
//! | [`generator`] | Generative model backends |
//! | [`synth`] | Generative and extractive answer synthesis |
//! | [`fallback`] | Quick answers, canned answers, topic catalogue |
//! | [`pipeline`] | Tiered orchestrator with deadline |
//! | [`server`] | HTTP chat API |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod db;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod generator;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod server;
pub mod similarity;
pub mod synth;
