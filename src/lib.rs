//! NutriFlow backend: menu scanning, nutrition analysis, and
//! content-addressed menu deduplication.
//!
//! A scanned menu image flows through three subsystems:
//!
//! 1. **OCR** ([`ocr`]) — hosted vision models transcribe the image, with
//!    a model fallback chain.
//! 2. **Analysis** ([`agents`], [`orchestrator`]) — a fixed chain of LLM
//!    agents structures the text, scores every dish, selects the top
//!    three, and produces per-dish macro estimates, summaries, and final
//!    scores. Every agent call has a deterministic fallback, so analysis
//!    degrades instead of failing.
//! 3. **Deduplication** ([`signature`], [`structure`], [`embedding`],
//!    [`dedup`]) — menus are canonicalized and deduplicated in three
//!    tiers: exact image hash per user, exact dish-set signature hash
//!    globally, and embedding cosine similarity against the nearest
//!    canonical menu.
//!
//! Persistence is Postgres with pgvector ([`db`], [`store`], [`migrate`]);
//! the HTTP surface is axum ([`server`]) and subscription billing lives in
//! [`billing`]. Everything is wired from a TOML config ([`config`]).

pub mod agents;
pub mod billing;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod prompts;
pub mod server;
pub mod signature;
pub mod store;
pub mod structure;
