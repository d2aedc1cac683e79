//! # Study Harness
//!
//! A local-first study assistant. Lecture notes (PDFs) are chunked,
//! embedded, and stored in per-topic collections; an orchestrator agent
//! retrieves from them under a per-turn call budget, writes flashcards to
//! Anki, and keeps a Markdown memory file. An ambient poller watches a
//! directory and processes new PDFs without being asked.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Watch dir    │──▶│  Ingestion   │──▶│   SQLite     │
//! │ (ambient)    │   │ Split+Embed  │   │ collections  │
//! └──────┬───────┘   └──────────────┘   └──────┬───────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Orchestrator │◀──│ Tools +      │◀──│  Retrieval   │
//! │ (agent)      │   │ BudgetGuard  │   │  facade      │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Library error type |
//! | [`telemetry`] | Tracing setup |
//! | [`models`] | Chunks and scored results |
//! | [`collection`] | Collection keys and topics from file names |
//! | [`extract`] | Document loaders (PDF) |
//! | [`chunk`] | Recursive text splitting |
//! | [`embedding`] | Embedding providers |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`index`] | Similarity index backends |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Retrieval facade and retriever cache |
//! | [`guard`] | Per-turn tool-call budgets |
//! | [`event_log`] | Append-only JSONL event log |
//! | [`manifest`] | Processed-file manifest |
//! | [`memory`] | Markdown agent memory |
//! | [`flashcards`] | AnkiConnect client |
//! | [`web_search`] | Web search backends |
//! | [`orchestrator`] | Agent runs, interrupts, approvals |
//! | [`tools`] | Agent tools and sessions |
//! | [`context`] | Shared application context |
//! | [`ambient`] | Directory poller |
//! | [`tasks`] | Orchestrator tasks for the HTTP API |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI subcommands |

pub mod ambient;
pub mod chunk;
pub mod collection;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod event_log;
pub mod extract;
pub mod flashcards;
pub mod guard;
pub mod index;
pub mod ingest;
pub mod manifest;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod retrieve;
pub mod server;
pub mod tasks;
pub mod telemetry;
pub mod tools;
pub mod web_search;
