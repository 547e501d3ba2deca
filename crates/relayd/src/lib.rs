//! Relay Daemon - Session runtime and message state core
//!
//! This crate keeps an in-memory model of each agent session consistent
//! with the agent's own persisted history, its process lifecycle, and
//! concurrently arriving user messages:
//! - `store` - Session store actor: message state machine, runtime
//!   snapshot, race-safe hydration, process exit handling
//! - `history` - Loader for the agent's JSONL transcript files
//! - `collab` - Traits for the history loader, trace sink and error reporter
//! - `config` - Daemon configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        relayd                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  StoreHandle    │────▶│     SessionStoreActor       │   │
//! │  │ (cheap clone)   │     │  (session state owner)      │   │
//! │  └─────────────────┘     └──────┬───────────────┬──────┘   │
//! │                                 │ loads         │ events   │
//! │                                 ▼               ▼          │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ HistoryLoader   │◀────│   broadcast::Sender         │   │
//! │  │ (spawned task)  │     │   (event distribution)      │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod collab;
pub mod config;
pub mod history;
pub mod store;
