//! Relay Protocol - Wire formats at the edges of the session core
//!
//! This crate covers the two formats the core touches but does not own:
//! the agent's persisted JSONL history (inbound, parsed into
//! `HistoryRecord`s) and the event envelopes a transport pushes to
//! remote subscribers (outbound).

pub mod message;
pub mod parse;
pub mod version;

pub use message::{OutboundMessage, OutboundPayload, SnapshotReason, TranscriptSnapshot};
pub use parse::{parse_history, parse_history_line, HistoryParseError, RawContent, RawHistoryLine};
pub use version::ProtocolVersion;
