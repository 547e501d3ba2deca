//! Parsing the agent's JSONL conversation history.
//!
//! Claude Code appends one JSON object per line to
//! `~/.claude/projects/{escaped-path}/{session-id}.jsonl`. Only `user` and
//! `assistant` entries become history records; summaries, system notes,
//! file snapshots and sidechain (subagent) traffic are skipped.

use chrono::{DateTime, Utc};
use relay_core::{HistoryRecord, MessageId, MessageRole};
use serde::Deserialize;
use thiserror::Error;

/// A single history line as written by the agent.
///
/// Everything except `type` is optional so unknown entry kinds still parse.
#[derive(Debug, Clone, Deserialize)]
pub struct RawHistoryLine {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "isSidechain")]
    pub is_sidechain: bool,
    #[serde(default, rename = "isMeta")]
    pub is_meta: bool,
    #[serde(default)]
    pub message: Option<RawHistoryMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHistoryMessage {
    #[serde(default)]
    pub content: Option<RawContent>,
}

/// Message content: plain text or a list of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

impl RawContent {
    /// Concatenates the text blocks; other block kinds are ignored.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A history line that is not valid JSON.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("history line {line}: {reason}")]
pub struct HistoryParseError {
    /// 1-based line number.
    pub line: u64,
    pub reason: String,
}

/// Parses one line. `sequence` is the 0-based line index.
///
/// Returns `Ok(None)` for blank lines and entries that are not part of the
/// visible conversation.
pub fn parse_history_line(
    line: &str,
    sequence: u64,
) -> Result<Option<HistoryRecord>, HistoryParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let raw: RawHistoryLine = serde_json::from_str(line).map_err(|e| HistoryParseError {
        line: sequence + 1,
        reason: e.to_string(),
    })?;

    let role = match raw.kind.as_str() {
        "user" => MessageRole::User,
        "assistant" => MessageRole::Agent,
        _ => return Ok(None),
    };
    if raw.is_sidechain || raw.is_meta {
        return Ok(None);
    }
    let Some(uuid) = raw.uuid else {
        return Ok(None);
    };

    let text = raw
        .message
        .and_then(|m| m.content)
        .map(|c| c.text())
        .unwrap_or_default();

    Ok(Some(HistoryRecord {
        id: MessageId::new(uuid),
        role,
        text,
        timestamp: raw.timestamp,
        sequence,
    }))
}

/// Parses a whole history file body.
///
/// Stops at the first malformed line unless it is the last one: the agent
/// may be mid-write, so a truncated trailing line is dropped silently.
pub fn parse_history(body: &str) -> Result<Vec<HistoryRecord>, HistoryParseError> {
    let lines: Vec<&str> = body.lines().collect();
    let last = lines.len().saturating_sub(1);
    let mut records = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        match parse_history_line(line, idx as u64) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(_) if idx == last && !body.ends_with('\n') => break,
            Err(e) => return Err(e),
        }
    }

    Ok(records)
}
