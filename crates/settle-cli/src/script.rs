//! Replay scripts
//!
//! A script is a JSONL file. Each line carries a virtual timestamp and either
//! an engine input or a host action:
//!
//! ```text
//! {"at": 0, "input": {"type": "click"}}
//! {"at": 10, "input": {"type": "mutations", "records": [...]}}
//! {"at": 12, "host": {"action": "timeline", "entry": {"name": "...", "start_time": 11}}}
//! {"at": 40, "host": {"action": "gate", "ready": false}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use settle_core::model::{Millis, NodeId, TimelineEntry};
use settle_correlate::Input;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Something the host does outside the engine's input stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HostAction {
    /// Record a performance timeline entry
    Timeline { entry: TimelineEntry },

    /// Open or close the emit gate
    Gate { ready: bool },

    /// Make listener attachment fail for a node
    RefuseListener { node: NodeId },
}

/// One line of a replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLine {
    /// Virtual time, in milliseconds
    pub at: Millis,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Input>,
}

#[cfg(test)]
impl ScriptLine {
    pub fn input(at: Millis, input: Input) -> Self {
        Self {
            at,
            host: None,
            input: Some(input),
        }
    }

    pub fn host(at: Millis, action: HostAction) -> Self {
        Self {
            at,
            host: Some(action),
            input: None,
        }
    }
}

/// Parse one script line; `None` for blanks and comments
pub fn parse_line(line_number: u64, line: &str) -> anyhow::Result<Option<ScriptLine>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let parsed: ScriptLine = serde_json::from_str(trimmed)
        .with_context(|| format!("line {}: not a valid script entry", line_number))?;

    if !parsed.at.is_finite() {
        bail!("line {}: timestamp must be finite", line_number);
    }
    if parsed.host.is_none() && parsed.input.is_none() {
        bail!("line {}: entry has neither `input` nor `host`", line_number);
    }
    Ok(Some(parsed))
}

/// Read a whole script, rejecting timestamps that go backwards
pub async fn read_script(path: &Path) -> anyhow::Result<Vec<ScriptLine>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open script {:?}", path))?;
    let mut lines = BufReader::new(file).lines();

    let mut script = Vec::new();
    let mut line_number = 0u64;
    let mut last_at: Option<Millis> = None;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let Some(entry) = parse_line(line_number, &line)? else {
            continue;
        };

        if let Some(last) = last_at {
            if entry.at < last {
                bail!(
                    "line {}: time goes backwards ({} after {})",
                    line_number,
                    entry.at,
                    last
                );
            }
        }
        last_at = Some(entry.at);
        debug!("Script line {} at {}", line_number, entry.at);
        script.push(entry);
    }

    info!("Read {} script entries from {:?}", script.len(), path);
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::model::ClickSignal;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_input_line() {
        let line = parse_line(1, r#"{"at": 5, "input": {"type": "click"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(line, ScriptLine::input(5.0, Input::Click(ClickSignal::default())));
    }

    #[test]
    fn test_parse_host_actions() {
        let line = parse_line(1, r#"{"at": 40, "host": {"action": "gate", "ready": false}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(line.host, Some(HostAction::Gate { ready: false }));

        let line = parse_line(
            2,
            r#"{"at": 41, "host": {"action": "timeline", "entry": {"name": "https://cdn.example.com/a.png", "start_time": 11, "response_end": 39}}}"#,
        )
        .unwrap()
        .unwrap();
        match line.host {
            Some(HostAction::Timeline { entry }) => {
                assert_eq!(entry.name, "https://cdn.example.com/a.png");
                assert_eq!(entry.response_start, 0.0);
                assert_eq!(entry.duration(), 28.0);
            }
            other => panic!("unexpected host action {:?}", other),
        }
    }

    #[test]
    fn test_skips_blanks_and_comments() {
        assert!(parse_line(1, "").unwrap().is_none());
        assert!(parse_line(2, "   ").unwrap().is_none());
        assert!(parse_line(3, "# warm-up").unwrap().is_none());
    }

    #[test]
    fn test_rejects_empty_entry() {
        let err = parse_line(7, r#"{"at": 1}"#).unwrap_err();
        assert!(err.to_string().contains("line 7"));
    }

    #[tokio::test]
    async fn test_read_script() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# click then wait").unwrap();
        writeln!(file, r#"{{"at": 0, "input": {{"type": "click"}}}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"at": 60, "input": {{"type": "tick"}}}}"#).unwrap();

        let script = read_script(file.path()).await.unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script[1].input, Some(Input::Tick));
    }

    #[tokio::test]
    async fn test_read_script_rejects_time_travel() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"at": 50, "input": {{"type": "tick"}}}}"#).unwrap();
        writeln!(file, r#"{{"at": 20, "input": {{"type": "tick"}}}}"#).unwrap();

        let err = read_script(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("backwards"));
    }
}
