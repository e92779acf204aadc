use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat};
use kubeship_types::{LogFields, Severity};
use regex::Regex;
use serde_json::{Map, Value};

/// Bracketed level tag anywhere in the text, e.g. `[WARN]`
static SEVERITY_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\[(INFO|NOTICE|CRITICAL|ALERT|EMERGENCY|WARN|WARNING|ERR|ERROR|FATAL|TRACE|DEBUG)\]",
    )
    .ok()
});

/// CRI log line: `<rfc3339> <stream> <P|F> <message>`
static CRI_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\S+) (stdout|stderr) ([PF]) ?(.*)$").ok());

/// Structured-log keys carrying a level when no `severity` is present
const LEVEL_FIELDS: [&str; 5] = ["level", "lvl", "log.level", "loglevel", "log_level"];

/// Parser for the lines container runtimes write to disk
pub struct LineParser;

impl LineParser {
    /// Parse a Docker JSON, CRI or plain text line
    ///
    /// `message` is renamed to `log`, and a missing severity is guessed from
    /// the level fields or the message text.
    pub fn parse(line: &str) -> LogFields {
        let mut fields = Self::try_parse_json(line)
            .or_else(|| Self::try_parse_cri(line))
            .unwrap_or_else(|| LogFields::text(line));

        if let Some(message) = fields.extra.remove("message") {
            match message {
                Value::Null => {}
                Value::String(text) => fields.log = Some(text),
                other => fields.log = Some(other.to_string()),
            }
        }

        if fields.severity.is_none() {
            fields.severity = Self::level_from_fields(&fields.extra)
                .or_else(|| fields.log.as_deref().and_then(guess_severity))
                .map(|severity| severity.as_str().to_string());
        }

        fields
    }

    /// Plain text line with a guessed severity, no structure assumed
    pub fn parse_text(line: &str) -> LogFields {
        LogFields {
            severity: guess_severity(line).map(|severity| severity.as_str().to_string()),
            ..LogFields::text(line)
        }
    }

    fn try_parse_json(line: &str) -> Option<LogFields> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }

        match serde_json::from_str(trimmed).ok()? {
            Value::Object(map) => Some(Self::from_map(map)),
            _ => None,
        }
    }

    fn from_map(mut map: Map<String, Value>) -> LogFields {
        let log = take_text(&mut map, "log").map(|log| log.trim_end_matches('\n').to_string());
        let stream = take_text(&mut map, "stream");
        let time = take_time(&mut map);
        let severity = take_text(&mut map, "severity");

        LogFields {
            log,
            stream,
            time,
            severity,
            extra: map,
        }
    }

    fn try_parse_cri(line: &str) -> Option<LogFields> {
        let captures = CRI_LINE.as_ref()?.captures(line)?;
        let time = captures.get(1)?.as_str();
        DateTime::parse_from_rfc3339(time).ok()?;

        Some(LogFields {
            log: Some(captures.get(4)?.as_str().to_string()),
            stream: Some(captures.get(2)?.as_str().to_string()),
            time: Some(time.to_string()),
            ..LogFields::default()
        })
    }

    fn level_from_fields(extra: &Map<String, Value>) -> Option<Severity> {
        LEVEL_FIELDS
            .iter()
            .find_map(|key| extra.get(*key).and_then(Value::as_str))
            .and_then(Severity::from_tag)
    }
}

/// Remove `key` from `map` as text; non-string values are stringified
fn take_text(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Remove `time`; integer values are epoch milliseconds
fn take_time(map: &mut Map<String, Value>) -> Option<String> {
    if let Some(millis) = map.get("time").and_then(Value::as_i64) {
        map.remove("time");
        return DateTime::from_timestamp_millis(millis)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true));
    }
    take_text(map, "time")
}

/// Guess a severity from a bracketed level tag in `text`
pub fn guess_severity(text: &str) -> Option<Severity> {
    let captures = SEVERITY_TAG.as_ref()?.captures(text)?;
    Severity::from_tag(captures.get(1)?.as_str())
}
