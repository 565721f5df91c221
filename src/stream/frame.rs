//! Structured frame grammar: one JSON object per raw line, tagged by an
//! `event` field. Unknown tags and non-JSON lines degrade to `Logs`.

use serde_json::Value;

use super::event::Event;

/// Parse one raw log line into an `Event`. A parse failure (not JSON, or
/// missing/unrecognized `event` field) degrades to `Logs` rather than
/// erroring — the grammar never rejects a line outright.
pub fn parse_line(line: &str, stderr: bool) -> Event {
    let default_level = if stderr { "warning" } else { "info" };

    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Event::Logs { level: default_level.to_string(), message: line.to_string() };
    };

    let Some(tag) = value.get("event").and_then(Value::as_str) else {
        return Event::Logs { level: default_level.to_string(), message: line.to_string() };
    };

    match tag {
        "connection" => parse_connection(&value).unwrap_or_else(|| fallback(line, default_level)),
        "worker" => parse_worker(&value).unwrap_or_else(|| fallback(line, default_level)),
        "text_delta" => value
            .get("text")
            .and_then(Value::as_str)
            .map(|t| Event::TextDelta { text: t.to_string() })
            .unwrap_or_else(|| fallback(line, default_level)),
        "text" => value
            .get("text")
            .and_then(Value::as_str)
            .map(|t| Event::Text { text: t.to_string() })
            .unwrap_or_else(|| fallback(line, default_level)),
        "logs" => {
            let level = value.get("level").and_then(Value::as_str).unwrap_or(default_level).to_string();
            let message = value.get("message").and_then(Value::as_str).unwrap_or(line).to_string();
            Event::Logs { level, message }
        }
        "finish" => parse_finish(&value).unwrap_or_else(|| fallback(line, default_level)),
        _ => fallback(line, default_level),
    }
}

fn fallback(line: &str, level: &str) -> Event {
    Event::Logs { level: level.to_string(), message: line.to_string() }
}

fn parse_connection(value: &Value) -> Option<Event> {
    let status = value.get("status")?.as_str()?.to_string();
    let gpu_id = value.get("gpu_id").and_then(Value::as_u64).map(|v| v as u32);
    let session_id = value
        .get("session_id")
        .and_then(Value::as_str)
        .and_then(|s| uuid::Uuid::parse_str(s).ok());
    let message = value.get("message").and_then(Value::as_str).map(str::to_string);
    Some(Event::Connection { status, gpu_id, session_id, message })
}

fn parse_worker(value: &Value) -> Option<Event> {
    let status = value.get("status")?.as_str()?.to_string();
    let container_id = value.get("container_id")?.as_str()?.to_string();
    Some(Event::Worker { status, container_id })
}

fn parse_finish(value: &Value) -> Option<Event> {
    let status = value.get("status")?.as_str()?.to_string();
    let elapsed_ms = value.get("elapsed_ms").and_then(Value::as_u64);
    let error = value.get("error").and_then(Value::as_str).map(str::to_string);
    Some(Event::TaskFinish { status, elapsed_ms, error })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_delta() {
        let event = parse_line(r#"{"event":"text_delta","text":"hel"}"#, false);
        assert!(matches!(event, Event::TextDelta { text } if text == "hel"));
    }

    #[test]
    fn unknown_tag_degrades_to_logs() {
        let event = parse_line(r#"{"event":"mystery","foo":1}"#, false);
        assert!(matches!(event, Event::Logs { .. }));
    }

    #[test]
    fn non_json_line_degrades_to_logs_with_stderr_level() {
        let event = parse_line("not json at all", true);
        match event {
            Event::Logs { level, message } => {
                assert_eq!(level, "warning");
                assert_eq!(message, "not json at all");
            }
            other => panic!("expected Logs, got {other:?}"),
        }
    }

    #[test]
    fn parses_finish_with_error() {
        let event = parse_line(r#"{"event":"finish","status":"failed","error":"boom"}"#, false);
        match event {
            Event::TaskFinish { status, error, .. } => {
                assert_eq!(status, "failed");
                assert_eq!(error.as_deref(), Some("boom"));
            }
            other => panic!("expected TaskFinish, got {other:?}"),
        }
    }
}
