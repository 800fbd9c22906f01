use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::protocol::RequestDebug;

/// How response bodies are written to the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    Full,
    /// First response per endpoint in full, later ones as changed paths only.
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous: HashMap::new(),
        })
    }

    pub fn log_command(&mut self, dispatch_id: &str, command: &str, params: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "id": dispatch_id,
            "command": command,
            "params": params,
        });
        self.write_line(&entry);
    }

    /// Requests arrive already redacted.
    pub fn log_request(&mut self, dispatch_id: &str, request: &RequestDebug) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "id": dispatch_id,
            "method": request.method,
            "url": request.url,
            "body": request.body,
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, dispatch_id: &str, endpoint: &str, status: u16, body: &Value) {
        let mut entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "resp",
            "id": dispatch_id,
            "endpoint": endpoint,
            "status": status,
        });

        match self.mode {
            MessageLogMode::Full => {
                entry["body"] = body.clone();
            }
            MessageLogMode::Diffed => match self.previous.get(endpoint) {
                Some(prev) => {
                    let mut changes = Vec::new();
                    diff_json(prev, body, "", &mut changes);
                    entry["changes"] = Value::Array(changes);
                }
                None => {
                    entry["full"] = Value::Bool(true);
                    entry["body"] = body.clone();
                }
            },
        }

        self.write_line(&entry);
        if self.mode == MessageLogMode::Diffed && (200..300).contains(&status) {
            self.previous.insert(endpoint.to_string(), body.clone());
        }
    }

    pub fn log_error(&mut self, dispatch_id: &str, message: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "err",
            "id": dispatch_id,
            "error": message,
        });
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Collects `{path, old, new}` entries. Arrays are compared index by index.
fn diff_json(previous: &Value, current: &Value, prefix: &str, changes: &mut Vec<Value>) {
    match (previous, current) {
        (Value::Object(prev), Value::Object(curr)) => {
            for (key, curr_val) in curr {
                let path = join_path(prefix, key);
                diff_json(prev.get(key).unwrap_or(&Value::Null), curr_val, &path, changes);
            }
            for (key, prev_val) in prev {
                if !curr.contains_key(key) {
                    changes.push(json!({ "path": join_path(prefix, key), "old": prev_val, "new": null }));
                }
            }
        }
        (Value::Array(prev), Value::Array(curr)) => {
            for i in 0..prev.len().max(curr.len()) {
                let path = join_path(prefix, &i.to_string());
                diff_json(
                    prev.get(i).unwrap_or(&Value::Null),
                    curr.get(i).unwrap_or(&Value::Null),
                    &path,
                    changes,
                );
            }
        }
        (prev, curr) if prev != curr => {
            changes.push(json!({ "path": prefix, "old": prev, "new": curr }));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn request() -> RequestDebug {
        RequestDebug {
            url: "https://example.test/GetTStatInfoList?GatewaySN=WS1".into(),
            method: "GET".into(),
            body: None,
            headers: [("authorization".to_string(), "Basic [redacted]".to_string())].into(),
        }
    }

    #[test]
    fn log_request_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_request("abc", &request());

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["id"], "abc");
        assert_eq!(lines[0]["method"], "GET");
        assert!(lines[0]["ts"].as_str().is_some());
        assert!(!lines[0].to_string().contains("dXNl"));
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        let body1 = json!({"tStatInfo": [{"Heat_Set_Point": 70, "Fan_Mode": 0}]});
        let body2 = json!({"tStatInfo": [{"Heat_Set_Point": 71, "Fan_Mode": 0}]});
        logger.log_response("1", "GetTStatInfoList", 200, &body1);
        logger.log_response("2", "GetTStatInfoList", 200, &body2);

        let lines = read_lines(path);
        assert_eq!(lines[0]["full"], true);
        assert!(lines[0]["body"].is_object());
        let changes = lines[1]["changes"].as_array().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["path"], "tStatInfo.0.Heat_Set_Point");
        assert_eq!(changes[0]["old"], 70);
        assert_eq!(changes[0]["new"], 71);
    }

    #[test]
    fn diffed_mode_tracks_endpoints_separately() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        logger.log_response("1", "GetTStatInfoList", 200, &json!({"a": 1}));
        logger.log_response("2", "SetTStatInfo", 200, &json!({"a": 1}));

        let lines = read_lines(path);
        assert_eq!(lines[1]["full"], true);
    }

    #[test]
    fn diffed_mode_no_changes_logs_empty_array() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        let body = json!({"tStatInfo": [{"Heat_Set_Point": 70}]});
        logger.log_response("1", "GetTStatInfoList", 200, &body);
        logger.log_response("2", "GetTStatInfoList", 200, &body);

        let lines = read_lines(path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn log_command_and_error() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_command("x", "setFanMode", &json!({"fanmode": "on"}));
        logger.log_error("x", "Missing fan mode");

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "cmd");
        assert_eq!(lines[0]["command"], "setFanMode");
        assert_eq!(lines[0]["params"]["fanmode"], "on");
        assert_eq!(lines[1]["dir"], "err");
        assert_eq!(lines[1]["error"], "Missing fan mode");
    }

    #[test]
    fn removed_keys_are_reported() {
        let mut changes = Vec::new();
        diff_json(&json!({"a": 1, "b": 2}), &json!({"a": 1}), "", &mut changes);
        assert_eq!(changes, vec![json!({"path": "b", "old": 2, "new": null})]);
    }
}
