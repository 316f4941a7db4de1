#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary data root laid out as `<root>/projects/<project>/<session>.jsonl`.
pub struct DataRoot {
    dir: TempDir,
}

impl DataRoot {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("projects")).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `lines` as one JSONL file and return its path.
    pub fn write_session(&self, project: &str, session: &str, lines: &[String]) -> PathBuf {
        let project_dir = self.dir.path().join("projects").join(project);
        fs::create_dir_all(&project_dir).unwrap();
        let path = project_dir.join(format!("{session}.jsonl"));
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&path, content).unwrap();
        path
    }
}

/// Builder for one assistant usage line.
#[derive(Clone)]
pub struct Line {
    pub timestamp: String,
    pub session: String,
    pub model: String,
    pub input: u64,
    pub output: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
    pub cost: Option<f64>,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
}

impl Line {
    pub fn new(timestamp: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            session: "session-1".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            input: 100,
            output: 50,
            cache_creation: 0,
            cache_read: 0,
            cost: None,
            message_id: None,
            request_id: None,
        }
    }

    pub fn session(mut self, session: &str) -> Self {
        self.session = session.to_string();
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn tokens(mut self, input: u64, output: u64) -> Self {
        self.input = input;
        self.output = output;
        self
    }

    pub fn cache(mut self, creation: u64, read: u64) -> Self {
        self.cache_creation = creation;
        self.cache_read = read;
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn ids(mut self, message_id: &str, request_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self.request_id = Some(request_id.to_string());
        self
    }

    pub fn render(&self) -> String {
        let mut record = serde_json::json!({
            "timestamp": self.timestamp,
            "sessionId": self.session,
            "type": "assistant",
            "message": {
                "model": self.model,
                "usage": {
                    "input_tokens": self.input,
                    "output_tokens": self.output,
                    "cache_creation_input_tokens": self.cache_creation,
                    "cache_read_input_tokens": self.cache_read
                }
            }
        });
        if let Some(cost) = self.cost {
            record["costUSD"] = serde_json::json!(cost);
        }
        if let Some(id) = &self.message_id {
            record["message"]["id"] = serde_json::json!(id);
        }
        if let Some(id) = &self.request_id {
            record["requestId"] = serde_json::json!(id);
        }
        record.to_string()
    }
}
