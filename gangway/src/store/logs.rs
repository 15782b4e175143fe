//! Capped per-deployment log buffers

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::Utc;
use gangway_api::models::LogLine;
use uuid::Uuid;

pub const DEFAULT_MAX_LINES: usize = 1000;

/// Retained log lines per deployment, oldest dropped first
pub struct LogBuffer {
    lines: RwLock<HashMap<Uuid, VecDeque<LogLine>>>,
    max_lines: usize,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: RwLock::new(HashMap::new()),
            max_lines: max_lines.max(1),
        }
    }

    /// Append a gateway-generated line
    pub fn record(&self, deployment_id: Uuid, message: impl Into<String>) {
        self.append(
            deployment_id,
            vec![LogLine {
                timestamp: Utc::now(),
                stream: "gateway".to_string(),
                message: message.into(),
            }],
        );
    }

    pub fn append(&self, deployment_id: Uuid, new_lines: Vec<LogLine>) {
        let mut lines = self.lines.write().unwrap_or_else(|e| e.into_inner());
        let buffer = lines.entry(deployment_id).or_default();
        for line in new_lines {
            if buffer.len() == self.max_lines {
                buffer.pop_front();
            }
            buffer.push_back(line);
        }
    }

    pub fn get(&self, deployment_id: Uuid) -> Vec<LogLine> {
        let lines = self.lines.read().unwrap_or_else(|e| e.into_inner());
        lines
            .get(&deployment_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, deployment_id: Uuid) {
        let mut lines = self.lines.write().unwrap_or_else(|e| e.into_inner());
        lines.remove(&deployment_id);
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}
