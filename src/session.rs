use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::types::{ConversationRequirement, ConversationTurn};

#[derive(Debug, Clone, Serialize)]
pub struct DebugEntry {
    pub time: DateTime<Utc>,
    pub kind: &'static str,
    pub data: Value,
}

/// Circular buffer of debug entries; the oldest entry goes first.
#[derive(Debug, Clone)]
pub struct DebugLog {
    entries: VecDeque<DebugEntry>,
    capacity: usize,
}

impl DebugLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, kind: &'static str, data: Value) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DebugEntry {
            time: Utc::now(),
            kind,
            data,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DebugEntry> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<DebugEntry> {
        self.entries.into()
    }
}

/// Model-facing history. The first turn always holds the task, followed by the
/// one live page snapshot.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
    task_header: String,
}

impl Conversation {
    pub fn new(task_header: String) -> Self {
        Self {
            turns: vec![ConversationTurn::user(task_header.clone())],
            task_header,
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Replaces the live snapshot. Only one is ever kept in context.
    pub fn set_snapshot(&mut self, snapshot: &str) {
        self.turns[0].content = format!("{}\n\n{snapshot}", self.task_header);
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::assistant(content));
    }

    /// Drops the oldest turns after the task turn until at most `max_turns` remain.
    pub fn trim(&mut self, max_turns: usize) {
        let max_turns = max_turns.max(1);
        if self.turns.len() <= max_turns {
            return;
        }
        let excess = self.turns.len() - max_turns;
        self.turns.drain(1..1 + excess);
    }
}

/// Mutable state of one run. Created by `Agent::run` and dropped when it returns.
#[derive(Debug)]
pub struct AgentSession {
    pub task: String,
    pub requirement: Option<ConversationRequirement>,
    pub step_count: u32,
    pub conversation: Conversation,
    pub messages_sent: u32,
    pub done_rejections: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub debug_log: DebugLog,
    pub capture_failure_streak: u32,
}

impl AgentSession {
    pub fn new(
        task: &str,
        task_header: String,
        requirement: Option<ConversationRequirement>,
        debug_capacity: usize,
    ) -> Self {
        Self {
            task: task.to_string(),
            requirement,
            step_count: 0,
            conversation: Conversation::new(task_header),
            messages_sent: 0,
            done_rejections: 0,
            total_tokens: 0,
            total_cost: 0.0,
            debug_log: DebugLog::with_capacity(debug_capacity),
            capture_failure_streak: 0,
        }
    }

    pub fn log(&mut self, kind: &'static str, data: Value) {
        self.debug_log.push(kind, data);
    }
}
