//! Detects tasks that imply a conversation of some length and refuses `done`
//! until enough messages have been sent.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ConversationRequirement;

/// Rejections after which `done` is accepted anyway and marked incomplete.
pub const MAX_DONE_REJECTIONS: u32 = 3;
pub const DEFAULT_REQUIRED_COUNT: u32 = 3;
const MAX_REQUIRED_COUNT: u32 = 50;

static COUNT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(\d+)[\s-]*(?:reply|replies|message|messages|exchange|exchanges|response|responses|turn|turns)",
        r"(?i)(?:have|carry|hold|do)\s+(?:a\s+)?(\d+)[\s-]*(?:reply|message|exchange|turn|round)",
        r"(?i)back\s+and\s+forth\s+(\d+)\s+time",
        r"(?i)(\d+)\s+(?:back\s+and\s+forth|round)",
        r"(?i)conversation\s+(?:of\s+)?(\d+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("count pattern is valid"))
    .collect()
});

const CONVERSATION_KEYWORDS: &[&str] = &[
    "have a conversation",
    "carry on a conversation",
    "hold a conversation",
    "chat with",
    "talk to",
    "discuss with",
    "converse with",
    "back and forth",
    "keep talking",
    "continue the conversation",
];

static TOPIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)about\s+(.+?)(?:\.|\n|$)").expect("topic pattern is valid"));

/// Derives the requirement once from the task text. `None` means the gate always passes.
pub fn derive(task: &str) -> Option<ConversationRequirement> {
    if task.trim().is_empty() {
        return None;
    }

    let explicit = COUNT_PATTERNS.iter().find_map(|pattern| {
        let caps = pattern.captures(task)?;
        let count = caps[1].parse::<u32>().ok()?;
        (1..=MAX_REQUIRED_COUNT).contains(&count).then_some(count)
    });

    let required_count = match explicit {
        Some(count) => count,
        None => {
            let lower = task.to_lowercase();
            if !CONVERSATION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                return None;
            }
            DEFAULT_REQUIRED_COUNT
        }
    };

    Some(ConversationRequirement {
        required_count,
        topic: extract_topic(task),
    })
}

fn extract_topic(task: &str) -> Option<String> {
    TOPIC
        .captures(task)
        .map(|caps| caps[1].trim().to_string())
        .filter(|topic| !topic.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneDecision {
    Accept,
    /// Accepted only because the model kept insisting; the result is incomplete.
    ForceAccept { note: String },
    Reject { feedback: String },
}

/// Decides whether a `done` may end the run. Bumps `done_rejections` whenever the
/// requirement is still unmet.
pub fn gate_done(
    requirement: Option<&ConversationRequirement>,
    messages_sent: u32,
    done_rejections: &mut u32,
) -> DoneDecision {
    let Some(req) = requirement else {
        return DoneDecision::Accept;
    };
    if messages_sent >= req.required_count {
        return DoneDecision::Accept;
    }

    *done_rejections += 1;
    if *done_rejections >= MAX_DONE_REJECTIONS {
        return DoneDecision::ForceAccept {
            note: format!(
                "conversation incomplete: {messages_sent}/{} messages",
                req.required_count
            ),
        };
    }

    let remaining = req.required_count - messages_sent;
    let plural = if remaining == 1 { "" } else { "s" };
    let mut feedback = format!(
        "CONVERSATION NOT COMPLETE. You have sent {messages_sent} of {} required messages. \
         Send {remaining} more message{plural} before calling done. \
         Read the latest reply on the page and send your next message.",
        req.required_count
    );
    if let Some(topic) = &req.topic {
        feedback.push_str(&format!(" Keep the conversation about: {topic}"));
    }
    DoneDecision::Reject { feedback }
}

/// Progress line appended to feedback after a message is sent.
pub fn progress_note(requirement: Option<&ConversationRequirement>, messages_sent: u32) -> Option<String> {
    requirement.map(|req| format!("[Message {messages_sent} of {} sent]", req.required_count))
}
