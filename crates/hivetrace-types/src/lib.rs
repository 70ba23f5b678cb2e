mod agent;
mod classify;
mod coverage;
mod error;
mod event;
mod relation;
mod session;
mod sync;

pub use agent::*;
pub use classify::classify_agent_type;
pub use coverage::*;
pub use error::{Error, Result};
pub use event::*;
pub use relation::*;
pub use session::*;
pub use sync::*;

use serde::{Deserialize, Serialize};

/// Lifecycle checkpoint at which a hook event was emitted.
///
/// Serialized with the exact names the hook producers send on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEventType {
    SessionStart,
    SessionEnd,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    SubagentStart,
    SubagentStop,
    Notification,
    PreCompact,
    Stop,
}

impl HookEventType {
    /// Every known hook type, in dashboard display order.
    pub const ALL: [HookEventType; 10] = [
        HookEventType::SessionStart,
        HookEventType::SessionEnd,
        HookEventType::UserPromptSubmit,
        HookEventType::PreToolUse,
        HookEventType::PostToolUse,
        HookEventType::SubagentStart,
        HookEventType::SubagentStop,
        HookEventType::Notification,
        HookEventType::PreCompact,
        HookEventType::Stop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEventType::SessionStart => "SessionStart",
            HookEventType::SessionEnd => "SessionEnd",
            HookEventType::UserPromptSubmit => "UserPromptSubmit",
            HookEventType::PreToolUse => "PreToolUse",
            HookEventType::PostToolUse => "PostToolUse",
            HookEventType::SubagentStart => "SubagentStart",
            HookEventType::SubagentStop => "SubagentStop",
            HookEventType::Notification => "Notification",
            HookEventType::PreCompact => "PreCompact",
            HookEventType::Stop => "Stop",
        }
    }
}

impl std::str::FromStr for HookEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HookEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownHookType(s.to_string()))
    }
}

impl std::fmt::Display for HookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
