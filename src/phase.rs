//! The four-phase brainstorming workflow.
//!
//! Phases only move forward, one step per explicit lock. Locking stores the
//! generated document for the phase being locked, then advances. The last
//! phase stores its document and stays put.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::prompts;
use crate::state::Conversation;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Vision,
    Design,
    Stack,
    Export,
}

impl Phase {
    pub const ORDER: [Phase; 4] = [Phase::Vision, Phase::Design, Phase::Stack, Phase::Export];

    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Vision => Some(Phase::Design),
            Phase::Design => Some(Phase::Stack),
            Phase::Stack => Some(Phase::Export),
            Phase::Export => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Vision => "vision",
            Phase::Design => "design",
            Phase::Stack => "stack",
            Phase::Export => "export",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Vision => "Vision",
            Phase::Design => "Design",
            Phase::Stack => "Tech stack",
            Phase::Export => "Export",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ORDER
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown phase: {s}"))
    }
}

/// What a lock request sends: the phase's instruction prompt in place of the
/// persona prompt, plus a directive turn that is not stored.
#[derive(Debug, Clone)]
pub struct LockPlan {
    pub phase: Phase,
    pub system_prompt: String,
    pub directive: String,
}

pub fn plan_lock(conversation: &Conversation) -> LockPlan {
    let phase = conversation.phase;
    LockPlan {
        phase,
        system_prompt: prompts::lock_prompt(phase),
        directive: prompts::lock_directive(phase),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResult {
    /// Phase whose artifact was written.
    pub stored: Phase,
    /// New phase, if the conversation advanced.
    pub advanced_to: Option<Phase>,
}

/// Store `document` as the artifact of the phase named in `plan` and advance.
///
/// The phase is taken from the plan, not re-read from the conversation, so
/// the artifact always lands under the phase the request was built for.
pub fn commit_lock(conversation: &mut Conversation, plan: &LockPlan, document: String) -> LockResult {
    conversation.spec_docs.insert(plan.phase, document);

    let advanced_to = plan.phase.next();
    if let Some(next) = advanced_to {
        conversation.phase = next;
    }
    conversation.touch();

    LockResult {
        stored: plan.phase,
        advanced_to,
    }
}
