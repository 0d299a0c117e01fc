use crate::extract::{PREVIEW_CLOSE, PREVIEW_OPEN};
use crate::phase::Phase;

const PERSONA: &str = "You are a product design partner helping a user turn a rough idea into a \
buildable plan. Work in four phases: vision, design, tech stack, export. Ask one or two focused \
questions at a time, summarize decisions as they are made, and keep answers short.";

/// General persona prompt for ordinary turns in `phase`.
pub fn persona_prompt(phase: Phase) -> String {
    let focus = match phase {
        Phase::Vision => {
            "Current phase: vision. Clarify the problem, the target users, the core features \
             and what is explicitly out of scope."
        }
        Phase::Design => {
            "Current phase: design. Explore layout, visual style and key screens. When showing \
             a screen, offer up to three options, each as its own preview block."
        }
        Phase::Stack => {
            "Current phase: tech stack. Recommend languages, frameworks, storage and hosting, \
             with one-line trade-offs for each choice."
        }
        Phase::Export => {
            "Current phase: export. Help the user review the phase documents and refine the \
             final build prompt."
        }
    };

    format!(
        "{PERSONA}\n\n{focus}\n\nTo show a UI mockup, wrap a single self-contained React \
         function component in {PREVIEW_OPEN} and {PREVIEW_CLOSE}. Inside the block: no import \
         or export statements, inline styles only, and the component function must be named App."
    )
}

/// Instruction prompt used instead of the persona when locking `phase`.
pub fn lock_prompt(phase: Phase) -> String {
    let document = match phase {
        Phase::Vision => {
            "a vision document: problem statement, target users, core features, non-goals and \
             success criteria"
        }
        Phase::Design => {
            "a design document: screens, navigation, visual style, components and interaction \
             notes"
        }
        Phase::Stack => {
            "a technical stack document: languages, frameworks, data model, storage, hosting and \
             the reasoning behind each choice"
        }
        Phase::Export => {
            "a single build prompt that another AI coding assistant can follow to implement the \
             whole project, referencing the vision, design and stack decisions"
        }
    };

    format!(
        "You are a technical writer. Using only the conversation so far, write {document}. \
         Output GitHub-flavoured markdown only, starting with a level-one heading. Do not ask \
         questions and do not include {PREVIEW_OPEN} blocks."
    )
}

/// Transient user turn appended to the history for a lock request.
pub fn lock_directive(phase: Phase) -> String {
    format!(
        "The {} phase is locked. Write the {} document now.",
        phase.as_str(),
        phase.label().to_lowercase()
    )
}

/// System prompt for raw component generation (sandbox mode).
pub const SANDBOX_PROMPT: &str = "You generate a single React function component named App. \
Reply with code only, optionally inside one ```jsx fence. No prose, no import or export \
statements, inline styles only. The code must be complete: every tag, parenthesis and brace \
closed.";

/// User turn for a sandbox request. The current component, when there is
/// one, is included so the model edits it rather than starting over.
pub fn sandbox_request(instruction: &str, current: Option<&str>, design: Option<&str>) -> String {
    let mut request = String::new();
    if let Some(design) = design {
        request.push_str("Design notes:\n");
        request.push_str(design.trim());
        request.push_str("\n\n");
    }
    if let Some(code) = current {
        request.push_str("Current component:\n```jsx\n");
        request.push_str(code.trim());
        request.push_str("\n```\n\n");
    }
    request.push_str(instruction.trim());
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_names_the_preview_tags() {
        for phase in Phase::ORDER {
            let prompt = persona_prompt(phase);
            assert!(prompt.contains(PREVIEW_OPEN) && prompt.contains(PREVIEW_CLOSE));
            assert!(prompt.contains(&format!("Current phase: {}", phase.label().to_lowercase())));
        }
    }

    #[test]
    fn sandbox_request_embeds_current_code() {
        let fresh = sandbox_request("  a login form ", None, None);
        assert_eq!(fresh, "a login form");

        let edit = sandbox_request("make it blue", Some("function App(){return null;}"), Some("# Design"));
        assert!(edit.starts_with("Design notes:\n# Design"));
        assert!(edit.contains("```jsx\nfunction App(){return null;}\n```"));
        assert!(edit.ends_with("make it blue"));
    }
}
