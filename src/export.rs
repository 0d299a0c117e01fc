use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::phase::Phase;
use crate::state::Conversation;

pub const SANDBOX_FILENAME: &str = "sandbox.jsx";

/// Fixed file name of a phase's artifact.
pub fn filename_for(phase: Phase) -> &'static str {
    match phase {
        Phase::Vision => "01-vision.md",
        Phase::Design => "02-design.md",
        Phase::Stack => "03-tech-stack.md",
        Phase::Export => "04-build-prompt.md",
    }
}

/// `(filename, content)` for every stored artifact in phase order, then the
/// sandbox component when there is one.
pub fn bundle(conversation: &Conversation) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = conversation
        .spec_docs
        .iter()
        .map(|(phase, doc)| (filename_for(*phase).to_string(), with_newline(doc)))
        .collect();
    if let Some(code) = &conversation.sandbox_code {
        files.push((SANDBOX_FILENAME.to_string(), with_newline(code)));
    }
    files
}

/// Write the bundle into `dir`, creating it if needed. Returns the paths
/// written.
pub async fn write_bundle(conversation: &Conversation, dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let files = bundle(conversation);
    if files.is_empty() {
        return Ok(Vec::new());
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::Store(format!("failed to create {}: {e}", dir.display())))?;

    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files {
        let path = dir.join(name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| AppError::Store(format!("failed to write {}: {e}", path.display())))?;
        written.push(path);
    }

    tracing::info!(
        conversation = %conversation.id,
        files = written.len(),
        dir = %dir.display(),
        "exported bundle"
    );
    Ok(written)
}

fn with_newline(text: &str) -> String {
    let mut out = text.trim_end().to_string();
    out.push('\n');
    out
}
