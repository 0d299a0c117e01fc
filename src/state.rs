//! Data model and the application-state container.
//!
//! `AppState` owns every collection and is loaded from / saved to a
//! [`KeyValueStore`] as whole records. Nothing here talks to the network.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{self, Provider};
use crate::phase::Phase;
use crate::store::{KeyValueStore, Snapshot};

pub const PROJECTS_KEY: &str = "projects";
pub const CONVERSATIONS_KEY: &str = "conversations";
pub const SELECTION_KEY: &str = "selection";

pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

/// Longest auto-generated title, in characters.
const MAX_AUTO_TITLE_CHARS: usize = 48;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    /// Owning project, by id.
    pub project_id: String,
    pub title: String,
    pub phase: Phase,
    pub messages: Vec<ChatMessage>,
    pub sandbox_code: Option<String>,
    /// One document per locked phase.
    #[serde(default)]
    pub spec_docs: BTreeMap<Phase, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            project_id: project_id.into(),
            title: title.into(),
            phase: Phase::Vision,
            messages: Vec::new(),
            sandbox_code: None,
            spec_docs: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The most recent message, if it is an assistant message. This is the
    /// only message that is ever mutated after creation.
    pub fn streaming_target_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant)
    }

    /// Replace the default title with the start of the first user message.
    fn auto_title(&mut self) {
        if self.title != DEFAULT_CONVERSATION_TITLE {
            return;
        }
        if let Some(first) = self.messages.iter().find(|m| m.role == Role::User) {
            let title = title_from(&first.content);
            if !title.is_empty() {
                self.title = title;
            }
        }
    }
}

/// First line of `text`, cut to `MAX_AUTO_TITLE_CHARS` with an ellipsis.
pub fn title_from(text: &str) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.chars().count() <= MAX_AUTO_TITLE_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX_AUTO_TITLE_CHARS - 1).collect();
    format!("{}…", cut.trim_end())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Last-active selection pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub project_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Runtime settings. Keys come from the environment and are never persisted.
#[derive(Clone, Default)]
pub struct Settings {
    pub active_model: String,
    pub api_keys: HashMap<Provider, String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<_> = self.api_keys.keys().collect();
        f.debug_struct("Settings")
            .field("active_model", &self.active_model)
            .field("api_keys", &format!("[REDACTED] for {providers:?}"))
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub projects: Vec<Project>,
    pub conversations: Vec<Conversation>,
    pub selection: Selection,
    pub settings: Settings,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    // --- persistence ---

    /// Replace all collections with what the store holds. Missing keys load
    /// as empty collections.
    pub async fn load(&mut self, store: &dyn KeyValueStore) -> Result<(), AppError> {
        self.projects = read_record(store, PROJECTS_KEY).await?.unwrap_or_default();
        self.conversations = read_record(store, CONVERSATIONS_KEY)
            .await?
            .unwrap_or_default();
        self.selection = read_record(store, SELECTION_KEY).await?.unwrap_or_default();

        // Drop a selection that points at something deleted elsewhere.
        if let Some(id) = &self.selection.conversation_id
            && self.conversation(id).is_none()
        {
            self.selection.conversation_id = None;
        }
        if let Some(id) = &self.selection.project_id
            && self.project(id).is_none()
        {
            self.selection = Selection::default();
        }

        tracing::info!(
            projects = self.projects.len(),
            conversations = self.conversations.len(),
            "state loaded"
        );
        Ok(())
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), AppError> {
        self.snapshot()?.write_to(store).await
    }

    /// Every persisted record.
    pub fn snapshot(&self) -> Result<Snapshot, AppError> {
        let mut snapshot = self.conversations_snapshot()?;
        snapshot.insert(PROJECTS_KEY, serde_json::to_string(&self.projects)?);
        snapshot.insert(SELECTION_KEY, serde_json::to_string(&self.selection)?);
        Ok(snapshot)
    }

    /// Just the conversation collection, the only record that changes per delta.
    pub fn conversations_snapshot(&self) -> Result<Snapshot, AppError> {
        let mut snapshot = Snapshot::default();
        snapshot.insert(CONVERSATIONS_KEY, serde_json::to_string(&self.conversations)?);
        Ok(snapshot)
    }

    // --- projects ---

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn create_project(&mut self, name: &str, description: &str) -> &Project {
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            created_at: now,
            updated_at: now,
        };
        self.selection = Selection {
            project_id: Some(project.id.clone()),
            conversation_id: None,
        };
        self.projects.push(project);
        &self.projects[self.projects.len() - 1]
    }

    pub fn rename_project(&mut self, id: &str, name: &str) -> Result<(), AppError> {
        let project = self
            .projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found("project", id))?;
        project.name = name.trim().to_string();
        project.updated_at = Utc::now();
        Ok(())
    }

    /// Delete a project and every conversation that belongs to it.
    pub fn delete_project(&mut self, id: &str) -> Result<(), AppError> {
        let before = self.projects.len();
        self.projects.retain(|p| p.id != id);
        if self.projects.len() == before {
            return Err(not_found("project", id));
        }
        self.conversations.retain(|c| c.project_id != id);
        if self.selection.project_id.as_deref() == Some(id) {
            self.selection = Selection::default();
        }
        Ok(())
    }

    // --- conversations ---

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub(crate) fn conversation_index(&self, id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    /// Conversations of a project, most recently updated first.
    pub fn conversations_for(&self, project_id: &str) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.project_id == project_id)
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    /// Create a conversation in phase vision and select it.
    pub fn create_conversation(
        &mut self,
        project_id: &str,
        title: Option<&str>,
    ) -> Result<&Conversation, AppError> {
        if self.project(project_id).is_none() {
            return Err(not_found("project", project_id));
        }
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_TITLE);
        let conversation = Conversation::new(project_id, title);
        self.selection = Selection {
            project_id: Some(project_id.to_string()),
            conversation_id: Some(conversation.id.clone()),
        };
        self.conversations.push(conversation);
        Ok(&self.conversations[self.conversations.len() - 1])
    }

    pub fn rename_conversation(&mut self, id: &str, title: &str) -> Result<(), AppError> {
        let conversation = self
            .conversation_mut(id)
            .ok_or_else(|| not_found("conversation", id))?;
        conversation.title = title.trim().to_string();
        conversation.touch();
        Ok(())
    }

    pub fn delete_conversation(&mut self, id: &str) -> Result<(), AppError> {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return Err(not_found("conversation", id));
        }
        if self.selection.conversation_id.as_deref() == Some(id) {
            self.selection.conversation_id = None;
        }
        Ok(())
    }

    pub fn select(&mut self, project_id: &str, conversation_id: Option<&str>) -> Result<(), AppError> {
        if self.project(project_id).is_none() {
            return Err(not_found("project", project_id));
        }
        if let Some(cid) = conversation_id {
            match self.conversation(cid) {
                Some(c) if c.project_id == project_id => {}
                _ => return Err(not_found("conversation", cid)),
            }
        }
        self.selection = Selection {
            project_id: Some(project_id.to_string()),
            conversation_id: conversation_id.map(str::to_string),
        };
        Ok(())
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.selection
            .conversation_id
            .as_deref()
            .and_then(|id| self.conversation(id))
    }

    pub fn active_conversation_id(&self) -> Option<String> {
        self.active_conversation().map(|c| c.id.clone())
    }

    /// Append a user message, titling the conversation if it is still untitled.
    pub(crate) fn push_user_message(&mut self, conversation_id: &str, text: &str) -> Result<(), AppError> {
        let conversation = self
            .conversation_mut(conversation_id)
            .ok_or_else(|| not_found("conversation", conversation_id))?;
        conversation.push(ChatMessage::new(Role::User, text));
        conversation.auto_title();
        Ok(())
    }

    // --- settings ---

    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        self.settings
            .api_keys
            .get(&provider)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    pub fn has_credentials(&self, provider: Provider) -> bool {
        self.api_key(provider).is_some()
    }

    pub fn set_api_key(&mut self, provider: Provider, key: &str) {
        let key = key.trim();
        if key.is_empty() {
            self.settings.api_keys.remove(&provider);
        } else {
            self.settings.api_keys.insert(provider, key.to_string());
        }
    }

    pub fn set_active_model(&mut self, id: &str) -> Result<(), AppError> {
        let model = models::resolve(id)?;
        self.settings.active_model = model.id.to_string();
        Ok(())
    }
}

fn not_found(kind: &'static str, id: &str) -> AppError {
    AppError::NotFound {
        kind,
        id: id.to_string(),
    }
}

async fn read_record<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn state_with_project() -> (AppState, String) {
        let mut state = AppState::default();
        let id = state.create_project("Recipe app", "share recipes").id.clone();
        (state, id)
    }

    #[test]
    fn new_conversation_starts_in_vision_and_is_selected() {
        let (mut state, pid) = state_with_project();
        let conv = state.create_conversation(&pid, None).unwrap();
        assert_eq!(conv.phase, Phase::Vision);
        assert!(conv.messages.is_empty());
        assert_eq!(conv.title, DEFAULT_CONVERSATION_TITLE);
        let cid = conv.id.clone();
        assert_eq!(state.active_conversation_id(), Some(cid));
    }

    #[test]
    fn create_conversation_requires_project() {
        let mut state = AppState::default();
        assert!(matches!(
            state.create_conversation("missing", None),
            Err(AppError::NotFound { kind: "project", .. })
        ));
    }

    #[test]
    fn first_user_message_titles_conversation() {
        let (mut state, pid) = state_with_project();
        let cid = state.create_conversation(&pid, None).unwrap().id.clone();
        state
            .push_user_message(&cid, "\n  A marketplace for used climbing gear, with escrow and ratings for sellers\n")
            .unwrap();
        state.push_user_message(&cid, "second").unwrap();

        let title = &state.conversation(&cid).unwrap().title;
        assert!(title.starts_with("A marketplace for used climbing gear"));
        assert!(title.ends_with('…'));
        assert_eq!(title.chars().count(), MAX_AUTO_TITLE_CHARS);
    }

    #[test]
    fn explicit_title_is_kept() {
        let (mut state, pid) = state_with_project();
        let cid = state.create_conversation(&pid, Some("Kickoff")).unwrap().id.clone();
        state.push_user_message(&cid, "hello").unwrap();
        assert_eq!(state.conversation(&cid).unwrap().title, "Kickoff");
    }

    #[test]
    fn deleting_project_cascades_and_clears_selection() {
        let (mut state, pid) = state_with_project();
        state.create_conversation(&pid, None).unwrap();
        state.create_conversation(&pid, None).unwrap();
        let other = state.create_project("Other", "").id.clone();
        state.create_conversation(&other, None).unwrap();
        state.select(&pid, None).unwrap();

        state.delete_project(&pid).unwrap();

        assert_eq!(state.conversations.len(), 1);
        assert_eq!(state.conversations[0].project_id, other);
        assert_eq!(state.selection, Selection::default());
    }

    #[test]
    fn select_rejects_conversation_from_other_project() {
        let (mut state, pid) = state_with_project();
        let other = state.create_project("Other", "").id.clone();
        let foreign = state.create_conversation(&other, None).unwrap().id.clone();
        assert!(state.select(&pid, Some(&foreign)).is_err());
    }

    #[test]
    fn streaming_target_is_only_a_trailing_assistant_message() {
        let mut conv = Conversation::new("p", "t");
        conv.push(ChatMessage::new(Role::Assistant, "a"));
        conv.push(ChatMessage::new(Role::User, "u"));
        assert!(conv.streaming_target_mut().is_none());
        conv.push(ChatMessage::new(Role::Assistant, ""));
        assert!(conv.streaming_target_mut().is_some());
    }

    #[test]
    fn settings_debug_redacts_keys() {
        let mut state = AppState::default();
        state.set_api_key(Provider::OpenAi, "sk-secret");
        let debug = format!("{:?}", state.settings);
        assert!(!debug.contains("sk-secret"));
        assert!(state.has_credentials(Provider::OpenAi));
        state.set_api_key(Provider::OpenAi, "  ");
        assert!(!state.has_credentials(Provider::OpenAi));
    }

    #[tokio::test]
    async fn save_then_load_round_trips_collections() {
        let store = MemoryStore::new();
        let (mut state, pid) = state_with_project();
        let cid = state.create_conversation(&pid, None).unwrap().id.clone();
        state.push_user_message(&cid, "hello").unwrap();
        {
            let conv = state.conversation_mut(&cid).unwrap();
            conv.spec_docs.insert(Phase::Vision, "# Vision".to_string());
            conv.phase = Phase::Design;
        }
        state.save(&store).await.unwrap();

        let mut loaded = AppState::default();
        loaded.load(&store).await.unwrap();
        assert_eq!(loaded.projects, state.projects);
        assert_eq!(loaded.conversations, state.conversations);
        assert_eq!(loaded.selection, state.selection);

        let raw = store.get(CONVERSATIONS_KEY).await.unwrap().unwrap();
        assert!(raw.contains("\"specDocs\":{\"vision\":\"# Vision\"}"));
    }

    #[tokio::test]
    async fn load_drops_dangling_selection() {
        let store = MemoryStore::new();
        store
            .set(SELECTION_KEY, r#"{"projectId":"gone","conversationId":"gone"}"#)
            .await
            .unwrap();
        let mut state = AppState::default();
        state.load(&store).await.unwrap();
        assert_eq!(state.selection, Selection::default());
    }
}
