//! Streaming orchestrator: owns the application state, drives one provider
//! stream at a time and applies its deltas to the conversation in place.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::component::{self, StructuralError};
use crate::config::{Config, Endpoints};
use crate::dispatch::http::StreamDispatch;
use crate::dispatch::{Completion, StreamRequest, StreamSink, adapter_for};
use crate::error::AppError;
use crate::extract;
use crate::models::{self, ModelConfig};
use crate::phase::{self, LockResult, Phase};
use crate::prompts;
use crate::state::{AppState, ChatMessage, Conversation, Role, Settings};
use crate::store::{KeyValueStore, Persister, SnapshotThrottle};

/// Separates streamed text from the error note appended after a failure.
const ERROR_NOTE_PREFIX: &str = "Error: ";

/// Notifications for a front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Delta {
        conversation_id: String,
        text: String,
    },
    /// A preview block was completed and is now the active preview.
    Preview {
        conversation_id: String,
        message_id: String,
        code: String,
    },
    Completed {
        conversation_id: String,
        completion: Completion,
    },
    Failed {
        conversation_id: String,
        message: String,
    },
    PhaseChanged {
        conversation_id: String,
        phase: Phase,
    },
    SandboxUpdated {
        conversation_id: String,
    },
}

/// Cloneable stop handle for the stream in flight, if any.
#[derive(Debug, Clone, Default)]
pub struct StreamControl {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl StreamControl {
    /// Cancel the in-flight stream. Returns whether one was running.
    pub fn stop(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.slot().is_some()
    }

    fn begin(&self) -> Result<StreamGuard, AppError> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(AppError::Busy);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(StreamGuard {
            control: self.clone(),
            token,
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        // Poisoning only means a panic elsewhere; the token is still usable.
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks the session streaming until dropped.
struct StreamGuard {
    control: StreamControl,
    token: CancellationToken,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        *self.control.slot() = None;
    }
}

/// Result of offering generated code to the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    /// Repaired and validated; now the conversation's sandbox code.
    Accepted(String),
    /// Discarded. The previous known-good code stays in place.
    Rejected {
        diagnostic: StructuralError,
        restored: Option<String>,
    },
    Cancelled,
}

/// The latest published preview and the conversation it belongs to.
#[derive(Debug, Clone)]
struct ActivePreview {
    conversation_id: String,
    code: String,
}

pub struct Orchestrator {
    state: AppState,
    store: Arc<dyn KeyValueStore>,
    persister: Persister,
    dispatch: StreamDispatch,
    endpoints: Endpoints,
    control: StreamControl,
    events: Option<mpsc::UnboundedSender<UiEvent>>,
    active_preview: Option<ActivePreview>,
}

impl Orchestrator {
    /// Must be called inside a tokio runtime: the persister task is spawned here.
    pub fn new(state: AppState, store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        let persister = Persister::spawn(Arc::clone(&store), config.persist_debounce);
        Self {
            state,
            store,
            persister,
            dispatch: StreamDispatch::new(),
            endpoints: config.endpoints.clone(),
            control: StreamControl::default(),
            events: None,
            active_preview: None,
        }
    }

    /// Build from configuration and whatever the store already holds.
    pub async fn open(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self, AppError> {
        let mut state = AppState::new(Settings {
            active_model: config.default_model.clone(),
            api_keys: config.api_keys.clone(),
        });
        state.load(store.as_ref()).await?;
        Ok(Self::new(state, store, config))
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<UiEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Apply a structural change (CRUD, settings) and persist it immediately.
    pub async fn update<R>(
        &mut self,
        change: impl FnOnce(&mut AppState) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let result = change(&mut self.state)?;
        let active = self.state.active_conversation_id();
        if self
            .active_preview
            .as_ref()
            .is_some_and(|p| active.as_deref() != Some(p.conversation_id.as_str()))
        {
            self.active_preview = None;
        }
        self.persister.flush(self.state.snapshot()?).await?;
        Ok(result)
    }

    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.control.is_streaming()
    }

    /// Cancel the in-flight stream, keeping whatever text already arrived.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Code of the most recently completed preview block in the active
    /// conversation.
    pub fn active_preview(&self) -> Option<&str> {
        let preview = self.active_preview.as_ref()?;
        let active = self.state.selection.conversation_id.as_deref()?;
        (preview.conversation_id == active).then_some(preview.code.as_str())
    }

    /// Send a user turn in the active conversation and stream the reply.
    ///
    /// The reply streams into an assistant placeholder appended right after
    /// the user message. A cancelled stream keeps its partial text and is
    /// not an error. On failure an error note is appended to the reply.
    pub async fn send(&mut self, text: &str) -> Result<Completion, AppError> {
        let conversation_id = self
            .state
            .active_conversation_id()
            .ok_or(AppError::NoActiveConversation)?;
        let (model, api_key) = self.credentials()?;
        let guard = self.control.begin()?;

        let index = self.conversation_index(&conversation_id)?;
        self.state.push_user_message(&conversation_id, text)?;
        let conversation = &mut self.state.conversations[index];
        conversation.push(ChatMessage::new(Role::Assistant, ""));
        let phase = conversation.phase;
        if let Err(e) = self.persist_now().await {
            tracing::warn!(conversation = %conversation_id, "failed to persist new turn: {e}");
            let note = e.user_message();
            append_error_note(&mut self.state.conversations[index], &note);
            self.emit(UiEvent::Failed {
                conversation_id,
                message: note,
            });
            return Err(e);
        }

        let adapter = adapter_for(model.provider, &self.endpoints);
        let spec = {
            let messages = &self.state.conversations[index].messages;
            let system_prompt = prompts::persona_prompt(phase);
            adapter.build_request(&StreamRequest {
                messages: &messages[..messages.len() - 1],
                api_key: &api_key,
                model,
                system_prompt: &system_prompt,
            })
        };

        tracing::info!(
            conversation = %conversation_id,
            model = model.id,
            %phase,
            "sending message"
        );

        let Self {
            state,
            persister,
            dispatch,
            events,
            active_preview,
            ..
        } = self;
        let throttle = persister.throttle();
        let mut sink = ReplySink {
            state,
            index,
            persister,
            throttle,
            events: events.as_ref(),
            active_preview,
        };
        let result = dispatch
            .stream(adapter.as_ref(), spec, &guard.token, &mut sink)
            .await;
        drop(guard);

        if let Err(e) = self.persist_now().await {
            tracing::warn!("failed to persist reply: {e}");
        }
        result
    }

    /// Lock the active conversation's current phase.
    ///
    /// Asks the model for the phase document using the phase's lock prompt,
    /// stores it as that phase's artifact and advances. Returns `None` when
    /// the request was cancelled; nothing is stored then.
    pub async fn lock_phase(&mut self) -> Result<Option<LockResult>, AppError> {
        let conversation_id = self
            .state
            .active_conversation_id()
            .ok_or(AppError::NoActiveConversation)?;
        let (model, api_key) = self.credentials()?;
        let guard = self.control.begin()?;
        let index = self.conversation_index(&conversation_id)?;

        let conversation = &self.state.conversations[index];
        let plan = phase::plan_lock(conversation);
        let mut messages: Vec<ChatMessage> = conversation.messages.clone();
        messages.push(ChatMessage::new(Role::User, plan.directive.clone()));

        let adapter = adapter_for(model.provider, &self.endpoints);
        let spec = adapter.build_request(&StreamRequest {
            messages: &messages,
            api_key: &api_key,
            model,
            system_prompt: &plan.system_prompt,
        });

        tracing::info!(conversation = %conversation_id, phase = %plan.phase, "locking phase");

        let mut sink = BufferSink::new(&conversation_id, self.events.as_ref());
        let completion = self
            .dispatch
            .stream(adapter.as_ref(), spec, &guard.token, &mut sink)
            .await?;
        drop(guard);

        if completion == Completion::Cancelled {
            tracing::info!(conversation = %conversation_id, "phase lock cancelled");
            return Ok(None);
        }
        let document = sink.buffer.trim();
        if document.is_empty() {
            return Err(AppError::Protocol(format!(
                "empty {} document",
                plan.phase.as_str()
            )));
        }

        let result = phase::commit_lock(
            &mut self.state.conversations[index],
            &plan,
            document.to_string(),
        );
        self.persist_now().await?;

        if let Some(next) = result.advanced_to {
            tracing::info!(conversation = %conversation_id, phase = %next, "phase advanced");
            self.emit(UiEvent::PhaseChanged {
                conversation_id,
                phase: next,
            });
        }
        Ok(Some(result))
    }

    /// Generate sandbox code from a free-form instruction (raw code mode).
    pub async fn generate_sandbox(&mut self, instruction: &str) -> Result<SandboxOutcome, AppError> {
        let conversation_id = self
            .state
            .active_conversation_id()
            .ok_or(AppError::NoActiveConversation)?;
        let (model, api_key) = self.credentials()?;
        let guard = self.control.begin()?;
        let index = self.conversation_index(&conversation_id)?;

        let conversation = &self.state.conversations[index];
        let request = prompts::sandbox_request(
            instruction,
            conversation.sandbox_code.as_deref(),
            conversation.spec_docs.get(&Phase::Design).map(String::as_str),
        );
        let messages = [ChatMessage::new(Role::User, request)];

        let adapter = adapter_for(model.provider, &self.endpoints);
        let spec = adapter.build_request(&StreamRequest {
            messages: &messages,
            api_key: &api_key,
            model,
            system_prompt: prompts::SANDBOX_PROMPT,
        });

        let mut sink = BufferSink::new(&conversation_id, self.events.as_ref());
        let completion = self
            .dispatch
            .stream(adapter.as_ref(), spec, &guard.token, &mut sink)
            .await?;
        drop(guard);

        if completion == Completion::Cancelled {
            return Ok(SandboxOutcome::Cancelled);
        }
        let raw = sink.buffer;
        self.offer_sandbox_code(index, &raw).await
    }

    /// Make the `index`-th preview block of a message the sandbox code.
    pub async fn promote_preview(
        &mut self,
        message_id: &str,
        index: usize,
    ) -> Result<SandboxOutcome, AppError> {
        let conversation_id = self
            .state
            .active_conversation_id()
            .ok_or(AppError::NoActiveConversation)?;
        let conv_index = self.conversation_index(&conversation_id)?;
        let message = self.state.conversations[conv_index]
            .message(message_id)
            .ok_or_else(|| AppError::NotFound {
                kind: "message",
                id: message_id.to_string(),
            })?;
        let code = extract::extract_all(&message.content)
            .into_iter()
            .nth(index)
            .ok_or_else(|| AppError::NotFound {
                kind: "preview",
                id: format!("{message_id}#{index}"),
            })?;
        self.offer_sandbox_code(conv_index, &code).await
    }

    /// Flush everything and stop the background writer.
    pub async fn shutdown(self) -> Result<(), AppError> {
        self.control.stop();
        let result = self.persister.flush(self.state.snapshot()?).await;
        self.persister.shutdown().await;
        result
    }

    /// Store the persisted state was loaded from.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    async fn offer_sandbox_code(
        &mut self,
        index: usize,
        raw: &str,
    ) -> Result<SandboxOutcome, AppError> {
        let unfenced = extract::strip_code_fences(raw);
        let code = extract::strip_unclosed_fence(&unfenced).trim();

        let conversation = &mut self.state.conversations[index];
        match component::prepare(code) {
            Ok(code) => {
                conversation.sandbox_code = Some(code.clone());
                conversation.touch();
                let conversation_id = conversation.id.clone();
                self.persist_now().await?;
                self.emit(UiEvent::SandboxUpdated { conversation_id });
                Ok(SandboxOutcome::Accepted(code))
            }
            Err(diagnostic) => {
                tracing::warn!(
                    conversation = %conversation.id,
                    "rejected generated component: {diagnostic}"
                );
                Ok(SandboxOutcome::Rejected {
                    diagnostic,
                    restored: conversation.sandbox_code.clone(),
                })
            }
        }
    }

    fn credentials(&self) -> Result<(&'static ModelConfig, String), AppError> {
        let model = models::resolve(&self.state.settings.active_model)?;
        let key = self
            .state
            .api_key(model.provider)
            .ok_or_else(|| AppError::MissingCredentials {
                provider: model.provider.to_string(),
            })?;
        Ok((model, key.to_string()))
    }

    fn conversation_index(&self, id: &str) -> Result<usize, AppError> {
        self.state
            .conversation_index(id)
            .ok_or_else(|| AppError::NotFound {
                kind: "conversation",
                id: id.to_string(),
            })
    }

    async fn persist_now(&self) -> Result<(), AppError> {
        self.persister.flush(self.state.snapshot()?).await
    }

    fn emit(&self, event: UiEvent) {
        send_event(self.events.as_ref(), event);
    }
}

/// `"Error: <note>"`, after a blank line when text already streamed.
fn append_error_note(conversation: &mut Conversation, note: &str) {
    if let Some(message) = conversation.streaming_target_mut() {
        if !message.content.is_empty() {
            message.content.push_str("\n\n");
        }
        message.content.push_str(ERROR_NOTE_PREFIX);
        message.content.push_str(note);
    }
    conversation.touch();
}

fn send_event(events: Option<&mpsc::UnboundedSender<UiEvent>>, event: UiEvent) {
    if let Some(tx) = events
        && tx.send(event).is_err()
    {
        tracing::debug!("ui event receiver dropped");
    }
}

/// Streams into the trailing assistant message of one conversation.
struct ReplySink<'a> {
    state: &'a mut AppState,
    index: usize,
    persister: &'a Persister,
    throttle: SnapshotThrottle,
    events: Option<&'a mpsc::UnboundedSender<UiEvent>>,
    active_preview: &'a mut Option<ActivePreview>,
}

impl ReplySink<'_> {
    fn conversation_id(&self) -> String {
        self.state.conversations[self.index].id.clone()
    }

    /// Text skipped by the throttle reaches the store with the next snapshot
    /// or the flush after the stream ends.
    fn schedule_persist(&mut self) {
        if !self.throttle.ready() {
            return;
        }
        match self.state.conversations_snapshot() {
            Ok(snapshot) => self.persister.schedule(snapshot),
            Err(e) => tracing::warn!("failed to snapshot conversations: {e}"),
        }
    }
}

impl StreamSink for ReplySink<'_> {
    fn on_delta(&mut self, text: &str) {
        let conversation = &mut self.state.conversations[self.index];
        let conversation_id = conversation.id.clone();
        let Some(message) = conversation.streaming_target_mut() else {
            tracing::warn!(conversation = %conversation_id, "no assistant message to stream into");
            return;
        };
        message.content.push_str(text);

        let preview = extract::is_complete(&message.content)
            .then(|| extract::latest(&message.content))
            .flatten()
            .filter(|code| {
                !self
                    .active_preview
                    .as_ref()
                    .is_some_and(|p| p.conversation_id == conversation_id && p.code == *code)
            });
        let message_id = message.id.clone();

        send_event(
            self.events,
            UiEvent::Delta {
                conversation_id: conversation_id.clone(),
                text: text.to_string(),
            },
        );
        if let Some(code) = preview {
            *self.active_preview = Some(ActivePreview {
                conversation_id: conversation_id.clone(),
                code: code.clone(),
            });
            send_event(
                self.events,
                UiEvent::Preview {
                    conversation_id,
                    message_id,
                    code,
                },
            );
        }
        self.schedule_persist();
    }

    fn on_complete(&mut self, completion: Completion) {
        self.state.conversations[self.index].touch();
        send_event(
            self.events,
            UiEvent::Completed {
                conversation_id: self.conversation_id(),
                completion,
            },
        );
    }

    fn on_error(&mut self, error: &AppError) {
        let note = error.user_message();
        append_error_note(&mut self.state.conversations[self.index], &note);
        send_event(
            self.events,
            UiEvent::Failed {
                conversation_id: self.conversation_id(),
                message: note,
            },
        );
    }
}

/// Collects a whole response for requests whose output is not a chat turn.
struct BufferSink<'a> {
    conversation_id: String,
    events: Option<&'a mpsc::UnboundedSender<UiEvent>>,
    buffer: String,
}

impl<'a> BufferSink<'a> {
    fn new(conversation_id: &str, events: Option<&'a mpsc::UnboundedSender<UiEvent>>) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            events,
            buffer: String::new(),
        }
    }
}

impl StreamSink for BufferSink<'_> {
    fn on_delta(&mut self, text: &str) {
        self.buffer.push_str(text);
        send_event(
            self.events,
            UiEvent::Delta {
                conversation_id: self.conversation_id.clone(),
                text: text.to_string(),
            },
        );
    }

    fn on_complete(&mut self, completion: Completion) {
        send_event(
            self.events,
            UiEvent::Completed {
                conversation_id: self.conversation_id.clone(),
                completion,
            },
        );
    }

    fn on_error(&mut self, error: &AppError) {
        send_event(
            self.events,
            UiEvent::Failed {
                conversation_id: self.conversation_id.clone(),
                message: error.user_message(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    const COMPONENT: &str = "function App(){return (<div>ok</div>);}";

    async fn orchestrator_with_conversation() -> Orchestrator {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut orch = Orchestrator::new(AppState::default(), store, &Config::default());
        orch.update(|state| {
            let pid = state.create_project("Demo", "").id.clone();
            state.create_conversation(&pid, None)?;
            Ok(())
        })
        .await
        .unwrap();
        orch
    }

    /// Memory store whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(AppError::Store("disk full".to_string()));
            }
            self.inner.set(key, value).await
        }
    }

    async fn add_conversation(orch: &mut Orchestrator) -> String {
        let project_id = orch.state.selection.project_id.clone().unwrap();
        orch.update(|state| Ok(state.create_conversation(&project_id, None)?.id.clone()))
            .await
            .unwrap()
    }

    fn preview_message(blocks: &[&str]) -> ChatMessage {
        let body: String = blocks
            .iter()
            .map(|b| format!("Option:\n<ui_preview>{b}</ui_preview>\n"))
            .collect();
        ChatMessage::new(Role::Assistant, body)
    }

    #[test]
    fn stream_control_reports_busy_and_resets_on_drop() {
        let control = StreamControl::default();
        assert!(!control.stop());
        let guard = control.begin().unwrap();
        assert!(control.is_streaming());
        assert!(matches!(control.begin(), Err(AppError::Busy)));
        assert!(control.stop());
        assert!(guard.token.is_cancelled());
        drop(guard);
        assert!(!control.is_streaming());
    }

    #[tokio::test]
    async fn send_without_conversation_is_rejected() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut orch = Orchestrator::new(AppState::default(), store, &Config::default());
        assert!(matches!(
            orch.send("hi").await,
            Err(AppError::NoActiveConversation)
        ));
    }

    #[tokio::test]
    async fn send_without_key_leaves_conversation_untouched() {
        let mut orch = orchestrator_with_conversation().await;
        orch.state.settings.active_model = models::DEFAULT_MODEL.to_string();

        let err = orch.send("hello").await.unwrap_err();
        assert!(matches!(err, AppError::MissingCredentials { .. }));
        assert!(orch.state().active_conversation().unwrap().messages.is_empty());
        assert!(!orch.is_streaming());
    }

    #[tokio::test]
    async fn promote_preview_picks_the_requested_option() {
        let mut orch = orchestrator_with_conversation().await;
        let message = preview_message(&[
            "function App(){return <p>A</p>;}",
            COMPONENT,
        ]);
        let message_id = message.id.clone();
        let cid = orch.state.active_conversation_id().unwrap();
        orch.state.conversation_mut(&cid).unwrap().push(message);

        let outcome = orch.promote_preview(&message_id, 1).await.unwrap();
        assert_eq!(outcome, SandboxOutcome::Accepted(COMPONENT.to_string()));
        assert_eq!(
            orch.state().conversation(&cid).unwrap().sandbox_code.as_deref(),
            Some(COMPONENT)
        );

        assert!(matches!(
            orch.promote_preview(&message_id, 2).await,
            Err(AppError::NotFound { kind: "preview", .. })
        ));
    }

    #[tokio::test]
    async fn invalid_preview_keeps_previous_sandbox_code() {
        let mut orch = orchestrator_with_conversation().await;
        let cid = orch.state.active_conversation_id().unwrap();
        let message = preview_message(&["<div>no component</div>"]);
        let message_id = message.id.clone();
        {
            let conv = orch.state.conversation_mut(&cid).unwrap();
            conv.sandbox_code = Some(COMPONENT.to_string());
            conv.push(message);
        }

        let outcome = orch.promote_preview(&message_id, 0).await.unwrap();
        assert_eq!(
            outcome,
            SandboxOutcome::Rejected {
                diagnostic: StructuralError::MissingFunction,
                restored: Some(COMPONENT.to_string()),
            }
        );
        assert_eq!(
            orch.state().conversation(&cid).unwrap().sandbox_code.as_deref(),
            Some(COMPONENT)
        );
    }

    #[tokio::test]
    async fn truncated_preview_is_repaired_on_promotion() {
        let mut orch = orchestrator_with_conversation().await;
        let cid = orch.state.active_conversation_id().unwrap();
        let message = preview_message(&["function App(){return (<div>"]);
        let message_id = message.id.clone();
        orch.state.conversation_mut(&cid).unwrap().push(message);

        let outcome = orch.promote_preview(&message_id, 0).await.unwrap();
        assert_eq!(
            outcome,
            SandboxOutcome::Accepted("function App(){return (<div></div>)}".to_string())
        );
    }

    #[tokio::test]
    async fn failed_save_before_streaming_notes_the_error() {
        let store = Arc::new(FlakyStore::default());
        let dyn_store: Arc<dyn KeyValueStore> = store.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orch =
            Orchestrator::new(AppState::default(), dyn_store, &Config::default()).with_events(tx);
        orch.update(|state| {
            let pid = state.create_project("Demo", "").id.clone();
            state.create_conversation(&pid, None)?;
            state.set_active_model(models::DEFAULT_MODEL)?;
            let provider = models::resolve(models::DEFAULT_MODEL)?.provider;
            state.set_api_key(provider, "test-key");
            Ok(())
        })
        .await
        .unwrap();
        store.failing.store(true, Ordering::Relaxed);

        let err = orch.send("hello").await.unwrap_err();
        assert!(matches!(err, AppError::Store(_)), "{err:?}");

        let conv = orch.state().active_conversation().unwrap();
        assert_eq!(conv.messages.len(), 2);
        let note = &conv.messages[1].content;
        assert!(note.starts_with("Error: "), "{note}");
        assert!(note.contains("disk full"), "{note}");
        assert!(!orch.is_streaming());
        assert!(matches!(rx.try_recv(), Ok(UiEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn switching_conversations_clears_the_active_preview() {
        let mut orch = orchestrator_with_conversation().await;
        let first = orch.state.active_conversation_id().unwrap();
        orch.active_preview = Some(ActivePreview {
            conversation_id: first.clone(),
            code: COMPONENT.to_string(),
        });
        assert_eq!(orch.active_preview(), Some(COMPONENT));

        let second = add_conversation(&mut orch).await;
        assert_eq!(orch.state().active_conversation_id(), Some(second));
        assert_eq!(orch.active_preview(), None);

        // Switching back does not resurrect it.
        let project_id = orch.state.selection.project_id.clone().unwrap();
        orch.update(|state| state.select(&project_id, Some(&first)))
            .await
            .unwrap();
        assert_eq!(orch.active_preview(), None);
    }

    #[tokio::test]
    async fn same_preview_in_another_conversation_is_published() {
        let mut orch = orchestrator_with_conversation().await;
        let first = orch.state.active_conversation_id().unwrap();
        let second = add_conversation(&mut orch).await;
        let index = orch.conversation_index(&second).unwrap();
        orch.state.conversations[index].push(ChatMessage::new(Role::Assistant, ""));

        let mut active_preview = Some(ActivePreview {
            conversation_id: first,
            code: COMPONENT.to_string(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = ReplySink {
            state: &mut orch.state,
            index,
            persister: &orch.persister,
            throttle: orch.persister.throttle(),
            events: Some(&tx),
            active_preview: &mut active_preview,
        };
        sink.on_delta(&format!("Try this:\n<ui_preview>{COMPONENT}</ui_preview>"));
        sink.on_delta("\nMore?");

        let mut previews = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let UiEvent::Preview {
                conversation_id,
                code,
                ..
            } = event
            {
                previews.push((conversation_id, code));
            }
        }
        assert_eq!(previews, vec![(second.clone(), COMPONENT.to_string())]);
        assert_eq!(active_preview.map(|p| p.conversation_id), Some(second));
    }

    #[tokio::test]
    async fn update_persists_immediately() {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn KeyValueStore> = store.clone();
        let mut orch = Orchestrator::new(AppState::default(), dyn_store, &Config::default());
        orch.update(|state| {
            state.create_project("Demo", "");
            Ok(())
        })
        .await
        .unwrap();

        let raw = store.get(crate::state::PROJECTS_KEY).await.unwrap().unwrap();
        assert!(raw.contains("\"name\":\"Demo\""));
        orch.shutdown().await.unwrap();
    }
}
