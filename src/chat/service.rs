//! Chat service
//!
//! Turns UI intents into engine commands and keeps the displayed conversation,
//! the persisted history and the engine context in step.
//!
//! Every engine operation follows the same shape: submit a command, record the
//! task id from the QUEUED acknowledgement, assume BUSY, then poll status until
//! the engine reports anything else. Only one operation runs at a time; intents
//! that arrive while the engine is occupied are ignored rather than queued.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::chat::events::ChatEvent;
use crate::chat::session::ConversationSession;
use crate::chat::ChatError;
use crate::inference::codec::{Acknowledgement, CodecError, CommandBuilder, StatusReport, TaskId};
use crate::inference::history;
use crate::inference::poll::poll_until;
use crate::inference::port::{EngineCommandPort, EngineHandle};
use crate::inference::state::{Activity, EngineState, EngineStateMachine};
use crate::inference::streaming::{lock, SharedTranscript, TokenSink};
use crate::storage::conversations::{Conversation, ConversationStore, ConversationSummary};
use crate::storage::settings::EngineSettings;
use crate::storage::StorageError;
use crate::types::message::ChatMessage;
use crate::types::model::{ModelDescriptor, SamplingParameters};

const EVENT_CAPACITY: usize = 1024;

/// Result of [`ChatService::load_model`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed(String),
}

/// Result of [`ChatService::send_message`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Precondition not met; nothing was sent or displayed
    Ignored,
    /// Exchange finished and was persisted
    Completed { aborted: bool },
    /// The engine refused or failed the generation
    Failed(String),
}

/// Result of [`ChatService::load_pending_history`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLoadOutcome {
    NotPending,
    Ignored,
    Loaded,
    Failed(String),
}

enum CommandOutcome {
    /// Acknowledged and polled until the engine left BUSY
    Settled(EngineState),
    Rejected(String),
}

/// Point-in-time view for UI surfaces
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub state: EngineState,
    pub last_error: Option<String>,
    pub can_accept_input: bool,
    pub is_busy: bool,
    pub is_generating: bool,
    pub is_loading_history: bool,
    pub history_pending: bool,
    pub loaded_model: Option<ModelDescriptor>,
    pub current_conversation: Option<Conversation>,
    pub messages: Vec<ChatMessage>,
    pub conversations: Vec<ConversationSummary>,
    pub sampling: SamplingParameters,
}

struct Core {
    machine: EngineStateMachine,
    task: Option<TaskId>,
    abort_requested: bool,
    model: Option<ModelDescriptor>,
    sampling: SamplingParameters,
    session: ConversationSession,
}

pub struct ChatService {
    engine: EngineHandle,
    store: Arc<dyn ConversationStore>,
    settings: EngineSettings,
    core: Mutex<Core>,
    transcript: SharedTranscript,
    /// Held for the whole duration of an engine operation
    operation: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatService {
    pub fn new(
        port: Arc<dyn EngineCommandPort>,
        store: Arc<dyn ConversationStore>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let transcript = SharedTranscript::default();
        let engine = EngineHandle::new(port);
        engine.set_token_callback(TokenSink::new(transcript.clone(), events.clone()).into_callback());

        tracing::info!("Chat service initialized");
        Arc::new(Self {
            engine,
            store,
            core: Mutex::new(Core {
                machine: EngineStateMachine::new(),
                task: None,
                abort_requested: false,
                model: None,
                sampling: SamplingParameters {
                    temperature: settings.temperature,
                    min_p: settings.min_p,
                    seed: settings.seed,
                },
                session: ConversationSession::new(transcript.clone()),
            }),
            settings,
            transcript,
            operation: tokio::sync::Mutex::new(()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ----- observable state -----

    pub fn state(&self) -> EngineState {
        self.core().machine.state()
    }

    pub fn last_error(&self) -> Option<String> {
        let core = self.core();
        let error = core.machine.last_error();
        (!error.is_empty()).then(|| error.to_string())
    }

    pub fn can_accept_input(&self) -> bool {
        let core = self.core();
        core.machine.can_accept_input(core.session.history_pending())
    }

    pub fn is_busy(&self) -> bool {
        self.core().machine.is_busy()
    }

    pub fn is_generating(&self) -> bool {
        self.core().machine.is_generating()
    }

    pub fn history_pending(&self) -> bool {
        self.core().session.history_pending()
    }

    pub fn is_loading_history(&self) -> bool {
        self.core().machine.is_loading_history()
    }

    pub fn loaded_model(&self) -> Option<ModelDescriptor> {
        self.core().model.clone()
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        self.core().session.current().cloned()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.transcript).messages().to_vec()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.core().session.conversations().to_vec()
    }

    pub fn sampling_parameters(&self) -> SamplingParameters {
        self.core().sampling
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let messages = self.messages();
        let core = self.core();
        let error = core.machine.last_error();
        ChatSnapshot {
            state: core.machine.state(),
            last_error: (!error.is_empty()).then(|| error.to_string()),
            can_accept_input: core.machine.can_accept_input(core.session.history_pending()),
            is_busy: core.machine.is_busy(),
            is_generating: core.machine.is_generating(),
            is_loading_history: core.machine.is_loading_history(),
            history_pending: core.session.history_pending(),
            loaded_model: core.model.clone(),
            current_conversation: core.session.current().cloned(),
            messages,
            conversations: core.session.conversations().to_vec(),
            sampling: core.sampling,
        }
    }

    // ----- intents -----

    /// Load a model, replacing any resident one.
    pub async fn load_model(&self, descriptor: ModelDescriptor) -> LoadOutcome {
        let resident = {
            let core = self.core();
            core.model.is_some() || core.machine.state() != EngineState::Uninitialized
        };
        if resident {
            self.unload_model().await;
        }

        let _op = self.operation.lock().await;
        self.begin(Activity::LoadingModel);

        let load = descriptor.load_parameters(&self.settings);
        let sampling = descriptor.sampling_parameters(&self.settings);
        let mut command = CommandBuilder::new("initialize")
            .param("model_path", &descriptor.path)
            .param("n_ctx", load.context_size)
            .param("n_gpu_layers", load.gpu_layers)
            .flag("use_mmap", load.use_mmap)
            .flag("use_mlock", load.use_mlock)
            .param("temperature", sampling.temperature)
            .param("min_p", sampling.min_p)
            .param("seed", sampling.seed);
        if let Some(template) = &load.chat_template {
            command = command.param("chat_template", template);
        }

        tracing::info!("Loading model {} from {}", descriptor.name, descriptor.path);

        // The reference is held from acknowledgement on, even when the load
        // ends in error.
        {
            let mut core = self.core();
            core.model = Some(descriptor.clone());
            core.sampling = sampling;
        }
        self.emit(ChatEvent::ModelChanged {
            name: Some(descriptor.name.clone()),
        });

        let outcome = match self.run(command).await {
            CommandOutcome::Settled(EngineState::Idle) => {
                tracing::info!("Model {} loaded", descriptor.name);
                LoadOutcome::Loaded
            }
            CommandOutcome::Settled(EngineState::Uninitialized) => {
                self.core().model = None;
                self.emit(ChatEvent::ModelChanged { name: None });
                LoadOutcome::Failed("Engine did not keep the model loaded".to_string())
            }
            CommandOutcome::Settled(_) => LoadOutcome::Failed(
                self.last_error()
                    .unwrap_or_else(|| "Model load failed".to_string()),
            ),
            CommandOutcome::Rejected(message) => LoadOutcome::Failed(message),
        };

        if let LoadOutcome::Failed(message) = &outcome {
            tracing::error!("Failed to load model {}: {}", descriptor.name, message);
        }
        self.finish();
        outcome
    }

    /// Free the resident model and reset the conversation. No-op when nothing
    /// is loaded.
    pub async fn unload_model(&self) {
        if self.is_unloaded() {
            tracing::debug!("unload_model ignored: no model loaded");
            return;
        }

        self.abort_current_task().await;
        let _op = self.operation.lock().await;
        if self.is_unloaded() {
            return;
        }
        self.begin(Activity::Maintenance);

        match self.run(CommandBuilder::new("free")).await {
            CommandOutcome::Settled(state) => {
                if state != EngineState::Uninitialized {
                    tracing::warn!("Engine reported {} after free", state);
                }
                {
                    let mut core = self.core();
                    core.model = None;
                    core.sampling = SamplingParameters {
                        temperature: self.settings.temperature,
                        min_p: self.settings.min_p,
                        seed: self.settings.seed,
                    };
                    core.session.reset();
                }
                tracing::info!("Model unloaded");
                self.emit(ChatEvent::ModelChanged { name: None });
                self.emit(ChatEvent::ConversationChanged { id: None });
                self.emit(ChatEvent::MessagesChanged);
                self.emit(ChatEvent::SamplingChanged);
            }
            CommandOutcome::Rejected(message) => {
                tracing::error!("Failed to free model: {}", message);
            }
        }
        self.finish();
    }

    /// Send a prompt and stream the reply into the displayed conversation.
    ///
    /// Ignored unless the engine is idle, no history load is pending and the
    /// prompt has visible content. Persistence failures are returned; the
    /// exchange stays displayed either way.
    pub async fn send_message(&self, prompt: &str) -> Result<SendOutcome, ChatError> {
        if prompt.trim().is_empty() {
            tracing::debug!("send_message ignored: empty prompt");
            return Ok(SendOutcome::Ignored);
        }
        let Ok(_op) = self.operation.try_lock() else {
            tracing::debug!("send_message ignored: engine operation in progress");
            return Ok(SendOutcome::Ignored);
        };

        let (mut conversation, created, index) = {
            let mut core = self.core();
            if !core.machine.can_accept_input(core.session.history_pending()) {
                tracing::debug!("send_message ignored: input not accepted");
                return Ok(SendOutcome::Ignored);
            }
            core.machine.begin(Activity::Generating);
            core.abort_requested = false;
            core.session.begin_exchange(prompt)
        };

        if created {
            self.emit(ChatEvent::ConversationChanged {
                id: Some(conversation.id),
            });
        }
        self.emit(ChatEvent::MessagesChanged);
        self.emit_state();

        let command = CommandBuilder::new("generate")
            .param("prompt", prompt)
            .param("max_tokens", self.settings.max_tokens);
        let outcome = self.run(command).await;

        // The engine has stopped producing tokens for this task.
        let content = lock(&self.transcript)
            .close()
            .map(|(_, content)| content)
            .unwrap_or_default();

        let failure = match outcome {
            CommandOutcome::Rejected(message) => Some(message),
            CommandOutcome::Settled(EngineState::InError) => {
                Some(self.last_error().unwrap_or_else(|| "Generation failed".to_string()))
            }
            CommandOutcome::Settled(_) => None,
        };

        if let Some(message) = failure {
            tracing::error!("Generation failed: {}", message);
            let annotated = if content.trim().is_empty() {
                format!("Error: {message}")
            } else {
                format!("{}\n\n[Error: {message}]", content.trim_end())
            };
            lock(&self.transcript).set_content(index, annotated);
            self.finish();
            self.emit(ChatEvent::MessagesChanged);
            return Ok(SendOutcome::Failed(message));
        }

        let content = content.trim_end().to_string();
        lock(&self.transcript).set_content(index, content.clone());
        let aborted = std::mem::take(&mut self.core().abort_requested);

        conversation.push_exchange(ChatMessage::user(prompt), ChatMessage::assistant(content));
        let saved = self.store.save(&mut conversation).await;

        self.core().session.commit(conversation);
        self.finish();
        self.emit(ChatEvent::MessagesChanged);
        self.emit(ChatEvent::ConversationListChanged);

        match saved {
            Ok(id) => {
                tracing::debug!("Exchange saved to conversation {}", id);
                Ok(SendOutcome::Completed { aborted })
            }
            Err(e) => {
                tracing::error!("Failed to save conversation: {}", e);
                Err(ChatError::Storage(e))
            }
        }
    }

    /// Switch to a persisted conversation. The engine context is cleared now
    /// and primed later by [`Self::load_pending_history`].
    pub async fn select_conversation(&self, conversation: Conversation) {
        self.abort_current_task().await;
        let _op = self.operation.lock().await;
        self.clear_engine_context().await;

        let id = conversation.id;
        self.core().session.select(conversation);
        tracing::info!("Selected conversation {}", id);

        self.emit(ChatEvent::ConversationChanged { id: Some(id) });
        self.emit(ChatEvent::MessagesChanged);
        self.emit_state();
    }

    /// Prime the engine with the current conversation's persisted history.
    pub async fn load_pending_history(&self) -> HistoryLoadOutcome {
        if !self.history_pending() {
            return HistoryLoadOutcome::NotPending;
        }
        let Ok(_op) = self.operation.try_lock() else {
            tracing::debug!("load_pending_history ignored: engine operation in progress");
            return HistoryLoadOutcome::Ignored;
        };

        let messages = {
            let mut core = self.core();
            if core.machine.state() != EngineState::Idle || !core.machine.begin(Activity::LoadingHistory) {
                tracing::debug!("load_pending_history ignored: engine not idle");
                return HistoryLoadOutcome::Ignored;
            }
            core.session
                .current()
                .map(|c| c.messages.clone())
                .unwrap_or_default()
        };
        self.emit_state();

        if messages.is_empty() {
            self.core().session.set_history_pending(false);
            self.finish();
            return HistoryLoadOutcome::Loaded;
        }

        let command = CommandBuilder::new("load_history").param("history", history::encode(&messages));
        let failure = match self.run(command).await {
            CommandOutcome::Settled(EngineState::Idle) => None,
            CommandOutcome::Settled(state) => Some(
                self.last_error()
                    .unwrap_or_else(|| format!("Engine reported {state} after loading history")),
            ),
            CommandOutcome::Rejected(message) => Some(message),
        };

        let outcome = match failure {
            None => {
                self.core().session.set_history_pending(false);
                tracing::info!("Loaded {} history messages into the engine", messages.len());
                HistoryLoadOutcome::Loaded
            }
            Some(message) => {
                tracing::error!("Failed to load history: {}", message);
                lock(&self.transcript)
                    .push(ChatMessage::assistant(format!("Error loading history: {message}")));
                self.emit(ChatEvent::MessagesChanged);
                HistoryLoadOutcome::Failed(message)
            }
        };
        self.finish();
        outcome
    }

    pub async fn start_new_conversation(&self) {
        self.abort_current_task().await;
        let _op = self.operation.lock().await;
        self.reset_conversation().await;
    }

    /// Ask the engine to stop the in-flight task. Advisory: only the next
    /// status poll says whether it stopped. Returns whether an abort was sent.
    pub async fn abort_current_task(&self) -> bool {
        let task_id = {
            let mut core = self.core();
            match (core.machine.state(), core.task) {
                (EngineState::Busy, Some(task_id)) => {
                    core.abort_requested = true;
                    task_id
                }
                _ => {
                    tracing::debug!("abort ignored: no task in flight");
                    return false;
                }
            }
        };

        tracing::info!("Aborting task {}", task_id);
        let command = CommandBuilder::new("abort").param("task_id", task_id);
        match self.engine.submit(command).await {
            Ok(Acknowledgement::Queued { .. }) => {}
            Ok(Acknowledgement::Rejected { message, .. }) => {
                tracing::warn!("Engine rejected abort of task {}: {}", task_id, message);
            }
            Err(e) => tracing::warn!("Unreadable abort response for task {}: {}", task_id, e),
        }
        true
    }

    /// Change temperature and min-p. Only accepted while idle.
    pub async fn update_sampling_parameters(&self, temperature: f32, min_p: f32) -> bool {
        let Ok(_op) = self.operation.try_lock() else {
            return false;
        };

        let parameters = {
            let mut core = self.core();
            if core.machine.state() != EngineState::Idle || !core.machine.begin(Activity::Maintenance) {
                tracing::debug!("update_sampling_parameters ignored: engine not idle");
                return false;
            }
            SamplingParameters {
                temperature: temperature.clamp(0.0, 2.0),
                min_p: min_p.clamp(0.0, 1.0),
                seed: core.sampling.seed,
            }
        };

        let command = CommandBuilder::new("set_parameters")
            .param("temperature", parameters.temperature)
            .param("min_p", parameters.min_p)
            .param("seed", parameters.seed);
        let applied = matches!(self.run(command).await, CommandOutcome::Settled(EngineState::Idle));

        if applied {
            self.core().sampling = parameters;
            self.emit(ChatEvent::SamplingChanged);
        }
        self.finish();
        applied
    }

    /// Fill the sidebar from the store.
    pub async fn load_conversations(&self) -> Result<(), ChatError> {
        let conversations = self.store.list_conversations().await?;
        let summaries = conversations.iter().map(Conversation::summary).collect();
        self.core().session.set_conversations(summaries);
        self.emit(ChatEvent::ConversationListChanged);
        Ok(())
    }

    /// Delete a conversation. Deleting the active one aborts its in-flight
    /// task and waits for it to settle first, so the finished exchange cannot
    /// write it back.
    pub async fn delete_conversation(&self, id: Uuid) -> Result<(), ChatError> {
        if self.core().session.current_id() != Some(id) {
            return self.forget_conversation(id).await;
        }

        self.abort_current_task().await;
        let _op = self.operation.lock().await;
        self.forget_conversation(id).await?;
        if self.core().session.current_id() == Some(id) {
            self.reset_conversation().await;
        }
        Ok(())
    }

    /// Poll the engine once.
    pub async fn refresh_status(&self) -> EngineState {
        let report = self.engine.status().await;
        self.observe(report)
    }

    // ----- internals -----

    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_state(&self) {
        let (state, error, is_busy, is_generating, history_pending) = {
            let core = self.core();
            let error = core.machine.last_error();
            (
                core.machine.state(),
                (!error.is_empty()).then(|| error.to_string()),
                core.machine.is_busy(),
                core.machine.is_generating(),
                core.session.history_pending(),
            )
        };
        self.emit(ChatEvent::StateChanged { state, error });
        self.emit(ChatEvent::ActivityChanged {
            is_busy,
            is_generating,
            history_pending,
        });
    }

    fn is_unloaded(&self) -> bool {
        let core = self.core();
        core.model.is_none() && core.machine.state() == EngineState::Uninitialized
    }

    fn begin(&self, activity: Activity) {
        {
            let mut core = self.core();
            core.machine.finish();
            core.machine.begin(activity);
        }
        self.emit_state();
    }

    fn finish(&self) {
        self.core().machine.finish();
        self.emit_state();
    }

    fn observe(&self, report: Result<StatusReport, CodecError>) -> EngineState {
        let (transition, state) = {
            let mut core = self.core();
            let transition = core.machine.apply(report);
            (transition, core.machine.state())
        };
        if transition.changed() || transition.left_busy() {
            self.emit_state();
        }
        state
    }

    async fn probe(&self) -> Option<EngineState> {
        let report = self.engine.status().await;
        let state = self.observe(report);
        (state != EngineState::Busy).then_some(state)
    }

    async fn wait_until_settled(&self) -> EngineState {
        poll_until(self.settings.poll_interval(), move || self.probe()).await
    }

    async fn run(&self, command: CommandBuilder) -> CommandOutcome {
        let name = command.name().to_string();
        match self.engine.submit(command).await {
            Ok(Acknowledgement::Queued { task_id }) => {
                {
                    let mut core = self.core();
                    core.task = task_id;
                    core.machine.assume_busy();
                }
                tracing::debug!("{} queued as task {:?}", name, task_id);
                self.emit_state();

                let state = self.wait_until_settled().await;
                self.core().task = None;
                CommandOutcome::Settled(state)
            }
            Ok(Acknowledgement::Rejected { message, .. }) => self.reject(&name, message),
            Err(e) => self.reject(&name, format!("Unreadable engine response: {e}")),
        }
    }

    fn reject(&self, name: &str, message: String) -> CommandOutcome {
        tracing::warn!("Engine rejected {}: {}", name, message);
        self.core().machine.fail(message.clone());
        self.emit_state();
        CommandOutcome::Rejected(message)
    }

    async fn forget_conversation(&self, id: Uuid) -> Result<(), ChatError> {
        match self.store.delete(id).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                tracing::warn!("Conversation {} was not persisted", id);
            }
            Err(e) => return Err(e.into()),
        }

        if self.core().session.remove_summary(id) {
            self.emit(ChatEvent::ConversationListChanged);
        }
        Ok(())
    }

    /// Clear the engine context and the displayed conversation. Callers hold
    /// the operation lock.
    async fn reset_conversation(&self) {
        self.clear_engine_context().await;

        self.core().session.reset();
        self.emit(ChatEvent::ConversationChanged { id: None });
        self.emit(ChatEvent::MessagesChanged);
        self.emit_state();
    }

    /// `clear_context` when a model is resident.
    async fn clear_engine_context(&self) {
        if self.core().model.is_none() {
            return;
        }
        self.begin(Activity::Maintenance);
        if let CommandOutcome::Rejected(message) = self.run(CommandBuilder::new("clear_context")).await {
            tracing::error!("Failed to clear engine context: {}", message);
        }
        self.finish();
    }
}
