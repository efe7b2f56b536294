use std::sync::Arc;

use hiwar_llm::{
    ProviderError, ProviderMessage, ProviderReply, ProviderRequest, ProviderResult, ProviderRole,
    ResponseProvider,
};
use parking_lot::{Mutex, MutexGuard};
use snafu::{Snafu, ensure};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::events::{SendOutcome, SessionEvent};
use super::ids::{ConversationId, MessageId, SendAttemptId};
use super::message::{Conversation, ConversationPatch, Message, MessageMetadata, Role};
use super::search::{SearchHit, search_conversations};
use super::send_state::{SendState, SendTarget, SendTransition};
use super::store::ConversationStore;
use super::text::{
    DEFAULT_CONVERSATION_TITLE, TITLE_MAX_CHARS, extract_code_language, infer_message_type,
    title_from_content,
};
use crate::database::ConversationRepository;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const CANCELLED_MESSAGE: &str = "تم إلغاء الطلب";

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("لا يمكن إرسال رسالة فارغة"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("الرسالة طويلة جداً (الحد الأقصى {max} حرف)"))]
    MessageTooLong {
        stage: &'static str,
        length: usize,
        max: usize,
    },
    #[snafu(display("يتم إرسال رسالة أخرى حالياً"))]
    SendInFlight {
        stage: &'static str,
        conversation_id: ConversationId,
    },
}

/// Behaviour knobs for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_message_length: usize,
    pub title_max_chars: usize,
    pub default_title: String,
    pub report_cancellation: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_length: 4_000,
            title_max_chars: TITLE_MAX_CHARS,
            default_title: DEFAULT_CONVERSATION_TITLE.to_string(),
            report_cancellation: false,
        }
    }
}

/// Point-in-time copy of the session flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub current_conversation_id: Option<ConversationId>,
    pub is_loading: bool,
    pub is_typing: bool,
    pub last_error: Option<String>,
    pub last_user_message: Option<String>,
    pub send_state: SendState,
}

struct SessionInner {
    store: ConversationStore,
    send_state: SendState,
    is_loading: bool,
    is_typing: bool,
    last_error: Option<String>,
    last_user_message: Option<String>,
    next_attempt: u64,
    active_cancel: Option<CancellationToken>,
}

impl SessionInner {
    fn transition(&mut self, transition: SendTransition) -> bool {
        match self.send_state.apply(transition) {
            Ok(next) => {
                self.send_state = next;
                true
            }
            Err(rejection) => {
                tracing::debug!(?rejection, "ignored send transition");
                false
            }
        }
    }

    fn finish_flags(&mut self) {
        self.is_loading = false;
        self.is_typing = false;
        self.active_cancel = None;
    }
}

struct PendingSave<'a> {
    conversations: Vec<Conversation>,
    selection: Option<ConversationId>,
    _order: MutexGuard<'a, ()>,
}

struct PendingSend {
    target: SendTarget,
    request: ProviderRequest,
    cancel: CancellationToken,
}

/// Chat Session Controller: owns the conversation store and the send pipeline.
///
/// Cloning yields another handle to the same session. The state lock is never
/// held across the provider await or while a snapshot is written, so select,
/// delete and cancel may be issued while a send is pending.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Mutex<SessionInner>>,
    /// Taken before the state lock is released; writes land in mutation order.
    save_order: Arc<Mutex<()>>,
    provider: Arc<dyn ResponseProvider>,
    repository: ConversationRepository,
    events: broadcast::Sender<SessionEvent>,
    config: SessionConfig,
}

impl ChatSession {
    /// Builds a session, restoring whatever `repository` holds.
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn ResponseProvider>,
        repository: ConversationRepository,
    ) -> Self {
        let snapshot = repository.load();
        let store = ConversationStore::new(config.default_title.clone(), config.title_max_chars)
            .with_snapshot(snapshot.conversations, snapshot.selection);
        tracing::info!(
            conversations = store.len(),
            provider_id = provider.id(),
            "chat session ready"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                store,
                send_state: SendState::Idle,
                is_loading: false,
                is_typing: false,
                last_error: None,
                last_user_message: None,
                next_attempt: 1,
                active_cancel: None,
            })),
            save_order: Arc::new(Mutex::new(())),
            provider,
            repository,
            events,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Validates `content`, appends it as a user message and waits for the reply.
    ///
    /// Returns an error only when nothing was sent: invalid content, or another
    /// send already in flight. Provider failures and cancellation are reported
    /// through the returned [`SendOutcome`] and the session flags.
    pub async fn send_message(&self, content: &str) -> ChatResult<SendOutcome> {
        let PendingSend {
            target,
            request,
            cancel,
        } = self.begin_send(content)?;

        let mut guard = SendGuard {
            session: self,
            target: Some(target.clone()),
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled { stage: "session-send-await" }),
            result = self.provider.respond(request, cancel.clone()) => result,
        };

        guard.target = None;
        Ok(self.finish_send(target, result, cancel.is_cancelled()))
    }

    /// Re-sends the most recent content. `Ok(None)` when nothing was sent before.
    pub async fn retry_last_message(&self) -> ChatResult<Option<SendOutcome>> {
        let last = self.inner.lock().last_user_message.clone();
        match last {
            Some(content) => self.send_message(&content).await.map(Some),
            None => Ok(None),
        }
    }

    /// Signals the in-flight send to stop. Returns `false` when nothing is pending.
    pub fn cancel_active_send(&self) -> bool {
        let inner = self.inner.lock();
        match &inner.active_cancel {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn create_conversation(&self, title: Option<&str>) -> ConversationId {
        let id = self.mutate(|inner| {
            inner.last_error = None;
            inner.store.create_conversation(title)
        });
        self.emit(SessionEvent::ConversationCreated {
            conversation_id: id.clone(),
        });
        self.emit(SessionEvent::ConversationSelected {
            conversation_id: Some(id.clone()),
        });
        id
    }

    pub fn select_conversation(&self, id: &ConversationId) -> bool {
        let selected = self.mutate(|inner| {
            let selected = inner.store.select_conversation(id);
            if selected {
                inner.last_error = None;
            }
            selected
        });
        if selected {
            self.emit(SessionEvent::ConversationSelected {
                conversation_id: Some(id.clone()),
            });
        }
        selected
    }

    pub fn delete_conversation(&self, id: &ConversationId) -> bool {
        let (deleted, cleared_selection) = self.mutate(|inner| {
            let was_current = inner.store.current_id() == Some(id);
            let deleted = inner.store.delete_conversation(id);
            if was_current {
                inner.last_error = None;
            }
            (deleted, was_current)
        });

        if deleted {
            self.emit(SessionEvent::ConversationDeleted {
                conversation_id: id.clone(),
            });
        }
        if cleared_selection {
            self.emit(SessionEvent::ConversationSelected {
                conversation_id: None,
            });
        }
        deleted
    }

    pub fn update_conversation(&self, id: &ConversationId, patch: ConversationPatch) -> bool {
        let updated = self.mutate(|inner| inner.store.update_conversation(id, patch));
        if updated {
            self.emit_updated(id);
        }
        updated
    }

    pub fn rename_conversation(&self, id: &ConversationId, title: &str) -> bool {
        let renamed = self.mutate(|inner| inner.store.rename_conversation(id, title));
        if renamed {
            self.emit_updated(id);
        }
        renamed
    }

    pub fn delete_message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        let deleted = self.mutate(|inner| inner.store.delete_message(conversation_id, message_id));
        if deleted {
            self.emit(SessionEvent::MessageDeleted {
                conversation_id: conversation_id.clone(),
                message_id: message_id.clone(),
            });
        }
        deleted
    }

    /// Empties the current conversation's messages, keeping the conversation.
    pub fn clear_current_conversation(&self) -> bool {
        let cleared = self.mutate(|inner| {
            let current = inner.store.current_id().cloned()?;
            inner.store.clear_messages(&current).then_some(current)
        });

        match cleared {
            Some(id) => {
                self.emit_updated(&id);
                true
            }
            None => false,
        }
    }

    pub fn clear_error(&self) {
        self.inner.lock().last_error = None;
    }

    /// Conversations in display order, most recently updated first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.lock().store.list()
    }

    pub fn filtered_conversations(&self, term: &str) -> Vec<Conversation> {
        self.inner.lock().store.filtered(term)
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        search_conversations(self.inner.lock().store.conversations(), query)
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.inner.lock().store.get(id).cloned()
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        self.inner.lock().store.current().cloned()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            current_conversation_id: inner.store.current_id().cloned(),
            is_loading: inner.is_loading,
            is_typing: inner.is_typing,
            last_error: inner.last_error.clone(),
            last_user_message: inner.last_user_message.clone(),
            send_state: inner.send_state.clone(),
        }
    }

    fn begin_send(&self, content: &str) -> ChatResult<PendingSend> {
        let mut events = Vec::new();
        let (pending, save) = {
            let mut inner = self.inner.lock();
            if let Some(active) = inner.send_state.active_target() {
                return SendInFlightSnafu {
                    stage: "send-message-busy",
                    conversation_id: active.conversation_id.clone(),
                }
                .fail();
            }

            let content = content.trim();
            if let Err(error) = validate_content(content, self.config.max_message_length) {
                tracing::debug!(error = %error, "rejected message content");
                inner.last_error = Some(error.to_string());
                inner.transition(SendTransition::Reject {
                    message: error.to_string(),
                });
                return Err(error);
            }

            let conversation_id = match inner.store.current_id().cloned() {
                Some(id) => id,
                None => {
                    let title = title_from_content(content, inner.store.title_max_chars());
                    let id = inner.store.create_conversation(Some(&title));
                    events.push(SessionEvent::ConversationCreated {
                        conversation_id: id.clone(),
                    });
                    events.push(SessionEvent::ConversationSelected {
                        conversation_id: Some(id.clone()),
                    });
                    id
                }
            };

            let history = inner
                .store
                .get(&conversation_id)
                .map(provider_history)
                .unwrap_or_default();
            let message_id = inner.store.next_message_id();
            let now = inner.store.now();
            inner.store.append_message(
                &conversation_id,
                Message::user(message_id.clone(), content, now),
            );
            events.push(SessionEvent::MessageAppended {
                conversation_id: conversation_id.clone(),
                message_id,
            });

            let attempt = SendAttemptId::new(inner.next_attempt);
            inner.next_attempt = inner.next_attempt.saturating_add(1);
            let target = SendTarget::new(conversation_id.clone(), attempt);
            inner.transition(SendTransition::Start(target.clone()));

            let cancel = CancellationToken::new();
            inner.is_loading = true;
            inner.is_typing = true;
            inner.last_error = None;
            inner.last_user_message = Some(content.to_string());
            inner.active_cancel = Some(cancel.clone());
            let save = self.capture(&inner);

            events.push(SessionEvent::SendStarted {
                conversation_id: conversation_id.clone(),
                attempt,
            });
            tracing::info!(
                conversation_id = %conversation_id,
                attempt = attempt.0,
                "send started"
            );

            let pending = PendingSend {
                target,
                request: ProviderRequest::new(content)
                    .with_conversation_id(conversation_id.as_str())
                    .with_history(history),
                cancel,
            };
            (pending, save)
        };

        self.write(save);
        for event in events {
            self.emit(event);
        }
        Ok(pending)
    }

    fn finish_send(
        &self,
        target: SendTarget,
        result: ProviderResult<ProviderReply>,
        cancelled: bool,
    ) -> SendOutcome {
        let mut appended = None;
        let mut save = None;
        let outcome = {
            let mut inner = self.inner.lock();
            if !inner.send_state.accepts_resolution(target.attempt) {
                tracing::warn!(attempt = target.attempt.0, "discarding stale send resolution");
                return SendOutcome::Aborted {
                    conversation_id: target.conversation_id,
                };
            }

            let conversation_id = target.conversation_id.clone();
            let aborted = cancelled || matches!(&result, Err(error) if error.is_cancelled());
            let outcome = match result {
                _ if aborted => {
                    inner.transition(SendTransition::Abort(target.clone()));
                    if self.config.report_cancellation {
                        inner.last_error = Some(CANCELLED_MESSAGE.to_string());
                    }
                    SendOutcome::Aborted { conversation_id }
                }
                Err(error) => {
                    let message = error.to_string();
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %message,
                        "response provider failed"
                    );
                    inner.last_error = Some(message.clone());
                    inner.transition(SendTransition::Fail {
                        target: target.clone(),
                        message: message.clone(),
                    });
                    SendOutcome::Failed {
                        conversation_id,
                        error: message,
                    }
                }
                Ok(reply) => {
                    let message = assistant_message(&mut inner.store, reply);
                    let message_id = message.id.clone();
                    let landed = inner.store.append_message(&conversation_id, message);
                    if landed {
                        appended = Some(message_id.clone());
                    }
                    inner.transition(SendTransition::Complete(target.clone()));
                    SendOutcome::Completed {
                        conversation_id,
                        assistant_message_id: landed.then_some(message_id),
                    }
                }
            };

            inner.finish_flags();
            if appended.is_some() {
                save = Some(self.capture(&inner));
            }
            outcome
        };

        if let Some(save) = save {
            self.write(save);
        }

        if let Some(message_id) = appended {
            self.emit(SessionEvent::MessageAppended {
                conversation_id: target.conversation_id.clone(),
                message_id,
            });
        }
        tracing::info!(
            attempt = target.attempt.0,
            outcome = ?outcome,
            "send finished"
        );
        self.emit(SessionEvent::SendFinished {
            attempt: target.attempt,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Abandons `target` when its send future was dropped before resolving.
    fn abandon_send(&self, target: SendTarget) {
        let aborted = {
            let mut inner = self.inner.lock();
            if !inner.send_state.accepts_resolution(target.attempt) {
                return;
            }
            if let Some(cancel) = &inner.active_cancel {
                cancel.cancel();
            }
            let aborted = inner.transition(SendTransition::Abort(target.clone()));
            inner.finish_flags();
            aborted
        };

        if aborted {
            tracing::debug!(attempt = target.attempt.0, "send dropped before completion");
            self.emit(SessionEvent::SendFinished {
                attempt: target.attempt,
                outcome: SendOutcome::Aborted {
                    conversation_id: target.conversation_id,
                },
            });
        }
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut SessionInner) -> R) -> R {
        let (result, save) = {
            let mut inner = self.inner.lock();
            let result = apply(&mut inner);
            (result, self.capture(&inner))
        };
        self.write(save);
        result
    }

    /// Copies the snapshot and claims the next write slot while the state lock is held.
    fn capture(&self, inner: &SessionInner) -> PendingSave<'_> {
        PendingSave {
            conversations: inner.store.conversations().to_vec(),
            selection: inner.store.current_id().cloned(),
            _order: self.save_order.lock(),
        }
    }

    fn write(&self, save: PendingSave<'_>) {
        if !self
            .repository
            .save(&save.conversations, save.selection.as_ref())
        {
            tracing::warn!("conversation snapshot not persisted, keeping in-memory state");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_updated(&self, id: &ConversationId) {
        self.emit(SessionEvent::ConversationUpdated {
            conversation_id: id.clone(),
        });
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ChatSession")
            .field("provider_id", &self.provider.id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Clears the loading flags when a send future is dropped mid-flight.
struct SendGuard<'a> {
    session: &'a ChatSession,
    target: Option<SendTarget>,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            self.session.abandon_send(target);
        }
    }
}

fn validate_content(content: &str, max_length: usize) -> ChatResult<()> {
    ensure!(
        !content.is_empty(),
        EmptyMessageSnafu {
            stage: "validate-message"
        }
    );

    let length = content.chars().count();
    ensure!(
        length <= max_length,
        MessageTooLongSnafu {
            stage: "validate-message",
            length,
            max: max_length,
        }
    );
    Ok(())
}

fn provider_history(conversation: &Conversation) -> Vec<ProviderMessage> {
    conversation
        .messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::User => ProviderRole::User,
                Role::Assistant => ProviderRole::Assistant,
            };
            ProviderMessage::new(role, message.content.clone())
        })
        .collect()
}

fn assistant_message(store: &mut ConversationStore, reply: ProviderReply) -> Message {
    let id = store.next_message_id();
    let now = store.now();
    let message_type = infer_message_type(&reply.content);
    let metadata = MessageMetadata {
        language: extract_code_language(&reply.content),
        tokens: reply.tokens,
        model: reply.model,
        error: None,
    };

    Message::assistant(id, reply.content, now)
        .with_type(message_type)
        .with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    use futures::FutureExt;
    use futures::future::BoxFuture;
    use hiwar_llm::MockResponseProvider;
    use hiwar_storage::{KeyValueStore, MemoryStore, StorageResult};
    use tokio::sync::Notify;

    use super::*;
    use crate::chat::message::MessageType;
    use crate::settings::StorageSettings;

    /// Provider that waits for `release` before answering, or fails when `fail` is set.
    struct GatedProvider {
        release: Arc<Notify>,
        fail: bool,
    }

    impl ResponseProvider for GatedProvider {
        fn id(&self) -> &str {
            "gated"
        }

        fn model(&self) -> &str {
            "gated-model"
        }

        fn respond<'a>(
            &'a self,
            request: ProviderRequest,
            _cancel: CancellationToken,
        ) -> BoxFuture<'a, ProviderResult<ProviderReply>> {
            async move {
                self.release.notified().await;
                if self.fail {
                    return Err(ProviderError::unavailable("gated", "network down"));
                }
                Ok(ProviderReply::new(format!("رد: {}", request.prompt)).with_model("gated-model"))
            }
            .boxed()
        }
    }

    fn gated(fail: bool) -> (ChatSession, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        let provider = GatedProvider {
            release: release.clone(),
            fail,
        };
        let session = ChatSession::new(
            SessionConfig::default(),
            Arc::new(provider),
            ConversationRepository::in_memory(),
        );
        (session, release)
    }

    fn instant() -> ChatSession {
        let provider =
            MockResponseProvider::new(Duration::ZERO).expect("builtin rules compile");
        ChatSession::new(
            SessionConfig::default(),
            Arc::new(provider),
            ConversationRepository::in_memory(),
        )
    }

    async fn wait_until_sending(session: &ChatSession) {
        while !session.snapshot().is_loading {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn first_send_creates_titled_conversation_with_reply() {
        let session = instant();
        let outcome = session.send_message("hello").await.expect("sent");
        assert!(outcome.is_completed());

        let conversations = session.conversations();
        assert_eq!(conversations.len(), 1);
        let conversation = &conversations[0];
        assert_eq!(conversation.title, "hello");
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.messages[0].content, "hello");
        assert_eq!(conversation.messages[1].role, Role::Assistant);

        let snapshot = session.snapshot();
        assert!(!snapshot.is_loading);
        assert!(!snapshot.is_typing);
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.current_conversation_id, Some(conversation.id.clone()));
        assert!(matches!(snapshot.send_state, SendState::Succeeded(_)));
    }

    #[tokio::test]
    async fn invalid_content_adds_nothing_and_sets_error() {
        let session = instant();

        let error = session.send_message("   \n ").await.expect_err("empty");
        assert!(matches!(error, ChatError::EmptyMessage { .. }));
        assert!(session.conversations().is_empty());
        assert_eq!(
            session.snapshot().last_error.as_deref(),
            Some("لا يمكن إرسال رسالة فارغة")
        );

        let long = "x".repeat(4_001);
        let error = session.send_message(&long).await.expect_err("too long");
        assert!(matches!(
            error,
            ChatError::MessageTooLong {
                length: 4_001,
                max: 4_000,
                ..
            }
        ));
        assert!(session.conversations().is_empty());
        assert_eq!(session.snapshot().last_user_message, None);
    }

    #[tokio::test]
    async fn exactly_max_length_is_accepted() {
        let session = instant();
        let content = "ب".repeat(4_000);
        session.send_message(&content).await.expect("sent");
        assert_eq!(session.conversations()[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn retry_without_prior_attempt_is_a_noop() {
        let session = instant();
        assert_eq!(session.retry_last_message().await.expect("noop"), None);
        assert!(session.conversations().is_empty());
        assert_eq!(session.snapshot().last_error, None);
    }

    #[tokio::test]
    async fn provider_failure_keeps_user_message_and_retry_resends() {
        let (session, release) = gated(true);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("سؤال").await }
        });
        wait_until_sending(&session).await;
        release.notify_one();
        let outcome = pending.await.expect("join").expect("sent");

        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        let snapshot = session.snapshot();
        assert!(!snapshot.is_loading);
        assert!(
            snapshot
                .last_error
                .as_deref()
                .is_some_and(|error| error.contains("network down"))
        );
        let conversation = session.current_conversation().expect("conversation");
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].content, "سؤال");

        release.notify_one();
        let retried = session.retry_last_message().await.expect("retry");
        assert!(matches!(retried, Some(SendOutcome::Failed { .. })));
        let conversation = session.current_conversation().expect("conversation");
        assert_eq!(conversation.messages.len(), 2);
        assert!(conversation.messages.iter().all(|m| m.role == Role::User));
    }

    #[tokio::test]
    async fn concurrent_send_is_rejected_without_side_effects() {
        let (session, release) = gated(false);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("first").await }
        });
        wait_until_sending(&session).await;

        let error = session.send_message("second").await.expect_err("busy");
        assert!(matches!(error, ChatError::SendInFlight { .. }));
        assert_eq!(session.snapshot().last_user_message.as_deref(), Some("first"));
        assert_eq!(session.snapshot().last_error, None);

        release.notify_one();
        pending.await.expect("join").expect("sent");
        let conversation = session.current_conversation().expect("conversation");
        let contents = conversation
            .messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["first", "رد: first"]);
    }

    #[tokio::test]
    async fn deleting_target_mid_flight_drops_the_reply() {
        let (session, release) = gated(false);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("bye").await }
        });
        wait_until_sending(&session).await;

        let target = session.snapshot().current_conversation_id.expect("target");
        assert!(session.delete_conversation(&target));
        assert_eq!(session.snapshot().current_conversation_id, None);

        release.notify_one();
        let outcome = pending.await.expect("join").expect("sent");
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                conversation_id: target,
                assistant_message_id: None,
            }
        );
        assert!(session.conversations().is_empty());
        assert!(!session.snapshot().is_loading);
    }

    #[tokio::test]
    async fn cancel_aborts_without_surfacing_error() {
        let (session, _release) = gated(false);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("wait").await }
        });
        wait_until_sending(&session).await;

        assert!(session.cancel_active_send());
        let outcome = pending.await.expect("join").expect("sent");
        assert!(matches!(outcome, SendOutcome::Aborted { .. }));

        let snapshot = session.snapshot();
        assert!(!snapshot.is_loading);
        assert!(!snapshot.is_typing);
        assert_eq!(snapshot.last_error, None);
        assert!(matches!(snapshot.send_state, SendState::Aborted(_)));
        assert_eq!(session.current_conversation().expect("kept").messages.len(), 1);
        assert!(!session.cancel_active_send());
    }

    #[tokio::test]
    async fn cancellation_is_reported_when_configured() {
        let release = Arc::new(Notify::new());
        let session = ChatSession::new(
            SessionConfig {
                report_cancellation: true,
                ..SessionConfig::default()
            },
            Arc::new(GatedProvider {
                release,
                fail: false,
            }),
            ConversationRepository::in_memory(),
        );

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("wait").await }
        });
        wait_until_sending(&session).await;
        session.cancel_active_send();
        pending.await.expect("join").expect("sent");

        assert_eq!(session.snapshot().last_error.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[tokio::test]
    async fn dropping_the_send_future_resets_flags() {
        let (session, _release) = gated(false);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("drop me").await }
        });
        wait_until_sending(&session).await;
        pending.abort();
        let _ = pending.await;

        let snapshot = session.snapshot();
        assert!(!snapshot.is_loading);
        assert!(matches!(snapshot.send_state, SendState::Aborted(_)));
        assert!(!session.cancel_active_send());
    }

    #[tokio::test]
    async fn events_follow_the_send_pipeline() {
        let session = instant();
        let mut events = session.subscribe();

        session.send_message("مرحبا").await.expect("sent");

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert!(matches!(received[0], SessionEvent::ConversationCreated { .. }));
        assert!(matches!(received[1], SessionEvent::ConversationSelected { .. }));
        assert!(matches!(received[2], SessionEvent::MessageAppended { .. }));
        assert!(matches!(received[3], SessionEvent::SendStarted { .. }));
        assert!(matches!(received[4], SessionEvent::MessageAppended { .. }));
        assert!(matches!(received[5], SessionEvent::SendFinished { .. }));
    }

    #[tokio::test]
    async fn assistant_reply_carries_type_and_metadata() {
        let session = instant();
        session.send_message("اكتب كود").await.expect("sent");

        let conversation = session.current_conversation().expect("conversation");
        let reply = &conversation.messages[1];
        assert_eq!(reply.message_type, MessageType::Code);
        let metadata = reply.metadata.as_ref().expect("metadata");
        assert_eq!(metadata.language.as_deref(), Some("javascript"));
        assert_eq!(metadata.model.as_deref(), Some("mock-assistant"));
        assert!(metadata.tokens.is_some());
    }

    #[test]
    fn conversation_crud_through_the_session() {
        let session = instant();
        let a = session.create_conversation(Some("A"));
        let b = session.create_conversation(None);

        assert_eq!(session.snapshot().current_conversation_id, Some(b.clone()));
        assert!(session.select_conversation(&a));
        assert!(!session.select_conversation(&ConversationId::new("missing")));
        assert!(session.rename_conversation(&b, "B"));
        assert_eq!(session.conversations()[0].id, b);

        assert!(session.delete_conversation(&b));
        assert_eq!(session.snapshot().current_conversation_id, Some(a.clone()));
        assert!(!session.delete_conversation(&b));
        assert!(session.filtered_conversations("a").iter().any(|c| c.id == a));
        assert!(session.clear_current_conversation());
    }

    #[tokio::test]
    async fn session_state_survives_a_restart() {
        let repository = ConversationRepository::in_memory();
        let provider: Arc<dyn ResponseProvider> =
            Arc::new(MockResponseProvider::new(Duration::ZERO).expect("builtin rules compile"));

        let first = ChatSession::new(SessionConfig::default(), provider.clone(), repository.clone());
        first.send_message("احفظني").await.expect("sent");
        let saved = first.conversations();

        let second = ChatSession::new(SessionConfig::default(), provider, repository);
        assert_eq!(second.conversations(), saved);
        assert_eq!(
            second.snapshot().current_conversation_id,
            Some(saved[0].id.clone())
        );
        let fresh = second.create_conversation(None);
        assert!(saved.iter().all(|conversation| conversation.id != fresh));
    }

    #[tokio::test]
    async fn navigation_clears_the_last_error() {
        let session = instant();
        let kept = session.create_conversation(Some("kept"));

        session.send_message(" ").await.expect_err("empty");
        let created = session.create_conversation(None);
        assert_eq!(session.snapshot().last_error, None);

        session.send_message(" ").await.expect_err("empty");
        assert!(session.select_conversation(&kept));
        assert_eq!(session.snapshot().last_error, None);

        session.send_message(" ").await.expect_err("empty");
        assert!(session.delete_conversation(&created));
        assert!(session.snapshot().last_error.is_some());
        assert!(session.delete_conversation(&kept));
        assert_eq!(session.snapshot().last_error, None);
    }

    #[test]
    fn stale_resolution_is_discarded() {
        let session = instant();
        let id = session.create_conversation(Some("A"));
        let stale = SendTarget::new(id.clone(), SendAttemptId::new(99));

        let outcome = session.finish_send(stale, Ok(ProviderReply::new("late")), false);
        assert_eq!(
            outcome,
            SendOutcome::Aborted {
                conversation_id: id.clone()
            }
        );
        assert!(session.conversation(&id).expect("kept").messages.is_empty());
        assert_eq!(session.snapshot().send_state, SendState::Idle);
    }

    /// Counts backend writes issued while the session state lock is held.
    #[derive(Default)]
    struct LockCheckingStore {
        entries: MemoryStore,
        state: OnceLock<Weak<Mutex<SessionInner>>>,
        writes: AtomicUsize,
        writes_under_lock: AtomicUsize,
    }

    impl LockCheckingStore {
        fn record(&self) {
            if let Some(state) = self.state.get().and_then(Weak::upgrade) {
                self.writes.fetch_add(1, Ordering::SeqCst);
                if state.try_lock().is_none() {
                    self.writes_under_lock.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    impl KeyValueStore for LockCheckingStore {
        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.entries.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.record();
            self.entries.set(key, value)
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.record();
            self.entries.remove(key)
        }
    }

    #[tokio::test]
    async fn snapshots_are_written_outside_the_state_lock() {
        let backend = Arc::new(LockCheckingStore::default());
        let provider =
            MockResponseProvider::new(Duration::ZERO).expect("builtin rules compile");
        let session = ChatSession::new(
            SessionConfig::default(),
            Arc::new(provider),
            ConversationRepository::from_settings(backend.clone(), &StorageSettings::default()),
        );
        assert!(backend.state.set(Arc::downgrade(&session.inner)).is_ok());

        let first = session.create_conversation(Some("A"));
        session.send_message("hello").await.expect("sent");
        session.select_conversation(&first);
        session.delete_conversation(&first);

        assert!(backend.writes.load(Ordering::SeqCst) > 0);
        assert_eq!(backend.writes_under_lock.load(Ordering::SeqCst), 0);
        assert!(session.conversations().is_empty());
    }
}
