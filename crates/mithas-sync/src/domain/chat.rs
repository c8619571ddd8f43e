//! Chat: messages and threads in one store.
//!
//! A sent message is created under a client id (`local-N`). The server
//! assigns its own id in the confirmation, and the record is re-keyed. The
//! server echo of the message over realtime carries the client id, so it is
//! held back until the send settles and then dropped as already applied.
//! A new vendor chat is created the same way: under `chat:local-N` until
//! the server names the thread.
//!
//! A refresh carries every thread but only recent messages, so messages are
//! never swept by it.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::StoreOptions;
use crate::error::{Result, ValidationError};
use crate::reactive::Unsubscribe;
use crate::storage::PersistenceBackend;
use crate::sync::{MutationHandle, RealtimeTransport, RemoteCall, RemoteResult, SyncStore};
use crate::types::{Confirmation, EntityId, MutationKind, Record, ServerRecord};

use super::Domain;

/// Entity id of the thread for `chat_id`.
pub fn thread_entity(chat_id: &str) -> EntityId {
    format!("chat:{chat_id}")
}

/// Realtime channel carrying a room's messages.
pub fn room_channel(chat_id: &str) -> String {
    format!("chat-room:{chat_id}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Product,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    /// Client id the message was sent under, echoed back by the server.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Unix milliseconds.
    pub sent_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatThread {
    pub chat_id: String,
    pub title: String,
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEntry {
    Message(ChatMessage),
    Thread(ChatThread),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub client_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub sent_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVendorChat {
    pub client_id: String,
    pub vendor_id: String,
    /// Shown until the server's thread replaces the local one.
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatIntent {
    SendMessage(OutgoingMessage),
    MarkAsRead { chat_id: String },
    CreateVendorChat(NewVendorChat),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSummary {
    pub message_count: usize,
    pub unread_total: u64,
    pub unread_by_chat: BTreeMap<String, u32>,
}

pub struct Chat;

impl Domain for Chat {
    type Payload = ChatEntry;
    type Intent = ChatIntent;
    type Aggregates = ChatSummary;

    const NAME: &'static str = "chat";

    fn target(intent: &ChatIntent) -> EntityId {
        match intent {
            ChatIntent::SendMessage(message) => message.client_id.clone(),
            ChatIntent::MarkAsRead { chat_id } => thread_entity(chat_id),
            ChatIntent::CreateVendorChat(chat) => thread_entity(&chat.client_id),
        }
    }

    fn kind(intent: &ChatIntent, _: Option<&ChatEntry>) -> MutationKind {
        match intent {
            ChatIntent::SendMessage(_) | ChatIntent::CreateVendorChat(_) => MutationKind::Add,
            ChatIntent::MarkAsRead { .. } => MutationKind::Update,
        }
    }

    fn check(intent: &ChatIntent) -> std::result::Result<(), ValidationError> {
        match intent {
            ChatIntent::SendMessage(message) => {
                if message.content.trim().is_empty() {
                    return Err(ValidationError::new("content", "a non-empty message", "\"\""));
                }
                if message.chat_id.is_empty() {
                    return Err(ValidationError::new("chat_id", "a chat id", "\"\""));
                }
            }
            ChatIntent::MarkAsRead { chat_id } if chat_id.is_empty() => {
                return Err(ValidationError::new("chat_id", "a chat id", "\"\""));
            }
            ChatIntent::MarkAsRead { .. } => {}
            ChatIntent::CreateVendorChat(chat) if chat.vendor_id.trim().is_empty() => {
                return Err(ValidationError::new("vendor_id", "a vendor id", "\"\""));
            }
            ChatIntent::CreateVendorChat(_) => {}
        }
        Ok(())
    }

    fn apply(
        intent: &ChatIntent,
        current: Option<&ChatEntry>,
    ) -> std::result::Result<Option<ChatEntry>, ValidationError> {
        match intent {
            ChatIntent::SendMessage(message) => {
                if current.is_some() {
                    return Err(ValidationError::new(
                        "client_id",
                        "an unused client id",
                        &message.client_id,
                    ));
                }
                Ok(Some(ChatEntry::Message(ChatMessage {
                    id: message.client_id.clone(),
                    chat_id: message.chat_id.clone(),
                    sender_id: message.sender_id.clone(),
                    content: message.content.clone(),
                    kind: message.kind,
                    client_id: Some(message.client_id.clone()),
                    sent_at: message.sent_at,
                })))
            }
            ChatIntent::MarkAsRead { chat_id } => match current {
                Some(ChatEntry::Thread(thread)) => Ok(Some(ChatEntry::Thread(ChatThread {
                    unread_count: 0,
                    ..thread.clone()
                }))),
                _ => Err(ValidationError::new("chat_id", "a known chat thread", chat_id)),
            },
            ChatIntent::CreateVendorChat(chat) => {
                if current.is_some() {
                    return Err(ValidationError::new(
                        "client_id",
                        "an unused client id",
                        &chat.client_id,
                    ));
                }
                Ok(Some(ChatEntry::Thread(ChatThread {
                    chat_id: chat.client_id.clone(),
                    title: chat.title.clone(),
                    unread_count: 0,
                    last_message: None,
                })))
            }
        }
    }

    fn aggregate(records: &BTreeMap<EntityId, Record<ChatEntry>>) -> ChatSummary {
        let mut summary = ChatSummary::default();
        for record in records.values() {
            match &record.payload {
                ChatEntry::Message(_) => summary.message_count += 1,
                ChatEntry::Thread(thread) => {
                    summary.unread_total += u64::from(thread.unread_count);
                    summary
                        .unread_by_chat
                        .insert(thread.chat_id.clone(), thread.unread_count);
                }
            }
        }
        summary
    }

    fn pending_alias(payload: &ChatEntry) -> Option<EntityId> {
        match payload {
            ChatEntry::Message(message) => message.client_id.clone(),
            ChatEntry::Thread(_) => None,
        }
    }

    fn swept_by_refresh(payload: &ChatEntry) -> bool {
        matches!(payload, ChatEntry::Thread(_))
    }
}

// ============================================================================
// Remote API
// ============================================================================

/// Chat endpoints. The reply to a send carries the message under its server
/// id, with `client_id` set.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, message: &OutgoingMessage) -> RemoteResult<Confirmation<ChatEntry>>;

    async fn mark_as_read(&self, chat_id: &str) -> RemoteResult<Confirmation<ChatEntry>>;

    /// Open (or reopen) the thread with `vendor_id`. The reply carries the
    /// thread under `chat:{server id}`.
    async fn create_vendor_chat(&self, vendor_id: &str) -> RemoteResult<Confirmation<ChatEntry>>;

    /// Threads and recent messages.
    async fn fetch_chats(&self) -> RemoteResult<Vec<ServerRecord<ChatEntry>>>;
}

#[async_trait]
impl<T: ChatApi> RemoteCall<Chat> for T {
    async fn commit(&self, intent: &ChatIntent) -> RemoteResult<Confirmation<ChatEntry>> {
        match intent {
            ChatIntent::SendMessage(message) => self.send_message(message).await,
            ChatIntent::MarkAsRead { chat_id } => self.mark_as_read(chat_id).await,
            ChatIntent::CreateVendorChat(chat) => self.create_vendor_chat(&chat.vendor_id).await,
        }
    }

    async fn fetch(&self) -> RemoteResult<Vec<ServerRecord<ChatEntry>>> {
        self.fetch_chats().await
    }
}

// ============================================================================
// ChatStore
// ============================================================================

struct ActiveRoom {
    chat_id: String,
    unsubscribe: Unsubscribe,
}

pub struct ChatStore {
    store: SyncStore<Chat>,
    next_client_id: AtomicU64,
    room: Mutex<Option<ActiveRoom>>,
}

impl ChatStore {
    pub fn new(
        remote: Arc<dyn RemoteCall<Chat>>,
        options: StoreOptions,
        backend: Option<Arc<dyn PersistenceBackend>>,
    ) -> Self {
        Self {
            store: SyncStore::new(remote, options, backend),
            next_client_id: AtomicU64::new(1),
            room: Mutex::new(None),
        }
    }

    /// Send `content` to the active room.
    pub fn send_message(
        &self,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
        sent_at: u64,
    ) -> Result<MutationHandle<ChatEntry>> {
        let chat_id = self.active_room().ok_or_else(|| {
            ValidationError::new("chat_id", "an active chat room", "none")
        })?;
        self.store.dispatch(ChatIntent::SendMessage(OutgoingMessage {
            client_id: self.next_client_id(),
            chat_id,
            sender_id: sender_id.into(),
            content: content.into(),
            kind,
            sent_at,
        }))
    }

    /// Start a thread with `vendor_id`. The handle resolves to the thread
    /// as the server created it.
    pub fn create_vendor_chat(
        &self,
        vendor_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<MutationHandle<ChatEntry>> {
        self.store.dispatch(ChatIntent::CreateVendorChat(NewVendorChat {
            client_id: self.next_client_id(),
            vendor_id: vendor_id.into(),
            title: title.into(),
        }))
    }

    pub fn mark_as_read(&self, chat_id: impl Into<String>) -> Result<MutationHandle<ChatEntry>> {
        self.store.dispatch(ChatIntent::MarkAsRead {
            chat_id: chat_id.into(),
        })
    }

    /// Make `chat_id` the active room and start receiving its messages.
    /// Only one room is joined at a time; the previous one is left.
    pub fn join_room(&self, transport: &dyn RealtimeTransport<ChatEntry>, chat_id: impl Into<String>) {
        let chat_id = chat_id.into();
        let unsubscribe = self
            .store
            .subscribe_realtime(transport, &room_channel(&chat_id));

        let previous = self.room.lock().replace(ActiveRoom {
            chat_id,
            unsubscribe,
        });
        if let Some(previous) = previous {
            (previous.unsubscribe)();
        }
    }

    pub fn leave_room(&self) {
        let previous = self.room.lock().take();
        if let Some(previous) = previous {
            tracing::debug!(chat_id = %previous.chat_id, "leaving chat room");
            (previous.unsubscribe)();
        }
    }

    pub fn active_room(&self) -> Option<String> {
        self.room.lock().as_ref().map(|room| room.chat_id.clone())
    }

    /// Messages of `chat_id` in send order.
    pub fn messages(&self, chat_id: &str) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self
            .store
            .state()
            .records
            .into_values()
            .filter_map(|r| match r.payload {
                ChatEntry::Message(m) if m.chat_id == chat_id => Some(m),
                _ => None,
            })
            .collect();
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        messages
    }

    /// Every known thread, ordered by chat id.
    pub fn threads(&self) -> Vec<ChatThread> {
        self.store
            .state()
            .records
            .into_values()
            .filter_map(|r| match r.payload {
                ChatEntry::Thread(thread) => Some(thread),
                ChatEntry::Message(_) => None,
            })
            .collect()
    }

    pub fn unread_count(&self, chat_id: &str) -> u32 {
        self.store
            .aggregates()
            .unread_by_chat
            .get(chat_id)
            .copied()
            .unwrap_or(0)
    }
}

impl ChatStore {
    fn next_client_id(&self) -> String {
        format!("local-{}", self.next_client_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Deref for ChatStore {
    type Target = SyncStore<Chat>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl Drop for ChatStore {
    fn drop(&mut self) {
        self.leave_room();
    }
}
