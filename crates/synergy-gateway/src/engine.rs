use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use synergy_db::Database;
use synergy_db::messages::normalize_page;
use synergy_types::api::UpdateSettingsRequest;
use synergy_types::draft::{MessageDraft, ValidatedDraft, validate_edit_text};
use synergy_types::events::ServerEvent;
use synergy_types::models::{
    Conversation, ConversationKind, DeliveryStatus, Message, MessagePage, PresenceStatus, Principal,
    Reaction, ReadOutcome,
};

use crate::error::{MessagingError, Result};
use crate::identity::Identity;
use crate::router::{ConnId, EventSender, Router};
use crate::typing::TypingTracker;

/// Entry point for every messaging operation. HTTP handlers and the live
/// channel call the same methods: authorize, persist, then fan out.
#[derive(Clone)]
pub struct Engine {
    db: Arc<Database>,
    identity: Identity,
    router: Router,
    typing: TypingTracker,
}

impl Engine {
    pub fn new(db: Arc<Database>, identity: Identity) -> Self {
        let router = Router::new();
        let typing = TypingTracker::new(router.clone());
        Self {
            db,
            identity,
            router,
            typing,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    /// Run a store call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> synergy_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                MessagingError::Internal(e.to_string())
            })?
            .map_err(MessagingError::from)
    }

    async fn conversation(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.blocking(move |db| db.get_conversation(conversation_id))
            .await
    }

    async fn active_conversation(&self, conversation_id: Uuid, principal_id: Uuid) -> Result<Conversation> {
        let conversation = self.conversation(conversation_id).await?;
        if !conversation.is_active_participant(principal_id) {
            return Err(MessagingError::Forbidden(
                "not an active participant of this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    // -- Identity & presence --

    /// Resolve a bearer token to an active principal, mirroring it locally.
    pub async fn authenticate(&self, token: &str) -> Result<Principal> {
        let claims = self.identity.verify(token)?;
        let principal = self
            .blocking(move |db| db.upsert_principal(claims.sub, &claims.name, claims.role))
            .await?;
        if !principal.active {
            return Err(MessagingError::Unauthenticated("principal is deactivated".into()));
        }
        Ok(principal)
    }

    /// Attach a live connection: `ready`, the current presence snapshot,
    /// then announce the principal to everyone.
    pub async fn connect(&self, principal: &Principal, tx: EventSender) -> ConnId {
        let _ = tx.send(ServerEvent::Ready {
            user_id: principal.id,
            display_name: principal.display_name.clone(),
        });
        for (user_id, status) in self.router.online_snapshot().await {
            if user_id != principal.id {
                let _ = tx.send(ServerEvent::UserStatusUpdate { user_id, status });
            }
        }

        let conn_id = self.router.register(principal.id, tx).await;
        self.router
            .broadcast(ServerEvent::UserStatusUpdate {
                user_id: principal.id,
                status: PresenceStatus::Online,
            })
            .await;
        conn_id
    }

    /// Detach a connection. A connection that was already replaced by a
    /// newer one leaves presence untouched.
    pub async fn disconnect(&self, principal_id: Uuid, conn_id: ConnId) {
        if !self.router.unregister(principal_id, conn_id).await {
            return;
        }
        self.typing.clear_principal(principal_id).await;
        self.router
            .broadcast(ServerEvent::UserStatusUpdate {
                user_id: principal_id,
                status: PresenceStatus::Offline,
            })
            .await;
    }

    pub async fn update_status(&self, principal_id: Uuid, status: PresenceStatus) -> Result<()> {
        if !self.router.set_status(principal_id, status).await {
            return Err(MessagingError::InvalidOperation("principal is not connected".into()));
        }
        self.router
            .broadcast(ServerEvent::UserStatusUpdate {
                user_id: principal_id,
                status,
            })
            .await;
        Ok(())
    }

    // -- Conversations --

    pub async fn list_conversations(&self, principal_id: Uuid) -> Result<Vec<Conversation>> {
        self.blocking(move |db| db.list_conversations_for(principal_id))
            .await
    }

    /// Idempotent get-or-create. A residual uniqueness race is retried
    /// once as a plain lookup.
    pub async fn open_direct(&self, principal_id: Uuid, other_id: Uuid) -> Result<Conversation> {
        match self
            .blocking(move |db| db.get_or_create_direct(principal_id, other_id))
            .await
        {
            Err(MessagingError::Conflict(reason)) => {
                warn!("Direct conversation race ({}), retrying lookup", reason);
                self.blocking(move |db| db.get_or_create_direct(principal_id, other_id))
                    .await
            }
            other => other,
        }
    }

    pub async fn create_group(
        &self,
        creator_id: Uuid,
        name: Option<String>,
        member_ids: Vec<Uuid>,
    ) -> Result<Conversation> {
        let conversation = self
            .blocking(move |db| db.create_group(creator_id, name.as_deref(), &member_ids))
            .await?;
        self.router
            .emit_to_conversation(&conversation, ServerEvent::ConversationUpdated(conversation.clone()))
            .await;
        Ok(conversation)
    }

    pub async fn list_messages(
        &self,
        principal_id: Uuid,
        conversation_id: Uuid,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<MessagePage> {
        let (page, page_size) = normalize_page(page, page_size);
        self.blocking(move |db| db.list_messages(conversation_id, principal_id, page, page_size))
            .await
    }

    /// Validate membership for a live-channel join. Fan-out is driven by
    /// participation, so joining only confirms access.
    pub async fn join_conversation(&self, principal_id: Uuid, conversation_id: Uuid) -> Result<Conversation> {
        let conversation = self.conversation(conversation_id).await?;
        if conversation.participant(principal_id).is_none() {
            return Err(MessagingError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    pub async fn leave_conversation(&self, principal_id: Uuid, conversation_id: Uuid) {
        self.typing.stop(conversation_id, principal_id).await;
    }

    pub async fn add_participant(
        &self,
        actor_id: Uuid,
        conversation_id: Uuid,
        principal_id: Uuid,
    ) -> Result<Conversation> {
        let before = self.conversation(conversation_id).await?;
        if !before.is_admin(actor_id) {
            return Err(MessagingError::Forbidden("only group admins can add participants".into()));
        }

        let (conversation, changed) = self
            .blocking(move |db| db.add_participant(conversation_id, principal_id))
            .await?;
        if !changed {
            return Ok(conversation);
        }

        let added = display_name(&conversation, principal_id);
        let actor = display_name(&conversation, actor_id);
        self.post_system(&conversation, actor_id, format!("{actor} added {added}"))
            .await?;
        self.router
            .emit_to_conversation(&conversation, ServerEvent::ConversationUpdated(conversation.clone()))
            .await;
        Ok(conversation)
    }

    /// Admins may remove anyone; everyone else may only leave.
    pub async fn remove_participant(
        &self,
        actor_id: Uuid,
        conversation_id: Uuid,
        principal_id: Uuid,
    ) -> Result<Conversation> {
        let before = self.conversation(conversation_id).await?;
        if actor_id != principal_id && !before.is_admin(actor_id) {
            return Err(MessagingError::Forbidden(
                "only group admins can remove other participants".into(),
            ));
        }
        if before.kind != ConversationKind::Group {
            return Err(MessagingError::InvalidOperation(
                "participants cannot leave a direct conversation".into(),
            ));
        }
        if !before.is_active_participant(principal_id) {
            return Err(MessagingError::NotFound("participant not found".into()));
        }

        let removed = display_name(&before, principal_id);
        let text = if actor_id == principal_id {
            format!("{removed} left the group")
        } else {
            format!("{} removed {removed}", display_name(&before, actor_id))
        };

        // Notice and removal commit together
        let (conversation, notice) = self
            .blocking(move |db| db.remove_participant(conversation_id, principal_id, Some((actor_id, text))))
            .await?;
        self.typing.stop(conversation_id, principal_id).await;

        if let Some(message) = notice {
            // Addressed to the membership before removal so the leaver sees it too
            self.router
                .emit_to_conversation(&before, ServerEvent::NewMessage(message))
                .await;
        }

        let event = ServerEvent::ConversationUpdated(conversation.clone());
        self.router
            .emit_to_conversation(&conversation, event.clone())
            .await;
        self.router.emit_to_principal(principal_id, event).await;
        Ok(conversation)
    }

    /// Group settings are admin-only; either side of a direct conversation
    /// may change its settings.
    pub async fn update_settings(
        &self,
        actor_id: Uuid,
        conversation_id: Uuid,
        update: UpdateSettingsRequest,
    ) -> Result<Conversation> {
        let before = self.active_conversation(conversation_id, actor_id).await?;
        if before.kind == ConversationKind::Group && !before.is_admin(actor_id) {
            return Err(MessagingError::Forbidden("only group admins can change settings".into()));
        }

        let mut settings = before.settings.clone();
        if let Some(v) = update.allow_file_sharing {
            settings.allow_file_sharing = v;
        }
        if let Some(v) = update.allow_voice_messages {
            settings.allow_voice_messages = v;
        }
        if let Some(v) = update.auto_delete_enabled {
            settings.auto_delete_enabled = v;
        }
        if let Some(v) = update.auto_delete_after_days {
            settings.auto_delete_after_days = v;
        }

        let conversation = self
            .blocking(move |db| db.update_settings(conversation_id, &settings))
            .await?;
        self.router
            .emit_to_conversation(&conversation, ServerEvent::ConversationUpdated(conversation.clone()))
            .await;
        Ok(conversation)
    }

    pub async fn set_notifications(&self, principal_id: Uuid, conversation_id: Uuid, enabled: bool) -> Result<()> {
        self.blocking(move |db| db.set_notifications(conversation_id, principal_id, enabled))
            .await
    }

    // -- Messages --

    /// Authorize, validate, persist (message and conversation aggregate
    /// together), fan out, report delivery, clear the sender's typing state.
    pub async fn send_message(&self, sender_id: Uuid, conversation_id: Uuid, draft: MessageDraft) -> Result<Message> {
        let conversation = self.active_conversation(conversation_id, sender_id).await?;
        let validated = draft.validate()?;

        let (mut message, created) = self
            .blocking(move |db| db.create_message(conversation_id, sender_id, validated))
            .await?;

        if !created {
            // Retried send: let the author reconcile, nobody else hears it twice
            self.router
                .emit_to_principal(sender_id, ServerEvent::NewMessage(message.clone()))
                .await;
            return Ok(message);
        }

        self.router
            .emit_to_conversation(&conversation, ServerEvent::NewMessage(message.clone()))
            .await;

        let mut delivered = false;
        let now = Utc::now();
        for recipient_id in conversation.active_participant_ids() {
            if recipient_id == sender_id || !self.router.is_online(recipient_id).await {
                continue;
            }
            delivered = true;
            self.router
                .emit_to_principal(
                    sender_id,
                    ServerEvent::MessageDelivered {
                        message_id: message.id,
                        conversation_id,
                        recipient_id,
                        delivered_at: now,
                    },
                )
                .await;
        }
        if delivered {
            let message_id = message.id;
            if self.blocking(move |db| db.mark_delivered(message_id)).await? {
                message.delivery_status = DeliveryStatus::Delivered;
            }
        }

        self.typing.stop(conversation_id, sender_id).await;
        Ok(message)
    }

    /// Toggle a reaction and fan out the full resulting set.
    pub async fn react(&self, principal_id: Uuid, message_id: Uuid, emoji: String) -> Result<Vec<Reaction>> {
        let (conversation_id, reactions) = self
            .blocking(move |db| db.toggle_reaction(message_id, principal_id, &emoji))
            .await?;

        let conversation = self.conversation(conversation_id).await?;
        self.router
            .emit_to_conversation(
                &conversation,
                ServerEvent::ReactionUpdated {
                    message_id,
                    conversation_id,
                    reactions: reactions.clone(),
                },
            )
            .await;
        Ok(reactions)
    }

    pub async fn edit_message(&self, principal_id: Uuid, message_id: Uuid, text: String) -> Result<Message> {
        let text = validate_edit_text(&text)?;
        let message = self
            .blocking(move |db| db.edit_message(message_id, principal_id, text))
            .await?;

        let conversation = self.conversation(message.conversation_id).await?;
        self.router
            .emit_to_conversation(&conversation, ServerEvent::MessageEdited(message.clone()))
            .await;
        Ok(message)
    }

    /// Tombstone a message. Deleting twice succeeds without a second event.
    pub async fn delete_message(&self, principal_id: Uuid, message_id: Uuid) -> Result<Message> {
        let (message, changed) = self
            .blocking(move |db| db.soft_delete_message(message_id, principal_id))
            .await?;

        if changed {
            let conversation = self.conversation(message.conversation_id).await?;
            self.router
                .emit_to_conversation(&conversation, ServerEvent::MessageDeleted(message.clone()))
                .await;
        }
        Ok(message)
    }

    /// Mark everything read for `principal_id`. `messagesRead` goes out only
    /// when something new was read.
    pub async fn mark_read(&self, principal_id: Uuid, conversation_id: Uuid) -> Result<ReadOutcome> {
        let outcome = self
            .blocking(move |db| db.mark_many_read(conversation_id, principal_id))
            .await?;

        if !outcome.message_ids.is_empty() {
            let conversation = self.conversation(conversation_id).await?;
            self.router
                .emit_to_conversation(
                    &conversation,
                    ServerEvent::MessagesRead {
                        user_id: principal_id,
                        conversation_id,
                        message_ids: outcome.message_ids.clone(),
                        read_at: outcome.read_at,
                    },
                )
                .await;
        }
        Ok(outcome)
    }

    // -- Typing --

    pub async fn typing_start(&self, principal_id: Uuid, conversation_id: Uuid) -> Result<()> {
        let conversation = self.active_conversation(conversation_id, principal_id).await?;
        self.typing.start(&conversation, principal_id).await;
        Ok(())
    }

    pub async fn typing_stop(&self, principal_id: Uuid, conversation_id: Uuid) {
        self.typing.stop(conversation_id, principal_id).await;
    }

    // -- Retention --

    pub async fn purge_expired(&self) -> Result<usize> {
        self.blocking(|db| db.purge_expired(Utc::now())).await
    }

    async fn post_system(&self, conversation: &Conversation, actor_id: Uuid, text: String) -> Result<()> {
        let conversation_id = conversation.id;
        let (message, _) = self
            .blocking(move |db| {
                db.create_message(conversation_id, actor_id, ValidatedDraft::system(text))
            })
            .await?;
        info!("System message in {}: {:?}", conversation_id, message.content.body());
        self.router
            .emit_to_conversation(conversation, ServerEvent::NewMessage(message))
            .await;
        Ok(())
    }
}

fn display_name(conversation: &Conversation, principal_id: Uuid) -> String {
    conversation
        .participant(principal_id)
        .map(|p| p.display_name.clone())
        .unwrap_or_else(|| "someone".to_string())
}
