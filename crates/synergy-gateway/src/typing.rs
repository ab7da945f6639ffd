use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;
use uuid::Uuid;

use synergy_types::events::ServerEvent;
use synergy_types::models::Conversation;

use crate::router::Router;

/// Silence after which a typing indicator clears itself.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

struct Entry {
    generation: u64,
    timer: AbortHandle,
    /// Other active participants at the time typing started
    recipients: Vec<Uuid>,
}

/// Per (conversation, principal) typing state with auto-expiry.
///
/// Each principal produces at most one `isTyping: true` per burst and
/// exactly one `false` when the burst ends, whether by `stop`, by expiry,
/// or by being cleared on send, leave or disconnect.
#[derive(Clone)]
pub struct TypingTracker {
    inner: Arc<TypingInner>,
}

struct TypingInner {
    router: Router,
    timeout: Duration,
    generation: AtomicU64,
    entries: Mutex<HashMap<(Uuid, Uuid), Entry>>,
}

impl TypingTracker {
    pub fn new(router: Router) -> Self {
        Self::with_timeout(router, TYPING_TIMEOUT)
    }

    pub fn with_timeout(router: Router, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(TypingInner {
                router,
                timeout,
                generation: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Mark `principal_id` as typing, re-arming the expiry timer.
    pub async fn start(&self, conversation: &Conversation, principal_id: Uuid) {
        let key = (conversation.id, principal_id);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let recipients: Vec<Uuid> = conversation
            .active_participant_ids()
            .into_iter()
            .filter(|id| *id != principal_id)
            .collect();

        let tracker = self.clone();
        let timeout = self.inner.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracker.expire(key, generation).await;
        })
        .abort_handle();

        let burst_started = {
            let mut entries = self.lock();
            let previous = entries.insert(
                key,
                Entry {
                    generation,
                    timer,
                    recipients: recipients.clone(),
                },
            );
            match previous {
                Some(old) => {
                    old.timer.abort();
                    false
                }
                None => true,
            }
        };

        if burst_started {
            trace!("{} started typing in {}", principal_id, conversation.id);
            self.emit(&recipients, conversation.id, principal_id, true).await;
        }
    }

    /// End the burst, if any. Returns whether an indicator was cleared.
    pub async fn stop(&self, conversation_id: Uuid, principal_id: Uuid) -> bool {
        let removed = self.lock().remove(&(conversation_id, principal_id));
        match removed {
            Some(entry) => {
                entry.timer.abort();
                self.emit(&entry.recipients, conversation_id, principal_id, false)
                    .await;
                true
            }
            None => false,
        }
    }

    /// End every burst belonging to `principal_id` (disconnect).
    pub async fn clear_principal(&self, principal_id: Uuid) {
        let drained: Vec<((Uuid, Uuid), Entry)> = {
            let mut entries = self.lock();
            let keys: Vec<(Uuid, Uuid)> = entries
                .keys()
                .filter(|(_, p)| *p == principal_id)
                .copied()
                .collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e)))
                .collect()
        };

        for ((conversation_id, _), entry) in drained {
            entry.timer.abort();
            self.emit(&entry.recipients, conversation_id, principal_id, false)
                .await;
        }
    }

    pub fn is_typing(&self, conversation_id: Uuid, principal_id: Uuid) -> bool {
        self.lock().contains_key(&(conversation_id, principal_id))
    }

    async fn expire(&self, key: (Uuid, Uuid), generation: u64) {
        let expired = {
            let mut entries = self.lock();
            match entries.get(&key) {
                // A newer start re-armed this entry; leave it alone
                Some(entry) if entry.generation == generation => entries.remove(&key),
                _ => None,
            }
        };

        if let Some(entry) = expired {
            trace!("Typing indicator for {} in {} expired", key.1, key.0);
            self.emit(&entry.recipients, key.0, key.1, false).await;
        }
    }

    async fn emit(&self, recipients: &[Uuid], conversation_id: Uuid, principal_id: Uuid, is_typing: bool) {
        let event = ServerEvent::UserTyping {
            user_id: principal_id,
            conversation_id,
            is_typing,
        };
        self.inner.router.emit_to_principals(recipients, &event).await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(Uuid, Uuid), Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use synergy_types::models::{
        ConversationKind, ConversationSettings, Participant, ParticipantRole,
    };
    use tokio::sync::mpsc;

    fn participant(id: Uuid) -> Participant {
        Participant {
            principal_id: id,
            display_name: id.to_string(),
            role: ParticipantRole::Member,
            joined_at: Utc::now(),
            last_seen_at: None,
            notifications_enabled: true,
            is_active: true,
            unread_count: 0,
        }
    }

    fn direct(a: Uuid, b: Uuid) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Direct,
            name: None,
            participants: vec![participant(a), participant(b)],
            created_by: a,
            last_message: None,
            settings: ConversationSettings::default(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn setup() -> (
        TypingTracker,
        Conversation,
        Uuid,
        mpsc::UnboundedReceiver<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let router = Router::new();
        let typist = Uuid::new_v4();
        let watcher = Uuid::new_v4();
        let (tx_t, rx_t) = mpsc::unbounded_channel();
        let (tx_w, rx_w) = mpsc::unbounded_channel();
        router.register(typist, tx_t).await;
        router.register(watcher, tx_w).await;
        let conversation = direct(typist, watcher);
        (TypingTracker::new(router), conversation, typist, rx_t, rx_w)
    }

    fn typing_flags(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<bool> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::UserTyping { is_typing, .. } = event {
                out.push(is_typing);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn silence_expires_once() {
        let (tracker, conv, typist, mut own, mut other) = setup().await;

        tracker.start(&conv, typist).await;
        tracker.start(&conv, typist).await;
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(typing_flags(&mut other), vec![true, false]);
        assert!(typing_flags(&mut own).is_empty());
        assert!(!tracker.is_typing(conv.id, typist));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_extends_the_burst() {
        let (tracker, conv, typist, _own, mut other) = setup().await;

        tracker.start(&conv, typist).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        tracker.start(&conv, typist).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        // 4 s after the first start, 2 s after the second: still typing
        assert!(tracker.is_typing(conv.id, typist));
        assert_eq!(typing_flags(&mut other), vec![true]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(typing_flags(&mut other), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_emits_one_false() {
        let (tracker, conv, typist, _own, mut other) = setup().await;

        tracker.start(&conv, typist).await;
        assert!(tracker.stop(conv.id, typist).await);
        assert!(!tracker.stop(conv.id, typist).await);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(typing_flags(&mut other), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_every_conversation() {
        let (tracker, conv, typist, _own, mut other) = setup().await;
        let mut second = conv.clone();
        second.id = Uuid::new_v4();

        tracker.start(&conv, typist).await;
        tracker.start(&second, typist).await;
        tracker.clear_principal(typist).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(typing_flags(&mut other), vec![true, true, false, false]);
    }
}
