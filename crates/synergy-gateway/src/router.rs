use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use synergy_types::events::ServerEvent;
use synergy_types::models::{Conversation, PresenceStatus};

pub type ConnId = Uuid;
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct Route {
    conn_id: ConnId,
    tx: EventSender,
    status: PresenceStatus,
}

/// Principal-to-connection routing and presence.
///
/// One live route per principal: registering again replaces (and drops)
/// the previous sender, which ends that connection's send loop.
#[derive(Clone, Default)]
pub struct Router {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    /// principal_id -> current route; presence lives on the route so both
    /// change under the same lock
    routes: RwLock<HashMap<Uuid, Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events for `principal_id` to `tx`, marking them online.
    pub async fn register(&self, principal_id: Uuid, tx: EventSender) -> ConnId {
        let conn_id = Uuid::new_v4();
        let previous = self.inner.routes.write().await.insert(
            principal_id,
            Route {
                conn_id,
                tx,
                status: PresenceStatus::Online,
            },
        );
        if let Some(old) = previous {
            debug!("{} reconnected, replacing route {}", principal_id, old.conn_id);
        }
        conn_id
    }

    /// Drop the route, but only if `conn_id` still owns it. Returns whether
    /// the principal went offline.
    pub async fn unregister(&self, principal_id: Uuid, conn_id: ConnId) -> bool {
        let mut routes = self.inner.routes.write().await;
        match routes.get(&principal_id) {
            Some(route) if route.conn_id == conn_id => {
                routes.remove(&principal_id);
                true
            }
            _ => false,
        }
    }

    pub async fn is_online(&self, principal_id: Uuid) -> bool {
        self.inner.routes.read().await.contains_key(&principal_id)
    }

    pub async fn status(&self, principal_id: Uuid) -> PresenceStatus {
        self.inner
            .routes
            .read()
            .await
            .get(&principal_id)
            .map_or(PresenceStatus::Offline, |r| r.status)
    }

    /// Update presence for a connected principal. Returns false when the
    /// principal has no route.
    pub async fn set_status(&self, principal_id: Uuid, status: PresenceStatus) -> bool {
        match self.inner.routes.write().await.get_mut(&principal_id) {
            Some(route) => {
                route.status = status;
                true
            }
            None => false,
        }
    }

    /// Every connected principal and their status.
    pub async fn online_snapshot(&self) -> Vec<(Uuid, PresenceStatus)> {
        self.inner
            .routes
            .read()
            .await
            .iter()
            .map(|(id, route)| (*id, route.status))
            .collect()
    }

    /// Send to one principal. Returns whether they had a live route.
    pub async fn emit_to_principal(&self, principal_id: Uuid, event: ServerEvent) -> bool {
        let routes = self.inner.routes.read().await;
        match routes.get(&principal_id) {
            Some(route) => route.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Send to each listed principal that is online. Returns how many
    /// routes accepted the event.
    pub async fn emit_to_principals(&self, principal_ids: &[Uuid], event: &ServerEvent) -> usize {
        let routes = self.inner.routes.read().await;
        principal_ids
            .iter()
            .filter_map(|id| routes.get(id))
            .filter(|route| route.tx.send(event.clone()).is_ok())
            .count()
    }

    /// Send to every online active participant, the author included.
    pub async fn emit_to_conversation(&self, conversation: &Conversation, event: ServerEvent) -> usize {
        let recipients = conversation.active_participant_ids();
        let sent = self.emit_to_principals(&recipients, &event).await;
        debug!(
            "{} -> {}/{} participants of {}",
            event.name(),
            sent,
            recipients.len(),
            conversation.id
        );
        sent
    }

    /// Send to every connected principal.
    pub async fn broadcast(&self, event: ServerEvent) {
        let routes = self.inner.routes.read().await;
        for route in routes.values() {
            let _ = route.tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(id: Uuid) -> ServerEvent {
        ServerEvent::Ready {
            user_id: id,
            display_name: "ada".into(),
        }
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let router = Router::new();
        let id = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let first = router.register(id, tx1).await;
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let second = router.register(id, tx2).await;

        // The replaced sender was dropped with its route
        assert!(rx1.recv().await.is_none());

        assert!(router.emit_to_principal(id, ready(id)).await);
        assert!(matches!(rx2.recv().await, Some(ServerEvent::Ready { .. })));

        // A stale connection cannot take the principal offline
        assert!(!router.unregister(id, first).await);
        assert!(router.is_online(id).await);
        assert!(router.unregister(id, second).await);
        assert!(!router.is_online(id).await);
    }

    #[tokio::test]
    async fn status_tracks_routes() {
        let router = Router::new();
        let id = Uuid::new_v4();
        assert_eq!(router.status(id).await, PresenceStatus::Offline);
        assert!(!router.set_status(id, PresenceStatus::Busy).await);

        let (tx, _rx) = mpsc::unbounded_channel();
        router.register(id, tx).await;
        assert_eq!(router.status(id).await, PresenceStatus::Online);
        assert!(router.set_status(id, PresenceStatus::Away).await);
        assert_eq!(router.online_snapshot().await, vec![(id, PresenceStatus::Away)]);
    }

    #[tokio::test]
    async fn emit_skips_offline_principals() {
        let router = Router::new();
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(online, tx).await;

        let sent = router.emit_to_principals(&[online, offline], &ready(online)).await;
        assert_eq!(sent, 1);
        assert!(rx.try_recv().is_ok());
        assert!(!router.emit_to_principal(offline, ready(offline)).await);
    }
}
