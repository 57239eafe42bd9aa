use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::WsMessage;

pub type ConnectionId = Uuid;
pub type WsSender = mpsc::UnboundedSender<WsMessage>;

struct LiveConnection {
    user_id: Uuid,
    sender: WsSender,
    /// Conversation whose group this connection has joined, if any.
    viewing: Option<Uuid>,
}

/// Registry of live connections, grouped per user (`User_{id}`) and per
/// viewed conversation (`Conversation_{id}`).
///
/// Delivery is best effort: a send that fails because the socket task is
/// gone is logged and the stale connection is dropped, without affecting the
/// other recipients. Guards are never held across maps.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    connections: DashMap<ConnectionId, LiveConnection>,
    user_groups: DashMap<Uuid, HashSet<ConnectionId>>,
    conversation_groups: DashMap<Uuid, HashSet<ConnectionId>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and joins it to its user's group.
    pub fn connect(&self, user_id: Uuid, sender: WsSender) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        self.inner.connections.insert(
            connection_id,
            LiveConnection {
                user_id,
                sender,
                viewing: None,
            },
        );
        self.inner
            .user_groups
            .entry(user_id)
            .or_default()
            .insert(connection_id);

        tracing::debug!("Connection {} registered for user {}", connection_id, user_id);
        connection_id
    }

    /// Removes a connection from every group it belongs to.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let Some((_, connection)) = self.inner.connections.remove(&connection_id) else {
            return;
        };

        remove_from_group(&self.inner.user_groups, connection.user_id, connection_id);
        if let Some(conversation_id) = connection.viewing {
            remove_from_group(&self.inner.conversation_groups, conversation_id, connection_id);
        }

        tracing::debug!(
            "Connection {} for user {} removed",
            connection_id,
            connection.user_id
        );
    }

    /// Moves the connection into `conversation_id`'s group, leaving the one it
    /// was viewing before. Returns false for an unknown connection.
    pub fn join_conversation(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        let previous = match self.inner.connections.get_mut(&connection_id) {
            Some(mut connection) => connection.viewing.replace(conversation_id),
            None => return false,
        };

        if let Some(previous) = previous.filter(|p| *p != conversation_id) {
            remove_from_group(&self.inner.conversation_groups, previous, connection_id);
        }
        self.inner
            .conversation_groups
            .entry(conversation_id)
            .or_default()
            .insert(connection_id);

        true
    }

    /// Leaves the conversation group if the connection is currently viewing it.
    pub fn leave_conversation(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        let was_viewing = match self.inner.connections.get_mut(&connection_id) {
            Some(mut connection) if connection.viewing == Some(conversation_id) => {
                connection.viewing = None;
                true
            }
            _ => false,
        };

        if was_viewing {
            remove_from_group(&self.inner.conversation_groups, conversation_id, connection_id);
        }
    }

    /// Evicts all of `user_id`'s connections from a conversation group.
    pub fn leave_conversation_for_user(&self, user_id: Uuid, conversation_id: Uuid) {
        for connection_id in self.user_connections(user_id) {
            self.leave_conversation(connection_id, conversation_id);
        }
    }

    pub fn viewing(&self, connection_id: ConnectionId) -> Option<Uuid> {
        self.inner
            .connections
            .get(&connection_id)
            .and_then(|connection| connection.viewing)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner
            .user_groups
            .get(&user_id)
            .map_or(false, |group| !group.is_empty())
    }

    /// Pushes to every connection of `user_id`. Returns how many accepted it.
    pub fn send_to_user(&self, user_id: &Uuid, message: WsMessage) -> usize {
        let targets = self.user_connections(*user_id);
        self.deliver(targets, &message)
    }

    /// Pushes to every connection viewing `conversation_id`, optionally
    /// skipping one connection (the originator).
    pub fn send_to_conversation(
        &self,
        conversation_id: &Uuid,
        message: WsMessage,
        except: Option<ConnectionId>,
    ) -> usize {
        let targets: Vec<ConnectionId> = self
            .inner
            .conversation_groups
            .get(conversation_id)
            .map(|group| group.iter().copied().filter(|id| Some(*id) != except).collect())
            .unwrap_or_default();

        self.deliver(targets, &message)
    }

    fn user_connections(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.inner
            .user_groups
            .get(&user_id)
            .map(|group| group.iter().copied().collect())
            .unwrap_or_default()
    }

    fn deliver(&self, targets: Vec<ConnectionId>, message: &WsMessage) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();

        for connection_id in targets {
            let sender = match self.inner.connections.get(&connection_id) {
                Some(connection) => connection.sender.clone(),
                None => continue,
            };

            match sender.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!("Push to connection {} failed, dropping it", connection_id);
                    stale.push(connection_id);
                }
            }
        }

        for connection_id in stale {
            self.disconnect(connection_id);
        }

        delivered
    }
}

fn remove_from_group(groups: &DashMap<Uuid, HashSet<ConnectionId>>, key: Uuid, connection_id: ConnectionId) {
    if let Some(mut group) = groups.get_mut(&key) {
        group.remove(&connection_id);
    }
    groups.remove_if(&key, |_, group| group.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::types::ConversationRefPayload;

    fn event(conversation_id: Uuid) -> WsMessage {
        WsMessage::NewConversation(ConversationRefPayload { conversation_id })
    }

    #[test]
    fn test_user_group_reaches_every_device() {
        let manager = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (phone_tx, mut phone_rx) = mpsc::unbounded_channel();
        let (laptop_tx, mut laptop_rx) = mpsc::unbounded_channel();
        manager.connect(user, phone_tx);
        manager.connect(user, laptop_tx);

        let conversation_id = Uuid::new_v4();
        assert_eq!(manager.send_to_user(&user, event(conversation_id)), 2);
        assert_eq!(phone_rx.try_recv().unwrap(), event(conversation_id));
        assert_eq!(laptop_rx.try_recv().unwrap(), event(conversation_id));
        assert!(manager.is_online(user));
    }

    #[test]
    fn test_viewing_moves_between_conversations() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = manager.connect(Uuid::new_v4(), tx);
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(manager.join_conversation(connection, first));
        assert!(manager.join_conversation(connection, second));
        assert_eq!(manager.viewing(connection), Some(second));

        assert_eq!(manager.send_to_conversation(&first, event(first), None), 0);
        assert_eq!(manager.send_to_conversation(&second, event(second), None), 1);
        assert_eq!(rx.try_recv().unwrap(), event(second));

        manager.leave_conversation(connection, second);
        assert_eq!(manager.viewing(connection), None);
        assert_eq!(manager.send_to_conversation(&second, event(second), None), 0);
    }

    #[test]
    fn test_conversation_broadcast_can_skip_originator() {
        let manager = ConnectionManager::new();
        let conversation_id = Uuid::new_v4();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = manager.connect(Uuid::new_v4(), a_tx);
        let b = manager.connect(Uuid::new_v4(), b_tx);
        manager.join_conversation(a, conversation_id);
        manager.join_conversation(b, conversation_id);

        assert_eq!(manager.send_to_conversation(&conversation_id, WsMessage::Ping, Some(a)), 1);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap(), WsMessage::Ping);
    }

    #[test]
    fn test_dead_connection_does_not_block_others() {
        let manager = ConnectionManager::new();
        let user = Uuid::new_v4();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let dead = manager.connect(user, dead_tx);
        manager.connect(user, live_tx);
        drop(dead_rx);

        assert_eq!(manager.send_to_user(&user, WsMessage::Ping), 1);
        assert_eq!(live_rx.try_recv().unwrap(), WsMessage::Ping);
        // The failed connection was pruned
        assert_eq!(manager.viewing(dead), None);
        assert_eq!(manager.send_to_user(&user, WsMessage::Pong), 1);
    }

    #[test]
    fn test_disconnect_clears_all_groups() {
        let manager = ConnectionManager::new();
        let user = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = manager.connect(user, tx);
        manager.join_conversation(connection, conversation_id);

        manager.disconnect(connection);

        assert!(!manager.is_online(user));
        assert_eq!(manager.send_to_conversation(&conversation_id, WsMessage::Ping, None), 0);
        assert!(!manager.join_conversation(connection, conversation_id));
    }

    #[test]
    fn test_evicting_user_from_conversation() {
        let manager = ConnectionManager::new();
        let user = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = manager.connect(user, tx);
        manager.join_conversation(connection, conversation_id);

        manager.leave_conversation_for_user(user, conversation_id);

        assert_eq!(manager.viewing(connection), None);
        assert!(manager.is_online(user));
    }
}
