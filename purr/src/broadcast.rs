//! Process-local fan-out of deleted identities
//!
//! Fire and forget: a send with no live subscribers is not an error, and slow
//! subscribers observe `Lagged` rather than blocking deletes.

use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsDeleted {
    pub identities: Vec<String>,
}

#[derive(Debug)]
pub struct DeletionBroadcast {
    sender: broadcast::Sender<ItemsDeleted>,
}

impl Default for DeletionBroadcast {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DeletionBroadcast {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ItemsDeleted> {
        self.sender.subscribe()
    }

    pub fn announce(&self, identities: Vec<String>) {
        if identities.is_empty() {
            return;
        }
        let count = identities.len();
        match self.sender.send(ItemsDeleted { identities }) {
            Ok(receivers) => debug!(count, receivers, "Broadcast deleted items"),
            Err(_) => debug!(count, "No deletion subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_deletions() {
        let broadcast = DeletionBroadcast::default();
        let mut first = broadcast.subscribe();
        let mut second = broadcast.subscribe();
        broadcast.announce(vec!["abc".to_string()]);
        assert_eq!(first.recv().await.unwrap().identities, vec!["abc".to_string()]);
        assert_eq!(second.recv().await.unwrap().identities, vec!["abc".to_string()]);
    }

    #[test]
    fn test_announce_without_subscribers_is_silent() {
        let broadcast = DeletionBroadcast::default();
        broadcast.announce(vec!["abc".to_string()]);
        broadcast.announce(Vec::new());
    }
}
