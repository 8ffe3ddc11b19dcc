//! Victory announcements received on the push channel.

use tokio::sync::broadcast;

use crate::dto::ws::VictoryEvent;

/// Fan-out of match results to dashboard listeners.
///
/// Announcements never touch the store; `GameState::winners` stays the only record of who won.
pub struct VictoryHub {
    sender: broadcast::Sender<VictoryEvent>,
}

impl VictoryHub {
    /// Keep up to `capacity` unread announcements per listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Listen for announcements made from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VictoryEvent> {
        self.sender.subscribe()
    }

    /// Announce a result; returns how many listeners got it.
    pub fn announce(&self, event: VictoryEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::RecvError;

    use super::*;

    fn victory(winner: &str) -> VictoryEvent {
        VictoryEvent {
            winner: winner.into(),
            message: format!("{winner} wins"),
        }
    }

    #[tokio::test]
    async fn listeners_receive_announcements() {
        let hub = VictoryHub::new(4);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.announce(victory("red")), 2);
        assert_eq!(first.recv().await.unwrap().winner, "red");
        assert_eq!(second.recv().await.unwrap().message, "red wins");
    }

    #[test]
    fn announcing_to_nobody_reaches_nobody() {
        let hub = VictoryHub::new(1);
        assert_eq!(hub.announce(victory("blue")), 0);
    }

    #[tokio::test]
    async fn slow_listener_skips_old_announcements() {
        let hub = VictoryHub::new(1);
        let mut rx = hub.subscribe();
        hub.announce(victory("red"));
        hub.announce(victory("blue"));
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
        assert_eq!(rx.recv().await.unwrap().winner, "blue");
    }
}
