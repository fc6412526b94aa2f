//! Spectator event stream.
//!
//! A concurrent subscriber set with best-effort, per-subscriber ordered
//! delivery. Subscribers join and leave at any time; broadcast iterates a
//! snapshot of the set and silently drops anyone whose channel has closed.
//! A late joiner immediately receives a synthetic `epoch_end` snapshot so
//! its UI can initialise without replay.
//!
//! Sessions are never persisted: after hibernation subscribers reconnect
//! and the set rebuilds itself.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::agent::Agent;
use crate::events::{AgentStateView, BattleEvent, EpochEndData};
use crate::ids::SubscriberId;

pub struct EventStream {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<BattleEvent>>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Join the stream. The current roster arrives immediately as a
    /// synthetic `epoch_end` snapshot.
    pub fn subscribe(
        &self,
        roster: &[Agent],
        battle_complete: bool,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<BattleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = BattleEvent::EpochEnd(EpochEndData {
            agent_states: roster.iter().map(AgentStateView::of).collect(),
            battle_complete,
        });
        let _ = tx.send(snapshot);
        let id = SubscriberId::new();
        self.subscribers.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Fan events out in order. A failed send means the subscriber is gone:
    /// dropped silently, never an error.
    pub fn broadcast(&self, events: &[BattleEvent]) {
        let targets: Vec<(SubscriberId, mpsc::UnboundedSender<BattleEvent>)> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };
        let mut dead = Vec::new();
        for (id, tx) in targets {
            for event in events {
                if tx.send(event.clone()).is_err() {
                    log::debug!("dropping closed subscriber {}", id);
                    dead.push(id);
                    break;
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap();
            for id in dead {
                subscribers.remove(&id);
            }
        }
    }

    /// Close every session (battle over). Receivers observe channel close.
    pub fn close_all(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentClass;
    use crate::events::{EpochStartData, OddsData};
    use crate::market::MarketSnapshot;

    fn roster() -> Vec<Agent> {
        vec![Agent::new(AgentClass::Warrior, "KRUSHNAR")]
    }

    fn sample_events() -> Vec<BattleEvent> {
        vec![
            BattleEvent::EpochStart(EpochStartData {
                epoch_number: 1,
                market_data: MarketSnapshot::default(),
            }),
            BattleEvent::OddsUpdate(OddsData {
                odds: Default::default(),
            }),
        ]
    }

    #[tokio::test]
    async fn test_subscriber_gets_snapshot_then_events_in_order() {
        let stream = EventStream::new();
        let (_id, mut rx) = stream.subscribe(&roster(), false);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, BattleEvent::EpochEnd(_)));

        stream.broadcast(&sample_events());
        assert!(matches!(rx.recv().await.unwrap(), BattleEvent::EpochStart(_)));
        assert!(matches!(rx.recv().await.unwrap(), BattleEvent::OddsUpdate(_)));
    }

    #[tokio::test]
    async fn test_closed_subscriber_dropped_silently() {
        let stream = EventStream::new();
        let (_id, rx) = stream.subscribe(&roster(), false);
        drop(rx);
        let (_id2, mut rx2) = stream.subscribe(&roster(), false);
        assert_eq!(stream.subscriber_count(), 2);

        stream.broadcast(&sample_events());
        assert_eq!(stream.subscriber_count(), 1);
        // The live subscriber still saw everything.
        assert!(matches!(rx2.recv().await.unwrap(), BattleEvent::EpochEnd(_)));
        assert!(matches!(rx2.recv().await.unwrap(), BattleEvent::EpochStart(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close_all() {
        let stream = EventStream::new();
        let (id, _rx) = stream.subscribe(&roster(), false);
        stream.unsubscribe(id);
        assert_eq!(stream.subscriber_count(), 0);

        let (_id, mut rx) = stream.subscribe(&roster(), true);
        stream.close_all();
        // The snapshot was already queued; afterwards the channel closes.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
