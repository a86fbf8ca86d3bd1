use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// What an observer subscribes to: everything about one room, or everything
/// addressed to one requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Room(Ulid),
    Requester(Ulid),
}

/// Broadcast hub for state-change and waiting-list events.
///
/// Delivery is best-effort: publishing never fails the originating
/// transition, and a full or closed channel is simply dropped on the floor.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event to the room topic and, when addressed, the
    /// requester topic. No-op if nobody is listening.
    pub fn publish(&self, room_id: Ulid, requester: Option<Ulid>, event: &Event) {
        self.send_to(Topic::Room(room_id), event);
        if let Some(r) = requester {
            self.send_to(Topic::Requester(r), event);
        }
    }

    fn send_to(&self, topic: Topic, event: &Event) {
        if let Some(sender) = self.channels.get(&topic) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a topic channel (e.g. when a room is retired).
    pub fn remove(&self, topic: &Topic) {
        self.channels.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive_on_room_topic() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(Topic::Room(rid));

        let event = Event::RoomRetired { id: rid };
        hub.publish(rid, None, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn requester_topic_receives_addressed_events() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let requester = Ulid::new();
        let mut room_rx = hub.subscribe(Topic::Room(rid));
        let mut req_rx = hub.subscribe(Topic::Requester(requester));

        let event = Event::WaitlistExpired {
            entry_id: Ulid::new(),
            room_id: rid,
        };
        hub.publish(rid, Some(requester), &event);

        assert_eq!(room_rx.recv().await.unwrap(), event);
        assert_eq!(req_rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        // No subscriber — should not panic
        hub.publish(rid, Some(Ulid::new()), &Event::RoomRetired { id: rid });
    }
}
