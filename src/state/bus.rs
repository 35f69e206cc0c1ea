//! In-process change feed: one broadcast channel per logical table.
//!
//! Delivery is best effort and at-least-once from the subscriber's point of
//! view. A subscriber that falls behind receives [`Delivery::Lagged`] and is
//! expected to reconcile through fresh store reads.

use std::sync::Arc;

use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
};

use crate::dao::models::{PlayerEntity, SessionEntity, SubmissionEntity, TeamEntity};

/// Logical tables whose changes are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Quiz sessions.
    Sessions,
    /// Teams and their scores.
    Teams,
    /// Joined players.
    Players,
    /// Recorded submissions.
    Submissions,
}

impl Table {
    const ALL: [Table; 4] = [
        Table::Sessions,
        Table::Teams,
        Table::Players,
        Table::Submissions,
    ];

    fn index(self) -> usize {
        match self {
            Table::Sessions => 0,
            Table::Teams => 1,
            Table::Players => 2,
            Table::Submissions => 3,
        }
    }
}

/// Kind of write that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Row created.
    Insert,
    /// Row changed in place.
    Update,
    /// Row removed.
    Delete,
}

/// Row carried by a change event; for deletes, the last known row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// A session row.
    Session(SessionEntity),
    /// A team row.
    Team(TeamEntity),
    /// A player row.
    Player(PlayerEntity),
    /// A submission row.
    Submission(SubmissionEntity),
}

impl Row {
    /// Table the row belongs to.
    pub fn table(&self) -> Table {
        match self {
            Row::Session(_) => Table::Sessions,
            Row::Team(_) => Table::Teams,
            Row::Player(_) => Table::Players,
            Row::Submission(_) => Table::Submissions,
        }
    }
}

/// A single committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Row after the write.
    pub row: Row,
}

impl ChangeEvent {
    /// Event for a created row.
    pub fn insert(row: Row) -> Self {
        Self {
            kind: ChangeKind::Insert,
            row,
        }
    }

    /// Event for an updated row.
    pub fn update(row: Row) -> Self {
        Self {
            kind: ChangeKind::Update,
            row,
        }
    }

    /// Event for a removed row.
    pub fn delete(row: Row) -> Self {
        Self {
            kind: ChangeKind::Delete,
            row,
        }
    }
}

/// Subscriber-side filter evaluated before an event is handed out.
pub type Predicate = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// Outcome of waiting on a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A matching event.
    Event(ChangeEvent),
    /// `n` events were dropped because the subscriber fell behind.
    Lagged(u64),
}

/// Publish/subscribe hub shared by the whole process.
pub struct EventBus {
    channels: [broadcast::Sender<ChangeEvent>; 4],
}

impl EventBus {
    /// Create a bus whose per-table channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channels: Table::ALL.map(|_| broadcast::channel(capacity).0),
        }
    }

    /// Publish a change on the channel of its row's table.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.channels[event.row.table().index()].send(event);
    }

    /// Subscribe to changes of `table`, optionally filtered by `predicate`.
    pub fn subscribe(&self, table: Table, predicate: Option<Predicate>) -> Subscription {
        Subscription {
            table,
            receiver: self.channels[table.index()].subscribe(),
            predicate,
        }
    }

    /// Release a subscription. Dropping it has the same effect.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Number of live subscribers on `table`.
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.channels[table.index()].receiver_count()
    }
}

/// Live subscription to one table.
pub struct Subscription {
    table: Table,
    receiver: broadcast::Receiver<ChangeEvent>,
    predicate: Option<Predicate>,
}

impl Subscription {
    /// Table this subscription listens to.
    pub fn table(&self) -> Table {
        self.table
    }

    /// Wait for the next matching event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.predicate.as_ref().is_none_or(|keep| keep(&event)) {
                        return Some(Delivery::Event(event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => return Some(Delivery::Lagged(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Pump deliveries into an actor inbox until either side goes away.
    pub fn forward<T: Send + 'static>(
        mut self,
        inbox: mpsc::UnboundedSender<T>,
        on_event: fn(ChangeEvent) -> T,
        on_lag: fn(u64) -> T,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = inbox.closed() => break,
                    delivery = self.recv() => delivery,
                };
                let input = match delivery {
                    Some(Delivery::Event(event)) => on_event(event),
                    Some(Delivery::Lagged(skipped)) => on_lag(skipped),
                    None => break,
                };
                if inbox.send(input).is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn team(name: &str) -> TeamEntity {
        TeamEntity::new("main".into(), name.into())
    }

    #[tokio::test]
    async fn events_are_routed_per_table() {
        let bus = EventBus::new(8);
        let mut teams = bus.subscribe(Table::Teams, None);
        let mut sessions = bus.subscribe(Table::Sessions, None);

        let owls = team("owls");
        bus.publish(ChangeEvent::insert(Row::Team(owls.clone())));
        let session = SessionEntity::scheduled("main".into(), SystemTime::now(), vec![], 60);
        bus.publish(ChangeEvent::update(Row::Session(session.clone())));

        assert_eq!(
            teams.recv().await,
            Some(Delivery::Event(ChangeEvent::insert(Row::Team(owls))))
        );
        assert_eq!(
            sessions.recv().await,
            Some(Delivery::Event(ChangeEvent::update(Row::Session(session))))
        );
    }

    #[tokio::test]
    async fn predicate_filters_events() {
        let bus = EventBus::new(8);
        let owls = team("owls");
        let owls_id = owls.id;
        let mut own_team = bus.subscribe(
            Table::Teams,
            Some(Arc::new(move |event: &ChangeEvent| {
                matches!(&event.row, Row::Team(team) if team.id == owls_id)
            })),
        );

        bus.publish(ChangeEvent::update(Row::Team(team("foxes"))));
        bus.publish(ChangeEvent::update(Row::Team(owls.clone())));

        assert_eq!(
            own_team.recv().await,
            Some(Delivery::Event(ChangeEvent::update(Row::Team(owls))))
        );
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_it_lagged() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe(Table::Teams, None);
        for name in ["a", "b", "c", "d"] {
            bus.publish(ChangeEvent::insert(Row::Team(team(name))));
        }

        assert_eq!(sub.recv().await, Some(Delivery::Lagged(2)));
        assert!(matches!(sub.recv().await, Some(Delivery::Event(_))));
    }

    #[tokio::test]
    async fn forward_stops_when_inbox_closes() {
        let bus = EventBus::new(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pump = bus
            .subscribe(Table::Teams, None)
            .forward(tx, |event| Some(event), |_| None);

        let owls = team("owls");
        bus.publish(ChangeEvent::insert(Row::Team(owls.clone())));
        assert_eq!(rx.recv().await, Some(Some(ChangeEvent::insert(Row::Team(owls)))));

        drop(rx);
        pump.await.unwrap();
        assert_eq!(bus.subscriber_count(Table::Teams), 0);
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_receiver() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(Table::Submissions, None);
        assert_eq!(bus.subscriber_count(Table::Submissions), 1);
        bus.unsubscribe(sub);
        assert_eq!(bus.subscriber_count(Table::Submissions), 0);
    }
}
