//! Turns executed events into client-visible [`Notification`]s and drains
//! the [`Reclaimer`] (§4.10). Runs on the same non-realtime thread as
//! [`crate::preprocessor::PreProcessor`] in the common embedding (a single
//! "engine thread" servicing both halves between audio callbacks), but
//! nothing here requires that — it only ever touches the `OutboxConsumer`,
//! its own client registry, and the `Reclaimer`.

use fnv::FnvHashSet;

use crate::command::ClientId;
use crate::event_queue::{ExecutedEvent, OutboxConsumer};
use crate::events::EventOutcome;
use crate::notification::Notification;
use crate::reclaim::Reclaimer;

pub struct PostProcessor {
    outbox: OutboxConsumer,
    reclaimer: Reclaimer,
    /// Acks a blocking event's `request_id` back to the PreProcessor once
    /// this event has been fully processed (§4.9).
    ack: crossbeam_channel::Sender<u64>,
    /// Registered client ids (§4.13 `RegisterClient`/`UnregisterClient`).
    /// Per-client notification *routing* is the embedding wire protocol's
    /// job (DESIGN.md): every registered client is assumed to read from the
    /// same broadcast `notify` channel, so this set is bookkeeping only —
    /// it lets an embedder ask "is client X still registered?" without its
    /// own side channel.
    clients: FnvHashSet<ClientId>,
    notify: crossbeam_channel::Sender<Notification>,
}

impl PostProcessor {
    pub fn new(
        outbox: OutboxConsumer,
        reclaimer: Reclaimer,
        ack: crossbeam_channel::Sender<u64>,
        notify: crossbeam_channel::Sender<Notification>,
    ) -> Self {
        Self { outbox, reclaimer, ack, clients: FnvHashSet::default(), notify }
    }

    pub fn is_registered(&self, client_id: ClientId) -> bool {
        self.clients.contains(&client_id)
    }

    /// Drain every event the Executor has finished since the last call,
    /// then run the Reclaimer's collector (§4.7 step 5, §4.12).
    pub fn run(&mut self) {
        while let Ok(executed) = self.outbox.pop() {
            self.process_one(executed);
        }
        self.reclaimer.collect();
    }

    fn process_one(&mut self, executed: ExecutedEvent) {
        let ExecutedEvent { outcome, request_id, blocking } = executed;

        for notification in self.outcome_to_notifications(outcome) {
            // A full notification channel means no one is listening;
            // dropping the message is correct rather than blocking the
            // engine thread on a slow or absent client.
            let _ = self.notify.send(notification);
        }

        if blocking {
            let _ = self.ack.send(request_id);
        }
    }

    fn outcome_to_notifications(&mut self, outcome: EventOutcome) -> Vec<Notification> {
        match outcome {
            EventOutcome::Put { path, properties } => vec![Notification::Put { path, properties }],
            EventOutcome::Delta { path, removed, added } => vec![Notification::Delta { path, removed, added }],
            EventOutcome::Connect { src, dst } => vec![Notification::Connect { src, dst }],
            EventOutcome::Disconnect { src, dst } => vec![Notification::Disconnect { src, dst }],
            EventOutcome::DisconnectAll { links } => {
                links.into_iter().map(|(src, dst)| Notification::Disconnect { src, dst }).collect()
            }
            EventOutcome::Delete { path } => vec![Notification::Delete { path }],
            EventOutcome::Move { old, new } => vec![Notification::Move { old, new }],
            EventOutcome::RegisterClient { client_id } => {
                self.clients.insert(client_id);
                Vec::new()
            }
            EventOutcome::UnregisterClient { client_id } => {
                self.clients.remove(&client_id);
                Vec::new()
            }
            EventOutcome::Ping | EventOutcome::Noop => Vec::new(),
        }
    }
}
