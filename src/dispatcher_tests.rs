// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::ids::ClientId;
use std::sync::{Arc, Mutex};

struct RecordingSink {
    deferred: std::collections::VecDeque<Event>,
    seen: Arc<Mutex<Vec<String>>>,
    shutdown_after: usize,
    shutdown: CancellationToken,
}

impl EventSink for RecordingSink {
    fn pop_deferred(&mut self) -> Option<Event> {
        self.deferred.pop_front()
    }

    fn handle(&mut self, event: Event) {
        let label = match &event {
            Event::Command(Command::Disconnect { client_id }) => format!("disconnect({})", client_id.0),
            Event::Command(Command::EnableUsage) => "enable_usage".to_owned(),
            _ => "other".to_owned(),
        };
        let mut seen = self.seen.lock().unwrap();
        seen.push(label);
        if seen.len() >= self.shutdown_after {
            self.shutdown.cancel();
        }
    }
}

#[tokio::test]
async fn deferred_events_are_replayed_before_new_ones() {
    let shutdown = CancellationToken::new();
    let (dispatcher, sender) = Dispatcher::new(8, shutdown.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = RecordingSink {
        deferred: std::collections::VecDeque::from([Event::Command(Command::Disconnect {
            client_id: ClientId(1),
        })]),
        seen: seen.clone(),
        shutdown_after: 2,
        shutdown: shutdown.clone(),
    };

    sender.send_command(Command::EnableUsage);

    dispatcher.run(&mut sink).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["disconnect(1)".to_owned(), "enable_usage".to_owned()]);
}

#[tokio::test]
async fn closing_the_sender_stops_the_loop() {
    let shutdown = CancellationToken::new();
    let (dispatcher, sender) = Dispatcher::new(4, shutdown.clone());
    drop(sender);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = RecordingSink {
        deferred: std::collections::VecDeque::new(),
        seen,
        shutdown_after: usize::MAX,
        shutdown,
    };

    dispatcher.run(&mut sink).await;
}

#[tokio::test]
async fn spawned_timeout_feeds_the_event_back() {
    let shutdown = CancellationToken::new();
    let (dispatcher, sender) = Dispatcher::new(4, shutdown.clone());

    spawn_timeout(
        Duration::from_millis(1),
        sender,
        TimeoutEvent::SendMessage { tx: crate::ids::TransactionId(7) },
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = RecordingSink {
        deferred: std::collections::VecDeque::new(),
        seen,
        shutdown_after: 1,
        shutdown,
    };
    dispatcher.run(&mut sink).await;
}

#[tokio::test]
async fn cancelling_the_token_suppresses_the_timeout() {
    let shutdown = CancellationToken::new();
    let (dispatcher, sender) = Dispatcher::new(4, shutdown.clone());
    let cancel = CancellationToken::new();

    spawn_cancellable_timeout(
        Duration::from_millis(50),
        sender.clone(),
        TimeoutEvent::DataPathConfirm { network_specifier: "ns".to_owned() },
        cancel.clone(),
    );
    cancel.cancel();

    sender.send_command(Command::EnableUsage);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = RecordingSink {
        deferred: std::collections::VecDeque::new(),
        seen: seen.clone(),
        shutdown_after: 1,
        shutdown,
    };
    dispatcher.run(&mut sink).await;
    assert_eq!(seen.lock().unwrap().clone(), vec!["enable_usage".to_owned()]);
}
