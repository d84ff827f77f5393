//! Integration tests: feeds.
mod common;

use std::sync::Arc;

use common::{
    FakeRest, ScriptedConnector, TOKEN, USER, config, connected, entry, message_created,
    message_deleted, message_edited, notification, pump, vote_changed,
};
use realtime::{
    ConnectionState, StaticCredentials, SyncEngine, SyncError, TopicUpdate,
    aggregator::UNREAD_COUNTER, transport::Frame,
};
use shared::models::{EntityId, Page, Topic};

fn ids(engine: &realtime::SyncEngine, topic: &Topic) -> Vec<String> {
    engine
        .feed(topic)
        .unwrap()
        .items()
        .iter()
        .map(|item| item.id.to_string())
        .collect()
}

#[tokio::test]
async fn events_reach_handlers_in_sequence_order() {
    let mut h = connected().await;
    let topic = Topic::conversation(42);
    let mut sub = h.engine.subscribe(topic.clone()).await;

    for (seq, id) in [(1, "m1"), (2, "m2"), (3, "m3")] {
        h.server.publish(&message_created(&topic, seq, id, "hi"));
    }
    pump(&mut h.engine).await;

    let sequences: Vec<u64> = sub
        .drain()
        .into_iter()
        .filter_map(|update| match update {
            TopicUpdate::Event(envelope) => Some(envelope.server_sequence),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(ids(&h.engine, &topic), ["m1", "m2", "m3"]);
}

#[tokio::test]
async fn replayed_events_are_applied_once() {
    let mut h = connected().await;
    let topic = Topic::question(7);
    let q1 = EntityId::from("q1");
    let mut sub = h.engine.subscribe(topic.clone()).await;

    let created = message_created(&topic, 1, "a1", "answer");
    let voted = vote_changed(&topic, 2, "q1", 4, Some(1));
    for envelope in [&created, &voted, &created, &voted] {
        h.server.publish(envelope);
    }
    pump(&mut h.engine).await;

    assert_eq!(h.engine.feed(&topic).unwrap().len(), 1);
    assert_eq!(h.engine.counter(&topic, &q1).unwrap().displayed(), 4);
    let events = sub
        .drain()
        .into_iter()
        .filter(|update| matches!(update, TopicUpdate::Event(_)))
        .count();
    assert_eq!(events, 2);
}

#[tokio::test]
async fn edits_and_deletes_apply_in_place() {
    let mut h = connected().await;
    let topic = Topic::conversation(42);
    let _sub = h.engine.subscribe(topic.clone()).await;

    h.server.publish(&message_created(&topic, 1, "m1", "frist"));
    h.server.publish(&message_created(&topic, 2, "m2", "second"));
    h.server.publish(&message_edited(&topic, 3, "m1", "first"));
    h.server.publish(&message_deleted(&topic, 4, "m2"));
    pump(&mut h.engine).await;

    let feed = h.engine.feed(&topic).unwrap();
    assert_eq!(ids(&h.engine, &topic), ["m1", "m2"]);
    assert_eq!(feed.items()[0].content, "first");
    assert!(feed.items()[1].deleted);
}

#[tokio::test]
async fn older_pages_merge_without_duplicates() {
    let mut h = connected().await;
    let topic = Topic::conversation(42);
    let mut sub = h.engine.subscribe(topic.clone()).await;

    for seq in 8..=10 {
        h.server
            .publish(&message_created(&topic, seq, &format!("m{seq}"), "live"));
    }
    pump(&mut h.engine).await;
    sub.drain();

    h.rest.queue_page(Page {
        items: (1..=10).map(|seq| entry(&format!("m{seq}"), seq)).collect(),
        next_cursor: Some("m1".to_string()),
    });
    let added = h.engine.load_older(&topic).await.unwrap();
    assert_eq!(added.len(), 7);

    let feed = h.engine.feed(&topic).unwrap();
    assert_eq!(feed.len(), 10);
    let sequences: Vec<u64> = feed.items().iter().map(|item| item.server_sequence).collect();
    assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
    assert_eq!(feed.get(&EntityId::from("m9")).unwrap().content, "live");
    assert_eq!(feed.cursor(), Some("m1"));
    assert_eq!(sub.drain(), vec![TopicUpdate::HistoryLoaded { added: 7 }]);

    // The next page starts from the cursor and is the last one.
    h.rest.queue_page(Page {
        items: Vec::new(),
        next_cursor: None,
    });
    assert!(h.engine.load_older(&topic).await.unwrap().is_empty());
    assert!(!h.engine.feed(&topic).unwrap().has_more());
    assert!(h.engine.load_older(&topic).await.unwrap().is_empty());

    let requests = h.rest.page_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].1, None);
    assert_eq!(requests[1].1.as_deref(), Some("m1"));
    assert_eq!(requests[1].2, h.engine.config().feed.page_size);
}

#[tokio::test]
async fn history_needs_a_subscribed_topic() {
    let mut h = connected().await;
    let topic = Topic::conversation(5);
    assert_eq!(
        h.engine.load_older(&topic).await.unwrap_err(),
        SyncError::NotSubscribed { topic }
    );
}

#[tokio::test]
async fn notifications_update_the_unread_badge() {
    let mut h = connected().await;
    let topic = Topic::notifications(USER);
    let _sub = h.engine.subscribe(topic.clone()).await;

    h.server.publish(&notification(&topic, 1, "n1", 3));
    h.server.publish(&notification(&topic, 2, "n2", 4));
    pump(&mut h.engine).await;

    assert_eq!(ids(&h.engine, &topic), ["n1", "n2"]);
    let badge = h
        .engine
        .counter(&topic, &EntityId::from(UNREAD_COUNTER))
        .unwrap();
    assert_eq!(badge.displayed(), 4);
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let mut h = connected().await;
    let topic = Topic::conversation(42);
    let mut sub = h.engine.subscribe(topic.clone()).await;

    h.server.publish_raw(&topic, "{not json".to_string());
    h.server
        .publish_raw(&topic, r#"{"topic":"conversation:42","serverSequence":1}"#.to_string());
    h.server.current_peer().unwrap().push_raw("BOGUS\n\n\0");
    h.server.publish(&message_created(&topic, 2, "m2", "still here"));
    pump(&mut h.engine).await;

    assert_eq!(ids(&h.engine, &topic), ["m2"]);
    assert_eq!(h.engine.state(), ConnectionState::Connected);
    assert!(sub.drain().iter().all(|update| matches!(update, TopicUpdate::Event(_))));
}

#[tokio::test]
async fn unreadable_transport_frames_keep_the_session() {
    let (frames, connector) = ScriptedConnector::new();
    frames.send(Ok(Frame::connected().encode())).unwrap();
    let mut engine = SyncEngine::new(
        config(),
        Arc::new(connector),
        Arc::new(StaticCredentials::new(TOKEN)),
        Arc::new(FakeRest::default()),
    );
    engine.connect(USER).await.unwrap();
    let topic = Topic::conversation(42);
    let _sub = engine.subscribe(topic.clone()).await;

    frames
        .send(Err(SyncError::malformed("invalid utf-8 sequence")))
        .unwrap();
    engine.step().await.unwrap();
    assert_eq!(engine.state(), ConnectionState::Connected);
    assert_eq!(engine.ref_count(&topic), 1);

    let envelope = message_created(&topic, 1, "m1", "after the bad frame");
    let raw = Frame::message(
        "/topic/conversation:42",
        "sub-0",
        "m-1",
        serde_json::to_string(&envelope).unwrap(),
    );
    frames.send(Ok(raw.encode())).unwrap();
    engine.step().await.unwrap();
    assert_eq!(ids(&engine, &topic), ["m1"]);
    assert_eq!(engine.state(), ConnectionState::Connected);
}
