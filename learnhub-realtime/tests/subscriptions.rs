//! Integration tests: subscriptions.
mod common;

use std::collections::BTreeSet;

use common::{connected, harness, pump, USER};
use realtime::{ConnectionState, TopicUpdate, transport::Command};
use shared::models::Topic;

fn destinations(peer: &realtime::transport::MemoryPeer) -> BTreeSet<String> {
    peer.active_subscriptions().into_values().collect()
}

#[tokio::test]
async fn shared_topics_go_on_the_wire_once() {
    let mut h = connected().await;
    let topic = Topic::conversation(42);

    let first = h.engine.subscribe(topic.clone()).await;
    let second = h.engine.subscribe(topic.clone()).await;
    assert_eq!(h.engine.ref_count(&topic), 2);

    let peer = h.server.current_peer().unwrap();
    assert_eq!(peer.received_commands(Command::Subscribe).len(), 1);

    h.engine.unsubscribe(first.handle()).await;
    assert_eq!(peer.received_commands(Command::Unsubscribe).len(), 0);
    assert!(h.engine.feed(&topic).is_some());

    h.engine.unsubscribe(second.handle()).await;
    h.engine.unsubscribe(second.handle()).await;
    assert_eq!(peer.received_commands(Command::Unsubscribe).len(), 1);
    assert_eq!(h.engine.ref_count(&topic), 0);
    assert!(h.engine.feed(&topic).is_none());
}

#[tokio::test]
async fn dropped_subscriptions_release_their_topic() {
    let mut h = connected().await;
    let topic = Topic::conversation(5);
    let _kept = h.engine.subscribe(Topic::question(6)).await;
    {
        let _sub = h.engine.subscribe(topic.clone()).await;
        assert_eq!(h.engine.ref_count(&topic), 1);
    }
    pump(&mut h.engine).await;

    assert_eq!(h.engine.ref_count(&topic), 0);
    assert!(h.engine.feed(&topic).is_none());
    let peer = h.server.current_peer().unwrap();
    assert_eq!(peer.received_commands(Command::Unsubscribe).len(), 1);
    assert_eq!(
        destinations(&peer),
        BTreeSet::from(["/topic/question:6".to_string()])
    );
}

#[tokio::test]
async fn dropped_subscriptions_are_collected_before_the_next_subscribe() {
    let mut h = connected().await;
    let topic = Topic::conversation(5);
    drop(h.engine.subscribe(topic.clone()).await);

    let _other = h.engine.subscribe(Topic::conversation(8)).await;
    assert_eq!(h.engine.ref_count(&topic), 0);
    assert!(h.engine.feed(&topic).is_none());
}

#[tokio::test]
async fn subscriptions_made_before_connecting_are_flushed() {
    let mut h = harness();
    let questions = Topic::question(7);
    let _sub = h.engine.subscribe(questions.clone()).await;
    assert_eq!(h.server.connections(), 0);

    h.engine.connect(USER).await.unwrap();

    let peer = h.server.current_peer().unwrap();
    assert_eq!(
        destinations(&peer),
        BTreeSet::from(["/topic/question:7".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_restores_only_live_topics() {
    let mut h = connected().await;
    let a = Topic::conversation(1);
    let b = Topic::question(2);
    let c = Topic::conversation(3);
    let d = Topic::question(4);

    let mut sub_a = h.engine.subscribe(a.clone()).await;
    let _sub_b = h.engine.subscribe(b.clone()).await;
    let sub_c = h.engine.subscribe(c.clone()).await;
    let sub_d = h.engine.subscribe(d.clone()).await;
    h.engine.unsubscribe(sub_c.handle()).await;

    h.server.drop_connection();
    h.engine.step().await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Reconnecting);

    // Released while offline: nothing to send, nothing to restore.
    h.engine.unsubscribe(sub_d.handle()).await;

    h.engine.step().await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Connected);
    assert_eq!(h.server.connections(), 2);

    let peer = h.server.current_peer().unwrap();
    assert_eq!(
        destinations(&peer),
        BTreeSet::from([a.destination("/topic/"), b.destination("/topic/")])
    );

    let states: Vec<_> = sub_a
        .drain()
        .into_iter()
        .filter_map(|update| match update {
            TopicUpdate::Connection(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![ConnectionState::Reconnecting, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn refused_reconnects_back_off_and_retry() {
    let mut h = connected().await;
    let topic = Topic::notifications(USER);
    let _sub = h.engine.subscribe(topic.clone()).await;

    h.server.refuse_next(2);
    h.server.drop_connection();

    let lost_at = tokio::time::Instant::now();
    h.engine.step().await.unwrap();
    h.engine.step().await.unwrap();
    h.engine.step().await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Reconnecting);

    h.engine.step().await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Connected);
    // 500 + 1000 + 2000 with no jitter.
    assert!(lost_at.elapsed() >= std::time::Duration::from_millis(3_500));
    assert!(h.engine.session().unwrap().last_error().is_none());

    let peer = h.server.current_peer().unwrap();
    assert_eq!(peer.active_subscriptions().len(), 1);
}

#[tokio::test]
async fn events_for_released_topics_are_dropped() {
    let mut h = connected().await;
    let topic = Topic::conversation(42);
    let sub = h.engine.subscribe(topic.clone()).await;
    h.engine.unsubscribe(sub.handle()).await;

    h.server
        .publish(&common::message_created(&topic, 1, "m1", "late"));
    pump(&mut h.engine).await;

    assert!(h.engine.feed(&topic).is_none());
    assert_eq!(h.engine.state(), ConnectionState::Connected);
}
