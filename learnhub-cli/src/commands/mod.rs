//! Subcommand handlers and the helpers they share.

pub mod completion;
pub mod config;
pub mod follow;
pub mod history;
pub mod mutate;

use std::sync::Arc;

use anyhow::{Context, Result};
use realtime::{EnvCredentials, Item, SyncEngine, TopicUpdate};
use shared::{
    config::Config,
    models::{DomainEvent, Topic},
};

/// Environment variable holding the bearer token.
pub const TOKEN_VARIABLE: &str = "LEARNHUB_TOKEN";

/// User id presented in the session when `--user` is not given.
pub const DEFAULT_USER: &str = "me";

pub fn build_engine(config: Config) -> SyncEngine {
    SyncEngine::over_websocket(config, Arc::new(EnvCredentials::new(TOKEN_VARIABLE)))
}

pub async fn connect(config: Config, user: &str) -> Result<SyncEngine> {
    let url = config.server.websocket_url.clone();
    let mut engine = build_engine(config);
    engine
        .connect(user)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    Ok(engine)
}

pub fn render_item(item: &Item) -> String {
    let author = item
        .author_id
        .as_ref()
        .map_or_else(|| "unknown".to_string(), ToString::to_string);
    let mut line = format!("[#{}] {} {author}: ", item.server_sequence, item.id);
    if item.deleted {
        line.push_str("(deleted)");
    } else {
        line.push_str(&item.content);
    }
    if item.is_optimistic {
        line.push_str(" (pending)");
    }
    line
}

pub fn render_update(topic: &Topic, update: &TopicUpdate) -> Option<String> {
    match update {
        TopicUpdate::Event(envelope) => Some(format!(
            "[{topic} #{}] {}",
            envelope.server_sequence,
            describe_event(&envelope.event)
        )),
        TopicUpdate::MutationSettled {
            correlation_id,
            status,
        } => Some(format!(
            "[{topic}] mutation {correlation_id} {}",
            status.as_str()
        )),
        TopicUpdate::HistoryLoaded { added } => {
            Some(format!("[{topic}] loaded {added} older item(s)"))
        }
        TopicUpdate::LocalChange { .. } | TopicUpdate::Connection(_) => None,
    }
}

fn describe_event(event: &DomainEvent) -> String {
    let kind = event.kind().as_str();
    match event {
        DomainEvent::MessageCreated { payload }
        | DomainEvent::MessageEdited { payload }
        | DomainEvent::AnswerCreated { payload } => {
            let author = payload
                .author_id
                .as_ref()
                .map_or_else(|| "unknown".to_string(), ToString::to_string);
            format!("{kind} {} {author}: {}", payload.id, payload.body)
        }
        DomainEvent::MessageDeleted { payload } => format!("{kind} {}", payload.id),
        DomainEvent::VoteChanged { payload } | DomainEvent::ReactionChanged { payload } => {
            let reaction = payload
                .reaction
                .as_deref()
                .map(|reaction| format!(" {reaction}"))
                .unwrap_or_default();
            format!("{kind} {}{reaction} = {}", payload.entity_id, payload.count)
        }
        DomainEvent::NotificationCreated { payload } => {
            let unread = payload
                .unread_count
                .map(|unread| format!(" (unread {unread})"))
                .unwrap_or_default();
            format!("{kind} {}{unread}", payload.summary)
        }
    }
}

#[cfg(test)]
mod tests {
    use realtime::MutationStatus;
    use shared::models::{CorrelationId, CounterPayload, EventEnvelope, FeedEntry};

    use super::*;

    #[test]
    fn items_render_with_state_markers() {
        let mut item = Item::from(FeedEntry {
            id: "m1".into(),
            server_sequence: 4,
            author_id: Some("u2".into()),
            body: "hello".to_string(),
            deleted: false,
            created_at: None,
        });
        assert_eq!(render_item(&item), "[#4] m1 u2: hello");

        item.deleted = true;
        assert_eq!(render_item(&item), "[#4] m1 u2: (deleted)");
    }

    #[test]
    fn vote_events_show_the_new_count() {
        let topic = Topic::question(7);
        let envelope = EventEnvelope::new(
            topic.clone(),
            12,
            DomainEvent::VoteChanged {
                payload: CounterPayload {
                    entity_id: "q1".into(),
                    count: 6,
                    version: Some(3),
                    reaction: None,
                },
            },
        );
        assert_eq!(
            render_update(&topic, &TopicUpdate::Event(envelope)).as_deref(),
            Some("[question:7 #12] vote.changed q1 = 6")
        );
    }

    #[test]
    fn local_changes_are_not_printed() {
        let topic = Topic::conversation(1);
        let update = TopicUpdate::LocalChange {
            correlation_id: CorrelationId::new(),
            kind: shared::models::MutationKind::SendMessage,
        };
        assert!(render_update(&topic, &update).is_none());

        let settled = TopicUpdate::MutationSettled {
            correlation_id: CorrelationId::new(),
            status: MutationStatus::Failed,
        };
        assert!(
            render_update(&topic, &settled)
                .unwrap()
                .ends_with("failed")
        );
    }
}
