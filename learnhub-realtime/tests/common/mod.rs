#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use realtime::{
    RestClient, StaticCredentials, SyncEngine, SyncError, SyncResult,
    transport::{ConnectRequest, Connector, MemoryServer, TransportLink},
};
use shared::{
    config::Config,
    models::{
        CounterPayload, DomainEvent, EventEnvelope, FeedEntry, MessageDeletedPayload,
        MessagePayload, MutationAck, MutationRequest, NotificationPayload, Page, Topic,
    },
};
use tokio::sync::{mpsc, watch};

pub const TOKEN: &str = "token";
pub const USER: &str = "user9";

/// Scriptable REST collaborator.
#[derive(Debug)]
pub struct FakeRest {
    submissions: Mutex<Vec<(Topic, MutationRequest)>>,
    failures: Mutex<VecDeque<SyncError>>,
    pages: Mutex<VecDeque<Page>>,
    page_requests: Mutex<Vec<(Topic, Option<String>, u32)>>,
    gate: watch::Sender<bool>,
}

impl Default for FakeRest {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            submissions: Mutex::default(),
            failures: Mutex::default(),
            pages: Mutex::default(),
            page_requests: Mutex::default(),
            gate,
        }
    }
}

impl FakeRest {
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn queue_page(&self, page: Page) {
        self.pages.lock().unwrap().push_back(page);
    }

    /// Holds every submission until [`FakeRest::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn submissions(&self) -> Vec<(Topic, MutationRequest)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn page_requests(&self) -> Vec<(Topic, Option<String>, u32)> {
        self.page_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RestClient for FakeRest {
    async fn submit(&self, topic: &Topic, request: &MutationRequest) -> SyncResult<MutationAck> {
        self.submissions
            .lock()
            .unwrap()
            .push((topic.clone(), request.clone()));
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open).await.unwrap();

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(MutationAck {
            id: None,
            correlation_id: Some(request.correlation_id()),
            server_sequence: None,
        })
    }

    async fn load_page(
        &self,
        topic: &Topic,
        before: Option<&str>,
        limit: u32,
    ) -> SyncResult<Page> {
        self.page_requests
            .lock()
            .unwrap()
            .push((topic.clone(), before.map(str::to_string), limit));
        Ok(self.pages.lock().unwrap().pop_front().unwrap_or(Page {
            items: Vec::new(),
            next_cursor: None,
        }))
    }
}

/// Connector whose single link replays whatever the test feeds it,
/// errors included. Outbound frames are discarded.
#[derive(Debug)]
pub struct ScriptedConnector {
    inbound: Mutex<Option<mpsc::UnboundedReceiver<SyncResult<String>>>>,
}

impl ScriptedConnector {
    pub fn new() -> (mpsc::UnboundedSender<SyncResult<String>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                inbound: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _request: &ConnectRequest) -> SyncResult<Box<dyn TransportLink>> {
        let inbound = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SyncError::transport("script already used"))?;
        Ok(Box::new(ScriptedLink { inbound }))
    }
}

struct ScriptedLink {
    inbound: mpsc::UnboundedReceiver<SyncResult<String>>,
}

#[async_trait]
impl TransportLink for ScriptedLink {
    async fn send_text(&mut self, _text: String) -> SyncResult<()> {
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<SyncResult<String>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {}
}

pub struct Harness {
    pub engine: SyncEngine,
    pub server: MemoryServer,
    pub rest: Arc<FakeRest>,
    pub credentials: Arc<StaticCredentials>,
}

pub fn config() -> Config {
    let mut config = Config::with_defaults();
    config.reconnect.jitter = 0.0;
    config
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: Config) -> Harness {
    let server = MemoryServer::new(TOKEN);
    let rest = Arc::new(FakeRest::default());
    let credentials = Arc::new(StaticCredentials::new(TOKEN));
    let engine = SyncEngine::new(
        config,
        Arc::new(server.connector()),
        credentials.clone(),
        rest.clone(),
    );
    Harness {
        engine,
        server,
        rest,
        credentials,
    }
}

pub async fn connected() -> Harness {
    let mut harness = harness();
    harness.engine.connect(USER).await.unwrap();
    harness
}

/// Steps the engine until nothing happens for a short while.
pub async fn pump(engine: &mut SyncEngine) {
    while let Ok(result) = tokio::time::timeout(Duration::from_millis(20), engine.step()).await {
        result.unwrap();
    }
}

pub fn message(id: &str, body: &str) -> MessagePayload {
    MessagePayload {
        id: id.into(),
        author_id: None,
        body: body.to_string(),
        created_at: None,
    }
}

pub fn message_created(topic: &Topic, seq: u64, id: &str, body: &str) -> EventEnvelope {
    EventEnvelope::new(
        topic.clone(),
        seq,
        DomainEvent::MessageCreated {
            payload: message(id, body),
        },
    )
}

pub fn answer_created(topic: &Topic, seq: u64, id: &str, body: &str) -> EventEnvelope {
    EventEnvelope::new(
        topic.clone(),
        seq,
        DomainEvent::AnswerCreated {
            payload: message(id, body),
        },
    )
}

pub fn message_edited(topic: &Topic, seq: u64, id: &str, body: &str) -> EventEnvelope {
    EventEnvelope::new(
        topic.clone(),
        seq,
        DomainEvent::MessageEdited {
            payload: message(id, body),
        },
    )
}

pub fn message_deleted(topic: &Topic, seq: u64, id: &str) -> EventEnvelope {
    EventEnvelope::new(
        topic.clone(),
        seq,
        DomainEvent::MessageDeleted {
            payload: MessageDeletedPayload { id: id.into() },
        },
    )
}

pub fn vote_changed(
    topic: &Topic,
    seq: u64,
    entity: &str,
    count: i64,
    version: Option<u64>,
) -> EventEnvelope {
    EventEnvelope::new(
        topic.clone(),
        seq,
        DomainEvent::VoteChanged {
            payload: CounterPayload {
                entity_id: entity.into(),
                count,
                version,
                reaction: None,
            },
        },
    )
}

pub fn notification(topic: &Topic, seq: u64, id: &str, unread: i64) -> EventEnvelope {
    EventEnvelope::new(
        topic.clone(),
        seq,
        DomainEvent::NotificationCreated {
            payload: NotificationPayload {
                id: id.into(),
                kind: "answer".to_string(),
                summary: format!("notification {id}"),
                unread_count: Some(unread),
                created_at: None,
            },
        },
    )
}

pub fn entry(id: &str, seq: u64) -> FeedEntry {
    FeedEntry {
        id: id.into(),
        server_sequence: seq,
        author_id: None,
        body: format!("history {id}"),
        deleted: false,
        created_at: None,
    }
}
