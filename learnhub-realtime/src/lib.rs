#![cfg_attr(not(test), forbid(unsafe_code))]

//! Realtime interaction and synchronization layer.
//!
//! A [`SyncEngine`] keeps a live view of server state (chat history, Q&A
//! votes and answers, notifications) over a STOMP-over-WebSocket session while
//! the UI applies optimistic mutations that are later confirmed or rolled
//! back. All state is owned by the engine and mutated from a single task.

pub mod aggregator;
pub mod backoff;
pub mod connection;
pub mod credentials;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod feed;
pub mod reconciler;
pub mod registry;
pub mod rest;
pub mod session;
pub mod transport;

pub use aggregator::{AggregateCounter, VoteAggregator};
pub use connection::ConnectionManager;
pub use credentials::{CredentialProvider, EnvCredentials, StaticCredentials};
pub use dispatcher::{EventDispatcher, Inbound, TopicUpdate};
pub use engine::{MutationOutcome, MutationTicket, SyncEngine, TopicSubscription};
pub use error::{SyncError, SyncResult};
pub use feed::{FeedWindow, InsertOutcome, Item};
pub use reconciler::{MutationReconciler, MutationStatus, PendingMutation};
pub use registry::{Release, SubscriptionHandle, SubscriptionRegistry, WireOp};
pub use rest::{HttpRestClient, RestClient};
pub use session::{ConnectionState, Session};
