//! Wire models exchanged with the LearnHub server over STOMP and REST.

pub mod envelope;
pub mod events;
pub mod mutations;
pub mod timestamp;
pub mod topic;

pub use envelope::{ApiEnvelope, EnvelopeError, FeedEntry, Page};
pub use events::{
    CorrelationId, CounterPayload, DomainEvent, EntityId, EventEnvelope, EventKind,
    MessageDeletedPayload, MessagePayload, NotificationPayload,
};
pub use mutations::{
    CastVoteRequest, CreateAnswerRequest, CreateMessageRequest, LocalPayload, MutationAck,
    MutationKind, MutationRequest, ReactRequest,
};
pub use timestamp::Timestamp;
pub use topic::{Topic, TopicKind};
