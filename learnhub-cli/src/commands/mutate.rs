//! Optimistic mutations: `send`, `answer`, `vote` and `react`.

use anyhow::{Context, Result};
use clap::Args;
use realtime::aggregator::counter_key;
use shared::{
    config::Config,
    models::{EntityId, LocalPayload, Topic},
};
use tracing::info;

use super::DEFAULT_USER;

#[derive(Args, Debug)]
#[command(about = "Post a message to a conversation")]
pub struct SendArgs {
    /// Conversation identifier
    #[arg(long, alias = "conv")]
    pub conversation: String,

    /// Message text
    #[arg()]
    pub text: String,

    /// User id to present in the session
    #[arg(long, default_value = DEFAULT_USER)]
    pub user: String,
}

#[derive(Args, Debug)]
#[command(about = "Post an answer to a question")]
pub struct AnswerArgs {
    /// Question identifier
    #[arg(long)]
    pub question: String,

    /// Answer text
    #[arg()]
    pub text: String,

    /// User id to present in the session
    #[arg(long, default_value = DEFAULT_USER)]
    pub user: String,
}

#[derive(Args, Debug)]
#[command(about = "Vote on a question or answer")]
pub struct VoteArgs {
    /// Question whose topic carries the vote
    #[arg(long)]
    pub question: String,

    /// Entity to vote on (the question itself or one of its answers)
    #[arg(long)]
    pub entity: String,

    /// Cast a downvote instead of an upvote
    #[arg(long)]
    pub down: bool,

    /// User id to present in the session
    #[arg(long, default_value = DEFAULT_USER)]
    pub user: String,
}

#[derive(Args, Debug)]
#[command(about = "Add or remove a reaction")]
pub struct ReactArgs {
    /// Topic the entity lives on, e.g. `conversation:42`
    #[arg(long, short)]
    pub topic: String,

    /// Entity to react to
    #[arg(long)]
    pub entity: String,

    /// Reaction name, e.g. `thumbs_up`
    #[arg(long, short)]
    pub reaction: String,

    /// Remove the reaction instead of adding it
    #[arg(long)]
    pub undo: bool,

    /// User id to present in the session
    #[arg(long, default_value = DEFAULT_USER)]
    pub user: String,
}

pub async fn handle_send(config: Config, args: SendArgs) -> Result<()> {
    let topic = Topic::conversation(&args.conversation);
    apply_and_wait(config, &args.user, topic, LocalPayload::Message { body: args.text }).await
}

pub async fn handle_answer(config: Config, args: AnswerArgs) -> Result<()> {
    let topic = Topic::question(&args.question);
    apply_and_wait(config, &args.user, topic, LocalPayload::Answer { body: args.text }).await
}

pub async fn handle_vote(config: Config, args: VoteArgs) -> Result<()> {
    let topic = Topic::question(&args.question);
    let payload = LocalPayload::Vote {
        entity_id: EntityId::new(args.entity),
        delta: if args.down { -1 } else { 1 },
    };
    apply_and_wait(config, &args.user, topic, payload).await
}

pub async fn handle_react(config: Config, args: ReactArgs) -> Result<()> {
    let payload = LocalPayload::Reaction {
        entity_id: EntityId::new(args.entity),
        reaction: args.reaction,
        delta: if args.undo { -1 } else { 1 },
    };
    apply_and_wait(config, &args.user, Topic::new(args.topic), payload).await
}

/// Applies the mutation optimistically and drives the engine until the
/// server confirms it, rejects it, or the reconciliation window closes.
async fn apply_and_wait(
    config: Config,
    user: &str,
    topic: Topic,
    payload: LocalPayload,
) -> Result<()> {
    let mut engine = super::connect(config, user).await?;
    let subscription = engine.subscribe(topic.clone()).await;

    let kind = payload.kind();
    let counter = match &payload {
        LocalPayload::Vote { entity_id, .. } => Some(counter_key(entity_id, None)),
        LocalPayload::Reaction {
            entity_id,
            reaction,
            ..
        } => Some(counter_key(entity_id, Some(reaction))),
        LocalPayload::Message { .. } | LocalPayload::Answer { .. } => None,
    };
    let mut ticket = engine
        .apply(&topic, payload)
        .with_context(|| format!("failed to apply {kind} on {topic}"))?;
    info!(correlation_id = %ticket.correlation_id(), topic = %topic, "mutation submitted");

    let outcome = engine.settle(&mut ticket).await;
    let displayed = counter
        .as_ref()
        .and_then(|entity_id| engine.counter(&topic, entity_id))
        .map(realtime::AggregateCounter::displayed);

    engine.unsubscribe(subscription.handle()).await;
    engine.disconnect().await;

    let status = outcome.with_context(|| format!("{kind} on {topic} was not confirmed"))?;
    match displayed {
        Some(count) => println!(
            "{kind} {} on {topic} (count now {count})",
            status.as_str()
        ),
        None => println!("{kind} {} on {topic}", status.as_str()),
    }
    Ok(())
}
