//! `learnhub follow`: streams live updates of one or more topics.

use anyhow::{Context, Result};
use clap::Args;
use shared::{config::Config, models::Topic};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DEFAULT_USER, render_item, render_update};

#[derive(Args, Debug)]
#[command(about = "Follow live updates on one or more topics")]
pub struct FollowArgs {
    /// Topic to follow, e.g. `conversation:42`, `question:7` or `notifications:<user>`
    #[arg(long = "topic", short, required = true)]
    pub topics: Vec<String>,

    /// Print the newest page of history before following
    #[arg(long)]
    pub history: bool,

    /// User id to present in the session
    #[arg(long, default_value = DEFAULT_USER)]
    pub user: String,
}

pub async fn handle_follow(config: Config, args: FollowArgs) -> Result<()> {
    let mut engine = super::connect(config, &args.user).await?;
    let mut states = engine.state_changes();

    let mut subscriptions = Vec::with_capacity(args.topics.len());
    for topic in args.topics {
        subscriptions.push(engine.subscribe(Topic::new(topic)).await);
    }

    if args.history {
        for subscription in &subscriptions {
            let topic = subscription.topic();
            engine
                .load_older(topic)
                .await
                .with_context(|| format!("failed to load history for {topic}"))?;
            if let Some(feed) = engine.feed(topic) {
                for item in feed.items() {
                    println!("[{topic}] {}", render_item(item));
                }
            }
        }
    }

    println!(
        "Following {} topic(s)... (press Ctrl+C to stop)",
        subscriptions.len()
    );

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    let result = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break Ok(()),
            step = engine.step() => {
                if let Err(err) = step {
                    break Err(err);
                }
            }
        }

        if states.has_changed().unwrap_or(false) {
            println!("[connection] {}", *states.borrow_and_update());
        }
        for subscription in &mut subscriptions {
            let topic = subscription.topic().clone();
            for update in subscription.drain() {
                if let Some(line) = render_update(&topic, &update) {
                    println!("{line}");
                }
            }
        }
    };

    debug!("stopping follow");
    engine.disconnect().await;
    result.context("session ended")
}
