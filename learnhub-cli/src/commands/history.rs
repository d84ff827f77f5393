//! `learnhub history`: prints older items of a topic.

use anyhow::{Context, Result};
use clap::Args;
use shared::{config::Config, models::Topic};

use super::render_item;

#[derive(Args, Debug)]
#[command(about = "Print older items of a topic")]
pub struct HistoryArgs {
    /// Topic to page through, e.g. `conversation:42`
    #[arg(long, short)]
    pub topic: String,

    /// Number of pages to fetch
    #[arg(long, default_value_t = 1)]
    pub pages: u32,
}

/// History comes from the REST API alone; no socket is opened.
pub async fn handle_history(config: Config, args: HistoryArgs) -> Result<()> {
    let topic = Topic::new(args.topic);
    let mut engine = super::build_engine(config);
    let subscription = engine.subscribe(topic.clone()).await;

    for _ in 0..args.pages {
        let added = engine
            .load_older(&topic)
            .await
            .with_context(|| format!("failed to fetch history for {topic}"))?;
        if added.is_empty() {
            break;
        }
    }

    let feed = engine
        .feed(&topic)
        .context("topic released while loading history")?;
    if feed.is_empty() {
        println!("No items on {topic}.");
    }
    for item in feed.items() {
        println!("{}", render_item(item));
    }
    if !feed.has_more() {
        println!("(beginning of {topic})");
    }

    engine.unsubscribe(subscription.handle()).await;
    Ok(())
}
