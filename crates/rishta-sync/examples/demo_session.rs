//! Headless demo: two participants on the in-process store, one full
//! conversation round-trip with presence and typing.
//!
//! Run with `cargo run -p rishta-sync --example demo_session`.

use std::sync::Arc;

use uuid::Uuid;

use rishta_presence::{PresenceTracker, Visibility};
use rishta_remote::MemoryStore;
use rishta_sync::Synchronizer;
use rishta_types::models::Counterpart;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rishta=debug,info".into()),
        )
        .init();

    let store = Arc::new(MemoryStore::new());

    let amira = Counterpart {
        id: Uuid::new_v4(),
        display_name: "Amira".to_string(),
        verified: true,
    };
    let bilal = Counterpart {
        id: Uuid::new_v4(),
        display_name: "Bilal".to_string(),
        verified: false,
    };
    let conversation = store.create_pair(amira.clone(), bilal.clone());

    // Two sessions against the same backend.
    let presence_a = PresenceTracker::new(store.clone(), amira.id);
    let sync_a = Synchronizer::new(store.clone(), presence_a.clone(), amira.id);
    let presence_b = PresenceTracker::new(store.clone(), bilal.id);
    let sync_b = Synchronizer::new(store.clone(), presence_b.clone(), bilal.id);

    presence_a.start_tracking().await;
    presence_b.start_tracking().await;
    sync_a.start().await;
    sync_b.start().await;

    // Amira opens the conversation and sends a message.
    sync_a.load_conversations().await?;
    sync_a.open_conversation(conversation).await?;
    presence_a.start_typing(conversation).await;
    sync_a.set_draft("Salaam, how was your trip?").await;
    let sent = sync_a.send_draft().await?;
    println!(
        "amira sent {:?} -> delivery: {:?}",
        sent.content,
        sent.delivery_state()
    );

    // Bilal sees the unread badge, then opens the conversation.
    sync_b.load_conversations().await?;
    let before = sync_b.state().await;
    println!(
        "bilal's list: {} unread from {}",
        before.conversations[0].unread_count,
        before.conversations[0].counterpart_display().display_name
    );
    sync_b.open_conversation(conversation).await?;

    // Give the push listeners a moment to settle.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let after_a = sync_a.state().await;
    println!(
        "amira's message now: {:?}",
        after_a.messages[0].delivery_state()
    );

    // Presence round-trip.
    if let Some(snapshot) = presence_b.status_of(amira.id).await {
        println!("amira is: {}", snapshot.last_active_label());
    }
    presence_a.set_visibility(Visibility::Hidden).await;
    if let Some(snapshot) = presence_b.status_of(amira.id).await {
        println!("amira after tabbing away: {:?}", snapshot.state);
    }

    presence_a.stop_tracking().await;
    presence_b.stop_tracking().await;
    sync_a.shutdown().await;
    sync_b.shutdown().await;
    Ok(())
}
