//! `feedsync`: connect, subscribe and log every event until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use feedsync::shared::EventCategory;
use feedsync::ws::{LifecycleKind, Registration, TungsteniteConnector};
use feedsync::{Identity, SessionCredentials, SyncConfig, SyncManager};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedsync=debug")),
        )
        .init();

    let config = SyncConfig::from_env();
    let actor = std::env::var("FEEDSYNC_ACTOR").context("FEEDSYNC_ACTOR is not set")?;
    let token = std::env::var("FEEDSYNC_TOKEN").context("FEEDSYNC_TOKEN is not set")?;
    let credentials = Arc::new(SessionCredentials::new(Some(Identity::new(actor, token))));

    let manager = SyncManager::init(config, credentials, Arc::new(TungsteniteConnector));
    let handle = manager.handle();

    let mut registrations: Vec<Registration> = EventCategory::ALL
        .iter()
        .map(|category| {
            handle.register(*category, |event| {
                feedsync::log_info!(
                    "{} on {} by {}",
                    event.category(),
                    event.entity_id,
                    event
                        .actor_id
                        .as_ref()
                        .map_or_else(|| "-".to_string(), ToString::to_string)
                );
            })
        })
        .collect();
    for kind in [
        LifecycleKind::ConnectionEstablished,
        LifecycleKind::ConnectionClosed,
        LifecycleKind::AuthRejected,
    ] {
        registrations.push(handle.register_lifecycle(kind, |event| {
            feedsync::log_info!("Lifecycle: {:?}", event);
        }));
    }

    handle.request_connect()?;
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;

    feedsync::log_info!("Shutting down");
    drop(registrations);
    manager.shutdown().await;
    Ok(())
}
