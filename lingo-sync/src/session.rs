//! Session wiring for the shared data sources
//!
//! `DataSources` is built once per process and handed to consumers by `Arc`.
//! The component owning the user session calls `on_login` / `on_logout`;
//! nothing else starts or stops subscriptions.

use std::sync::Arc;

use lingo_common::config::TomlConfig;
use lingo_common::events::EventBus;
use lingo_common::remote::RemoteCollectionClient;
use lingo_common::Result;
use tracing::info;

use crate::domains::{
    FriendsDataSource, FriendsDomain, HistoryDataSource, SettingsDataSource, SettingsDomain,
};

/// One data source per domain, sharing a remote client and event bus
pub struct DataSources {
    pub history: HistoryDataSource,
    pub friends: FriendsDataSource,
    pub settings: SettingsDataSource,
    events: EventBus,
}

impl DataSources {
    /// Build all data sources with a fresh event bus sized from `config`
    pub fn new(client: Arc<dyn RemoteCollectionClient>, config: &TomlConfig) -> Self {
        Self::with_event_bus(client, config, EventBus::new(config.events.capacity))
    }

    pub fn with_event_bus(
        client: Arc<dyn RemoteCollectionClient>,
        config: &TomlConfig,
        events: EventBus,
    ) -> Self {
        Self {
            history: HistoryDataSource::new(
                Arc::clone(&client),
                events.clone(),
                config.retry.to_policy(),
                config.history.row_limit,
            ),
            friends: FriendsDataSource::new(FriendsDomain, Arc::clone(&client), events.clone()),
            settings: SettingsDataSource::new(SettingsDomain, client, events.clone()),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start (or reuse) every subscription for `user_id`
    pub async fn on_login(&self, user_id: &str) -> Result<()> {
        self.history.start_observing(user_id).await?;
        self.friends.start_observing(user_id, ()).await?;
        self.settings.start_observing(user_id, ()).await?;
        info!(user_id = user_id.trim(), "Session data sources started");
        Ok(())
    }

    /// Stop every subscription; all are torn down when this returns
    pub async fn on_logout(&self) {
        tokio::join!(
            self.history.stop_observing(),
            self.friends.stop_observing(),
            self.settings.stop_observing(),
        );
        info!("Session data sources stopped");
    }
}
