//! Data domains served by shared data sources
//!
//! Each domain maps a user to a remote collection query and decodes snapshots
//! into the value its observers see. Documents that fail to decode are
//! skipped with a warning rather than failing the whole snapshot.

pub mod friends;
pub mod history;
pub mod settings;

pub use friends::{FriendRecord, FriendStatus, FriendsDataSource, FriendsDomain, FriendsValue};
pub use history::{
    HistoryDataSource, HistoryDomain, HistoryValue, LanguageCounts, TranslationRecord,
};
pub use settings::{SettingsDataSource, SettingsDomain, UserSettings};

use lingo_common::remote::Snapshot;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Decode every document of `snapshot`, skipping malformed ones
///
/// `with_id` receives each decoded record together with its document id.
pub(crate) fn decode_documents<T, F>(domain: &str, snapshot: &Snapshot, mut with_id: F) -> Vec<T>
where
    T: DeserializeOwned,
    F: FnMut(&mut T, &str),
{
    snapshot
        .documents
        .iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(mut record) => {
                with_id(&mut record, &doc.id);
                Some(record)
            }
            Err(e) => {
                warn!(domain, document_id = %doc.id, error = %e, "Skipping undecodable document");
                None
            }
        })
        .collect()
}
