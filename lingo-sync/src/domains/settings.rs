//! User settings domain
//!
//! Settings live in a single `preferences` document under
//! `users/{uid}/settings`. A missing or malformed document yields
//! `UserSettings::default()`; missing fields take their defaults.

use lingo_common::remote::{Query, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data_source::{DataDomain, SharedDataSource};

/// Document id holding the preferences
pub const PREFERENCES_DOC: &str = "preferences";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub native_language: String,
    pub learning_language: String,
    /// Speech synthesis rate multiplier
    pub speech_rate: f32,
    /// Speak translations aloud automatically
    pub auto_speak: bool,
    pub theme: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            native_language: "en".to_string(),
            learning_language: "es".to_string(),
            speech_rate: 1.0,
            auto_speak: false,
            theme: "system".to_string(),
        }
    }
}

pub fn settings_collection(user_id: &str) -> String {
    format!("users/{}/settings", user_id)
}

pub struct SettingsDomain;

impl DataDomain for SettingsDomain {
    const NAME: &'static str = "settings";
    type Params = ();
    type Value = UserSettings;

    fn query(&self, user_id: &str, _params: &()) -> Query {
        Query::collection(settings_collection(user_id))
    }

    fn decode(&self, snapshot: &Snapshot) -> UserSettings {
        let Some(doc) = snapshot.documents.iter().find(|d| d.id == PREFERENCES_DOC) else {
            return UserSettings::default();
        };

        doc.decode().unwrap_or_else(|e| {
            warn!(domain = Self::NAME, error = %e, "Malformed preferences document, using defaults");
            UserSettings::default()
        })
    }
}

pub type SettingsDataSource = SharedDataSource<SettingsDomain>;

impl SharedDataSource<SettingsDomain> {
    pub fn settings(&self) -> UserSettings {
        self.with_value(UserSettings::clone)
    }

    /// (native, learning) language codes
    pub fn language_pair(&self) -> (String, String) {
        self.with_value(|s| (s.native_language.clone(), s.learning_language.clone()))
    }
}
