//! lingo-sync library - shared real-time data sources
//!
//! Each data domain (history, friends, settings) is served by exactly one
//! `SharedDataSource` per process. The source owns at most one remote
//! subscription per logged-in user and fans the latest snapshot out to any
//! number of observers, so independent UI components never open duplicate
//! listeners for the same data.

pub mod data_source;
pub mod domains;
pub mod session;

pub use data_source::{DataDomain, DataState, Phase, SharedDataSource, SubscriptionInfo};
pub use session::DataSources;
