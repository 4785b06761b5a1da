//! Friends domain
//!
//! Live subscription on `users/{uid}/friends`, ordered by display name.
//! The derived scalars drive the friends badge: pending incoming requests and
//! whether anything is unseen (a pending request or unread messages).

use lingo_common::remote::{Direction, Query, Snapshot};
use serde::{Deserialize, Serialize};

use super::decode_documents;
use crate::data_source::{DataDomain, SharedDataSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendStatus {
    Accepted,
    /// Request received, awaiting our answer
    PendingIncoming,
    /// Request sent, awaiting theirs
    PendingOutgoing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRecord {
    /// Friend's user id (the document id)
    #[serde(default, skip_serializing)]
    pub user_id: String,
    pub display_name: String,
    pub status: FriendStatus,
    #[serde(default)]
    pub unread_count: u32,
    /// Epoch milliseconds of the last chat message, if any
    #[serde(default)]
    pub last_message_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FriendsValue {
    pub friends: Vec<FriendRecord>,
    pub pending_requests: usize,
    pub has_unseen: bool,
}

impl FriendsValue {
    pub fn from_records(friends: Vec<FriendRecord>) -> Self {
        let pending_requests = friends
            .iter()
            .filter(|f| f.status == FriendStatus::PendingIncoming)
            .count();
        let has_unseen = pending_requests > 0 || friends.iter().any(|f| f.unread_count > 0);
        Self {
            friends,
            pending_requests,
            has_unseen,
        }
    }
}

pub fn friends_collection(user_id: &str) -> String {
    format!("users/{}/friends", user_id)
}

pub struct FriendsDomain;

impl DataDomain for FriendsDomain {
    const NAME: &'static str = "friends";
    type Params = ();
    type Value = FriendsValue;

    fn query(&self, user_id: &str, _params: &()) -> Query {
        Query::collection(friends_collection(user_id)).order_by("displayName", Direction::Ascending)
    }

    fn decode(&self, snapshot: &Snapshot) -> FriendsValue {
        let friends = decode_documents(Self::NAME, snapshot, |record: &mut FriendRecord, id| {
            record.user_id = id.to_string()
        });
        FriendsValue::from_records(friends)
    }
}

pub type FriendsDataSource = SharedDataSource<FriendsDomain>;

impl SharedDataSource<FriendsDomain> {
    /// Cached friends with an accepted request
    pub fn accepted(&self) -> Vec<FriendRecord> {
        self.filter_cached(|f| f.status == FriendStatus::Accepted)
    }

    /// Cached requests waiting for our answer
    pub fn pending_incoming(&self) -> Vec<FriendRecord> {
        self.filter_cached(|f| f.status == FriendStatus::PendingIncoming)
    }

    pub fn filter_cached(&self, predicate: impl Fn(&FriendRecord) -> bool) -> Vec<FriendRecord> {
        self.with_value(|value| value.friends.iter().filter(|f| predicate(f)).cloned().collect())
    }

    pub fn count_matching(&self, predicate: impl Fn(&FriendRecord) -> bool) -> usize {
        self.with_value(|value| value.friends.iter().filter(|f| predicate(f)).count())
    }
}
