//! Work items, typed identifiers, and the entity views the worker consumes.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw numeric value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifier of an erratum (the work item's target).
    ErrataId,
    "errata-"
);
id_type!(
    /// Identifier of a software channel (the work item's scope).
    ChannelId,
    "channel-"
);
id_type!(
    /// Identifier of an organization.
    OrgId,
    "org-"
);
id_type!(
    /// Identifier of a managed server (an action recipient).
    ServerId,
    "server-"
);
id_type!(
    /// Identifier assigned to an action once it is persisted.
    ActionId,
    "action-"
);

/// The (target-id, scope-id) pair that addresses one queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    /// Erratum being rolled out.
    pub errata_id: ErrataId,
    /// Channel the erratum was published into.
    pub channel_id: ChannelId,
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.errata_id, self.channel_id)
    }
}

/// One pending errata queue row awaiting expansion into actions.
///
/// Decoded straight from the candidate query, so the column names double as
/// the serde field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Target of the work (the erratum).
    pub errata_id: ErrataId,
    /// Scope of the work (the channel).
    pub channel_id: ChannelId,
    /// Organization that owns the queue row.
    pub org_id: OrgId,
}

impl WorkItem {
    /// Build a work item from raw ids.
    #[must_use]
    pub const fn new(errata_id: ErrataId, channel_id: ChannelId, org_id: OrgId) -> Self {
        Self {
            errata_id,
            channel_id,
            org_id,
        }
    }

    /// Store key for claim and dequeue.
    #[must_use]
    pub const fn key(&self) -> ItemKey {
        ItemKey {
            errata_id: self.errata_id,
            channel_id: self.channel_id,
        }
    }
}

/// Erratum as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Errata {
    /// Erratum id.
    pub id: ErrataId,
    /// Advisory name, e.g. `RHSA-2024:0001`.
    pub advisory_name: String,
}

/// Channel as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id.
    pub id: ChannelId,
    /// Channel label.
    pub label: String,
}

/// Organization as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    /// Organization id.
    pub id: OrgId,
    /// Display name.
    pub name: String,
}

/// Canonical action status constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStatus {
    /// Numeric status id.
    pub id: i64,
    /// Status name.
    pub name: String,
}

impl ActionStatus {
    /// Name of the status newly scheduled actions start in.
    pub const QUEUED: &'static str = "Queued";

    /// Build a status constant.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// An errata action under construction: created by an action emitter, filled
/// with recipients, then persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionHandle {
    /// Set once the action has been persisted.
    pub id: Option<ActionId>,
    /// Organization the action is scheduled under.
    pub org_id: OrgId,
    /// Erratum the action applies.
    pub errata_id: ErrataId,
    /// Servers the action targets.
    pub recipients: Vec<ServerId>,
    /// Initial status; `None` when the queued constant is unconfigured.
    pub status: Option<ActionStatus>,
}

impl ActionHandle {
    /// Start a new, unpersisted action.
    #[must_use]
    pub const fn new(org_id: OrgId, errata_id: ErrataId, status: Option<ActionStatus>) -> Self {
        Self {
            id: None,
            org_id,
            errata_id,
            recipients: Vec::new(),
            status,
        }
    }
}
