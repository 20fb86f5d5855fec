//! Named query roles and the typed records that cross the store boundary.
//!
//! Store executors speak in string-keyed rows. Everything the worker reads
//! from them is decoded here into explicit records, so a missing or mistyped
//! column fails fast with [`StoreError::MalformedRow`] instead of surfacing
//! deep inside the expansion loop.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::StoreError;
use crate::core::model::{ActionStatus, ChannelId, ErrataId, OrgId, ServerId};

/// A single result row as returned by a store executor.
pub type Row = Map<String, Value>;

/// Every statement the errata queue issues, by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryName {
    /// Select pending (not yet claimed) queue rows.
    FindCandidates,
    /// Flag a queue row as in progress.
    MarkInProgress,
    /// Select servers subscribed to the channel with auto-update enabled.
    FindAutoupdateServers,
    /// Insert a notification marker for the erratum/channel pair.
    EnqueueNotification,
    /// Delete a queue row.
    DequeueErrata,
    /// Persist an errata action with its recipients.
    InsertErrataAction,
}

impl QueryName {
    /// All query roles, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::FindCandidates,
        Self::MarkInProgress,
        Self::FindAutoupdateServers,
        Self::EnqueueNotification,
        Self::DequeueErrata,
        Self::InsertErrataAction,
    ];

    /// Stable statement name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FindCandidates => "errata_queue_find_candidates",
            Self::MarkInProgress => "errata_in_progress",
            Self::FindAutoupdateServers => "errata_queue_find_autoupdate_servers",
            Self::EnqueueNotification => "errata_queue_enqueue_sat_errata",
            Self::DequeueErrata => "errata_queue_dequeue_errata",
            Self::InsertErrataAction => "errata_action_insert",
        }
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named parameters for one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(Map<String, Value>);

impl QueryParams {
    /// Encode a typed parameter struct.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidParams` if `params` does not serialize to
    /// a JSON object.
    pub fn encode<T: Serialize>(query: QueryName, params: &T) -> Result<Self, StoreError> {
        match serde_json::to_value(params) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(StoreError::InvalidParams {
                query,
                reason: format!("expected an object, got {other}"),
            }),
            Err(e) => Err(StoreError::InvalidParams {
                query,
                reason: e.to_string(),
            }),
        }
    }

    /// Decode into a typed parameter struct (used by store implementations).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidParams` if a required key is missing or
    /// has the wrong type.
    pub fn decode<T: DeserializeOwned>(&self, query: QueryName) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            StoreError::InvalidParams {
                query,
                reason: e.to_string(),
            }
        })
    }

    /// Look up one parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Parameter names present.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Decode every row of a result set into `T`.
///
/// # Errors
///
/// Returns `StoreError::MalformedRow` on the first row missing a required
/// column.
pub fn decode_rows<T: DeserializeOwned>(query: QueryName, rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row)).map_err(|e| StoreError::MalformedRow {
                query,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Addresses one queue row (claim and dequeue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemKeyParams {
    /// Erratum id.
    pub errata_id: ErrataId,
    /// Channel id.
    pub channel_id: ChannelId,
}

/// Parameters for the recipient search.
pub type RecipientParams = ItemKeyParams;

/// Parameters for the notification marker insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationParams {
    /// Erratum id.
    pub errata_id: ErrataId,
    /// Channel id.
    pub channel_id: ChannelId,
    /// Delay before the notification batch may pick the marker up.
    pub minutes: i64,
}

/// Parameters for the candidate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateParams {
    /// Maximum number of rows to return.
    pub limit: usize,
}

/// Parameters for persisting an errata action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParams {
    /// Organization the action is scheduled under.
    pub org_id: OrgId,
    /// Erratum applied by the action.
    pub errata_id: ErrataId,
    /// Servers the action targets.
    pub server_ids: Vec<ServerId>,
    /// Initial status name, if any.
    pub status: Option<String>,
}

impl ActionParams {
    /// Status name of an optional status constant.
    #[must_use]
    pub fn status_name(status: Option<&ActionStatus>) -> Option<String> {
        status.map(|s| s.name.clone())
    }
}

/// One auto-update recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRow {
    /// Server to schedule the erratum on.
    pub server_id: ServerId,
    /// Organization owning the server.
    pub org_id: OrgId,
}

/// Row returned by `InsertErrataAction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertedActionRow {
    /// Id assigned to the new action.
    pub action_id: crate::core::model::ActionId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    #[test]
    fn test_query_names_are_unique() {
        let mut names: Vec<_> = QueryName::ALL.iter().map(|q| q.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), QueryName::ALL.len());
    }

    #[test]
    fn test_decode_recipient_rows() {
        let rows = vec![
            row(json!({"server_id": 1, "org_id": 7})),
            row(json!({"server_id": 2, "org_id": 7, "extra": "ignored"})),
        ];
        let decoded: Vec<RecipientRow> = decode_rows(QueryName::FindAutoupdateServers, rows).unwrap();
        assert_eq!(
            decoded,
            vec![
                RecipientRow { server_id: ServerId(1), org_id: OrgId(7) },
                RecipientRow { server_id: ServerId(2), org_id: OrgId(7) },
            ]
        );
    }

    #[test]
    fn test_decode_fails_fast_on_missing_column() {
        let rows = vec![row(json!({"server_id": 1}))];
        let err = decode_rows::<RecipientRow>(QueryName::FindAutoupdateServers, rows).unwrap_err();
        match err {
            StoreError::MalformedRow { query, reason } => {
                assert_eq!(query, QueryName::FindAutoupdateServers);
                assert!(reason.contains("org_id"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_params_encode_and_decode() {
        let params = QueryParams::encode(
            QueryName::EnqueueNotification,
            &NotificationParams {
                errata_id: ErrataId(100),
                channel_id: ChannelId(5),
                minutes: 0,
            },
        )
        .unwrap();
        assert_eq!(params.get("minutes"), Some(&json!(0)));

        let key: ItemKeyParams = params.decode(QueryName::DequeueErrata).unwrap();
        assert_eq!(key.errata_id, ErrataId(100));
        assert_eq!(key.channel_id, ChannelId(5));
    }

    #[test]
    fn test_params_reject_non_object() {
        let err = QueryParams::encode(QueryName::FindCandidates, &42_u32).unwrap_err();
        assert!(matches!(err, StoreError::InvalidParams { .. }));
    }
}
