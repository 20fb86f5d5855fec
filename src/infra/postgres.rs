//! Postgres statement catalog and schema for the errata queue.
//!
//! This crate does not ship a database driver. External executors bind the
//! statements below, passing parameters in the listed order, and return rows
//! whose column names match the typed records in [`crate::core::rows`].

use crate::core::rows::QueryName;

/// One SQL statement and its positional parameter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    /// Query role.
    pub query: QueryName,
    /// SQL text with `$n` placeholders.
    pub sql: &'static str,
    /// Parameter name for each placeholder, in order.
    pub params: &'static [&'static str],
}

/// Statement for `query`.
#[must_use]
pub const fn statement(query: QueryName) -> Statement {
    match query {
        QueryName::FindCandidates => Statement {
            query,
            sql: r"
SELECT errata_id, channel_id, org_id
  FROM rhnErrataQueue
 WHERE in_progress = 0
 ORDER BY created
 LIMIT $1",
            params: &["limit"],
        },
        QueryName::MarkInProgress => Statement {
            query,
            sql: r"
UPDATE rhnErrataQueue
   SET in_progress = 1
 WHERE errata_id = $1
   AND channel_id = $2",
            params: &["errata_id", "channel_id"],
        },
        QueryName::FindAutoupdateServers => Statement {
            query,
            sql: r"
SELECT DISTINCT S.id AS server_id, S.org_id
  FROM rhnServer S
  JOIN rhnServerChannel SC ON SC.server_id = S.id
  JOIN rhnServerNeededErrataCache SNEC ON SNEC.server_id = S.id
 WHERE SNEC.errata_id = $1
   AND SC.channel_id = $2
   AND S.auto_update = 'Y'",
            params: &["errata_id", "channel_id"],
        },
        QueryName::EnqueueNotification => Statement {
            query,
            sql: r"
INSERT INTO rhnErrataNotificationQueue (errata_id, channel_id, next_action, org_id)
SELECT $1, $2, current_timestamp + ($3 || ' minutes')::interval, C.org_id
  FROM rhnChannel C
 WHERE C.id = $2",
            params: &["errata_id", "channel_id", "minutes"],
        },
        QueryName::DequeueErrata => Statement {
            query,
            sql: r"
DELETE FROM rhnErrataQueue
 WHERE errata_id = $1
   AND channel_id = $2",
            params: &["errata_id", "channel_id"],
        },
        QueryName::InsertErrataAction => Statement {
            query,
            sql: r"
WITH action AS (
    INSERT INTO rhnAction (org_id, errata_id, status)
    VALUES ($1, $2, $4)
    RETURNING id
), recipients AS (
    INSERT INTO rhnServerAction (server_id, action_id)
    SELECT server_id, (SELECT id FROM action) FROM unnest($3::bigint[]) AS server_id
)
SELECT id AS action_id FROM action",
            params: &["org_id", "errata_id", "server_ids", "status"],
        },
    }
}

/// Every statement, in lifecycle order.
#[must_use]
pub fn statements() -> Vec<Statement> {
    QueryName::ALL.iter().copied().map(statement).collect()
}

/// Migration statements for the queue tables.
#[must_use]
pub const fn migrations() -> &'static [&'static str] {
    &[
        r"
CREATE TABLE IF NOT EXISTS rhnErrataQueue (
    errata_id   BIGINT NOT NULL,
    channel_id  BIGINT NOT NULL,
    org_id      BIGINT NOT NULL,
    in_progress SMALLINT NOT NULL DEFAULT 0,
    created     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (errata_id, channel_id)
);
CREATE INDEX IF NOT EXISTS idx_errata_queue_pending ON rhnErrataQueue (in_progress, created);
",
        r"
CREATE TABLE IF NOT EXISTS rhnErrataNotificationQueue (
    errata_id   BIGINT NOT NULL,
    channel_id  BIGINT NOT NULL,
    org_id      BIGINT NOT NULL,
    next_action TIMESTAMPTZ,
    created     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_errata_notification_next ON rhnErrataNotificationQueue (next_action);
",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ChannelId, ErrataId, OrgId, ServerId};
    use crate::core::rows::{
        ActionParams, CandidateParams, ItemKeyParams, NotificationParams, QueryParams,
    };

    fn param_names(params: &QueryParams) -> Vec<&str> {
        let mut names: Vec<_> = params.names().collect();
        names.sort_unstable();
        names
    }

    fn sorted(names: &[&'static str]) -> Vec<&'static str> {
        let mut names = names.to_vec();
        names.sort_unstable();
        names
    }

    #[test]
    fn test_every_query_has_a_statement() {
        let all = statements();
        assert_eq!(all.len(), QueryName::ALL.len());
        for stmt in all {
            assert!(!stmt.sql.trim().is_empty(), "{}", stmt.query);
            for n in 1..=stmt.params.len() {
                assert!(stmt.sql.contains(&format!("${n}")), "{} lacks ${n}", stmt.query);
            }
        }
    }

    #[test]
    fn test_param_names_match_typed_params() {
        let key = ItemKeyParams {
            errata_id: ErrataId(1),
            channel_id: ChannelId(2),
        };
        let cases = [
            (
                QueryName::FindCandidates,
                QueryParams::encode(QueryName::FindCandidates, &CandidateParams { limit: 1 }).unwrap(),
            ),
            (QueryName::MarkInProgress, QueryParams::encode(QueryName::MarkInProgress, &key).unwrap()),
            (
                QueryName::FindAutoupdateServers,
                QueryParams::encode(QueryName::FindAutoupdateServers, &key).unwrap(),
            ),
            (
                QueryName::EnqueueNotification,
                QueryParams::encode(
                    QueryName::EnqueueNotification,
                    &NotificationParams {
                        errata_id: ErrataId(1),
                        channel_id: ChannelId(2),
                        minutes: 0,
                    },
                )
                .unwrap(),
            ),
            (QueryName::DequeueErrata, QueryParams::encode(QueryName::DequeueErrata, &key).unwrap()),
            (
                QueryName::InsertErrataAction,
                QueryParams::encode(
                    QueryName::InsertErrataAction,
                    &ActionParams {
                        org_id: OrgId(7),
                        errata_id: ErrataId(1),
                        server_ids: vec![ServerId(3)],
                        status: None,
                    },
                )
                .unwrap(),
            ),
        ];
        for (query, params) in cases {
            assert_eq!(param_names(&params), sorted(statement(query).params), "{query}");
        }
    }

    #[test]
    fn test_migrations_create_queue_tables() {
        let ddl = migrations().join("\n");
        assert!(ddl.contains("rhnErrataQueue"));
        assert!(ddl.contains("rhnErrataNotificationQueue"));
    }
}
