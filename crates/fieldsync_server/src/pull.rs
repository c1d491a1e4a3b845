//! Pull: rows updated since a checkpoint.

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{StoredRow, TenantArena};
use chrono::{DateTime, Utc};
use fieldsync_protocol::{format_timestamp, parse_timestamp, PullMeta, PullRequest, PullResponse};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Serves pull requests.
pub struct PullService {
    config: ServerConfig,
    store: Arc<TenantArena>,
    clock: Arc<dyn Clock>,
}

impl PullService {
    /// Creates a pull service.
    pub fn new(config: ServerConfig, store: Arc<TenantArena>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Returns every row with `updated_at > since`, one array per table.
    pub fn pull(&self, request: &PullRequest) -> ServerResult<PullResponse> {
        if request.tenant_id.is_empty() {
            return Err(ServerError::InvalidRequest("tenant_id is required".into()));
        }
        let since = match &request.since {
            Some(value) => parse_timestamp(value)?,
            None => DateTime::<Utc>::UNIX_EPOCH,
        };

        let response = self.store.read(&request.tenant_id, |state| {
            let mut data = BTreeMap::new();
            for kind in &self.config.entity_kinds {
                let rows: Vec<Value> = state
                    .rows(&kind.table)
                    .filter(|(_, row)| row.updated_at > since)
                    .map(|(_, row)| row_to_wire(row))
                    .collect();
                data.insert(kind.table.clone(), rows);
            }
            PullResponse {
                meta: PullMeta {
                    // Taken under the tenant lock: later writes get later timestamps.
                    server_time: format_timestamp(self.clock.now()),
                    since: format_timestamp(since),
                    chain_head: Some(state.chain_head().to_string()),
                },
                data,
            }
        })?;

        debug!(
            tenant = %request.tenant_id,
            rows = response.row_count(),
            since = %response.meta.since,
            "pull served"
        );
        Ok(response)
    }
}

fn row_to_wire(row: &StoredRow) -> Value {
    let mut value = row.data.clone();
    if let Value::Object(fields) = &mut value {
        fields.insert("version".into(), Value::from(row.version));
        fields.insert(
            "updated_at".into(),
            Value::String(format_timestamp(row.updated_at)),
        );
        if row.deleted {
            fields.insert("deleted".into(), Value::Bool(true));
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn setup() -> (PullService, Arc<TenantArena>, Arc<ManualClock>) {
        let store = Arc::new(TenantArena::new());
        store.register_tenant("t1");
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let service = PullService::new(
            ServerConfig::default(),
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (service, store, clock)
    }

    fn put(store: &TenantArena, clock: &ManualClock, id: &str) {
        store
            .transaction::<_, ServerError>("t1", |txn| {
                txn.put_row(
                    "jobs",
                    id,
                    StoredRow {
                        data: json!({"id": id}),
                        version: 1,
                        updated_at: clock.now(),
                        deleted: false,
                    },
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn pull_everything_by_default() {
        let (service, store, clock) = setup();
        put(&store, &clock, "job-1");

        let response = service.pull(&PullRequest::new("t1", None)).unwrap();
        assert_eq!(response.meta.since, "1970-01-01T00:00:00.000Z");
        assert_eq!(response.data["jobs"].len(), 1);
        assert_eq!(response.data["jobs"][0]["version"], 1);
        assert!(response.data["customers"].is_empty());
        assert_eq!(
            response.meta.chain_head.as_deref(),
            Some(fieldsync_protocol::GENESIS_HASH)
        );
    }

    #[test]
    fn checkpoint_filters_older_rows() {
        let (service, store, clock) = setup();
        put(&store, &clock, "job-1");
        let first = service.pull(&PullRequest::new("t1", None)).unwrap();

        clock.advance(chrono::Duration::seconds(5));
        put(&store, &clock, "job-2");

        let second = service
            .pull(&PullRequest::new("t1", Some(first.meta.server_time.clone())))
            .unwrap();
        let ids: Vec<_> = second.data["jobs"].iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("job-2")]);
    }

    #[test]
    fn invalid_requests() {
        let (service, _, _) = setup();
        assert!(service.pull(&PullRequest::new("", None)).is_err());
        assert!(service
            .pull(&PullRequest::new("t1", Some("last tuesday".into())))
            .is_err());
        assert!(matches!(
            service.pull(&PullRequest::new("t9", None)),
            Err(ServerError::UnknownTenant(_))
        ));
    }
}
