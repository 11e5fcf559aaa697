//! Append-only outcome log and the statistics derived from it.

use crate::domain::{RequestLogEntry, RequestStatistic, StatementLogEntry, StatementStatistic};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub statement_rows: usize,
    pub request_rows: usize,
}

/// Where the delivery worker writes one row per finished batch.
pub trait OutcomeRecorder: Send + Sync {
    fn record_statement(&self, entry: &StatementLogEntry) -> Result<u64, StoreError>;
}

/// Statement-batch and request outcome rows, kept in insertion order.
///
/// Rows are only ever appended or removed by id; nothing is rewritten in
/// place.
#[derive(Clone)]
pub struct OutcomeLog {
    db: sled::Db,
    statements: sled::Tree,
    requests: sled::Tree,
}

impl OutcomeLog {
    pub fn open(db: &sled::Db, statement_tree: &str, request_tree: &str) -> Result<Self, StoreError> {
        Ok(Self {
            db: db.clone(),
            statements: db.open_tree(statement_tree)?,
            requests: db.open_tree(request_tree)?,
        })
    }

    pub fn append_statement(&self, entry: &StatementLogEntry) -> Result<u64, StoreError> {
        self.append(&self.statements, entry)
    }

    pub fn append_request(&self, entry: &RequestLogEntry) -> Result<u64, StoreError> {
        self.append(&self.requests, entry)
    }

    pub fn statement_entries(&self) -> Result<Vec<StatementLogEntry>, StoreError> {
        read_all(&self.statements)
    }

    pub fn request_entries(&self) -> Result<Vec<RequestLogEntry>, StoreError> {
        read_all(&self.requests)
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// One row per distinct code, ascending, with `count` summed.
    pub fn statement_statistics(&self) -> Result<Vec<StatementStatistic>, StoreError> {
        let mut by_code: BTreeMap<Option<u16>, StatementStatistic> = BTreeMap::new();

        for entry in self.statement_entries()? {
            by_code
                .entry(entry.code)
                .and_modify(|stat| stat.total += entry.count)
                .or_insert_with(|| StatementStatistic {
                    code: entry.code,
                    reason: entry.reason.clone(),
                    total: entry.count,
                });
        }

        Ok(by_code.into_values().collect())
    }

    /// One row per distinct code, ascending, counting rows.
    pub fn request_statistics(&self) -> Result<Vec<RequestStatistic>, StoreError> {
        let mut by_code: BTreeMap<Option<u16>, RequestStatistic> = BTreeMap::new();

        for entry in self.request_entries()? {
            by_code
                .entry(entry.code)
                .and_modify(|stat| stat.total += 1)
                .or_insert_with(|| RequestStatistic {
                    code: entry.code,
                    reason: entry.reason.clone(),
                    error: entry.error.clone(),
                    total: 1,
                });
        }

        Ok(by_code.into_values().collect())
    }

    /// Retention: removes rows created strictly before `cutoff` from both logs.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport, StoreError> {
        let statement_rows = purge_tree::<StatementLogEntry>(&self.statements, |e| {
            e.created_at < cutoff
        })?;
        let request_rows =
            purge_tree::<RequestLogEntry>(&self.requests, |e| e.created_at < cutoff)?;

        if statement_rows + request_rows > 0 {
            tracing::info!(statement_rows, request_rows, %cutoff, "Purged outcome log rows");
        }

        Ok(PurgeReport {
            statement_rows,
            request_rows,
        })
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.statements.clear()?;
        self.requests.clear()?;
        Ok(())
    }

    fn append<E: Serialize>(&self, tree: &sled::Tree, entry: &E) -> Result<u64, StoreError> {
        let id = self.db.generate_id()?;
        let encoded = bincode::serde::encode_to_vec(entry, bincode::config::standard())?;
        tree.insert(id.to_be_bytes(), encoded)?;
        Ok(id)
    }
}

impl OutcomeRecorder for OutcomeLog {
    fn record_statement(&self, entry: &StatementLogEntry) -> Result<u64, StoreError> {
        self.append_statement(entry)
    }
}

impl std::fmt::Debug for OutcomeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeLog")
            .field("statement_rows", &self.statements.len())
            .field("request_rows", &self.requests.len())
            .finish()
    }
}

fn decode<E: DeserializeOwned>(value: &[u8]) -> Result<E, StoreError> {
    let (entry, _): (E, usize) =
        bincode::serde::decode_from_slice(value, bincode::config::standard())?;
    Ok(entry)
}

fn read_all<E: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<E>, StoreError> {
    tree.iter()
        .map(|entry| {
            let (_, value) = entry?;
            decode(&value)
        })
        .collect()
}

fn purge_tree<E: DeserializeOwned>(
    tree: &sled::Tree,
    expired: impl Fn(&E) -> bool,
) -> Result<usize, StoreError> {
    let mut removed = 0;
    for entry in tree.iter() {
        let (key, value) = entry?;
        if expired(&decode::<E>(&value)?) && tree.remove(&key)?.is_some() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::Duration;

    fn statement_row(code: u16, reason: &str, count: u64) -> StatementLogEntry {
        StatementLogEntry {
            code: Some(code),
            reason: reason.to_string(),
            count,
            data: Some(String::new()),
            created_at: Utc::now(),
        }
    }

    fn request_row(code: u16, reason: &str, error: &str, count: u64) -> RequestLogEntry {
        RequestLogEntry {
            code: Some(code),
            reason: reason.to_string(),
            error: error.to_string(),
            count,
            data: String::new(),
            created_at: Utc::now(),
        }
    }

    fn log() -> OutcomeLog {
        Store::temporary().unwrap().outcome_log().unwrap()
    }

    #[test]
    fn test_statement_statistics_sum_counts_per_code() {
        let log = log();
        log.append_statement(&statement_row(200, "OK", 10)).unwrap();
        log.append_statement(&statement_row(400, "Bad request", 5)).unwrap();
        log.append_statement(&statement_row(200, "OK", 15)).unwrap();

        let stats = log.statement_statistics().unwrap();
        assert_eq!(
            stats,
            vec![
                StatementStatistic {
                    code: Some(200),
                    reason: "OK".to_string(),
                    total: 25,
                },
                StatementStatistic {
                    code: Some(400),
                    reason: "Bad request".to_string(),
                    total: 5,
                },
            ]
        );
    }

    #[test]
    fn test_request_statistics_count_rows_per_code() {
        let log = log();
        log.append_request(&request_row(200, "OK", "", 15)).unwrap();
        log.append_request(&request_row(400, "Bad request", "Bad request", 10))
            .unwrap();
        log.append_request(&request_row(200, "OK", "", 15)).unwrap();

        let stats = log.request_statistics().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].code, Some(200));
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[1].code, Some(400));
        assert_eq!(stats[1].error, "Bad request");
        assert_eq!(stats[1].total, 1);
    }

    #[test]
    fn test_first_reason_wins_for_shared_code() {
        let log = log();
        log.append_statement(&statement_row(500, "Internal Server Error", 1))
            .unwrap();
        log.append_statement(&statement_row(500, "Upstream exploded", 2))
            .unwrap();

        let stats = log.statement_statistics().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].reason, "Internal Server Error");
        assert_eq!(stats[0].total, 3);
    }

    #[test]
    fn test_missing_code_sorts_first() {
        let log = log();
        log.append_statement(&statement_row(200, "OK", 1)).unwrap();
        log.append_statement(&StatementLogEntry {
            code: None,
            ..statement_row(0, "", 4)
        })
        .unwrap();

        let stats = log.statement_statistics().unwrap();
        assert_eq!(stats[0].code, None);
        assert_eq!(stats[0].total, 4);
        assert_eq!(stats[1].code, Some(200));
    }

    #[test]
    fn test_entries_round_trip_in_insertion_order() {
        let log = log();
        let first = StatementLogEntry {
            data: None,
            ..statement_row(200, "OK", 3)
        };
        let second = statement_row(418, "I'm a teapot", 2);
        log.append_statement(&first).unwrap();
        log.append_statement(&second).unwrap();

        let entries = log.statement_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].data, None);
        assert_eq!(entries[1].reason, "I'm a teapot");
        // second precision survives the encoding
        assert_eq!(entries[0].created_at.timestamp(), first.created_at.timestamp());
    }

    #[test]
    fn test_purge_before_cutoff() {
        let log = log();
        let old = StatementLogEntry {
            created_at: Utc::now() - Duration::days(40),
            ..statement_row(200, "OK", 1)
        };
        log.append_statement(&old).unwrap();
        log.append_statement(&statement_row(200, "OK", 2)).unwrap();
        log.append_request(&RequestLogEntry {
            created_at: Utc::now() - Duration::days(40),
            ..request_row(500, "Internal Server Error", "boom", 1)
        })
        .unwrap();

        let report = log.purge_before(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(
            report,
            PurgeReport {
                statement_rows: 1,
                request_rows: 1,
            }
        );
        assert_eq!(log.statement_count(), 1);
        assert_eq!(log.request_count(), 0);
    }

    #[test]
    fn test_empty_log_has_no_statistics() {
        let log = log();
        assert!(log.statement_statistics().unwrap().is_empty());
        assert!(log.request_statistics().unwrap().is_empty());
    }
}
