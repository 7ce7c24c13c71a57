use serde_json::Value;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::key::{extract_key, KeyError};
use crate::store::{KvConnection, StoreError};

/// A record that was not written, with its position in the payload.
#[derive(Debug)]
pub struct RecordFailure {
    pub index: usize,
    pub reason: FailureReason,
}

#[derive(Debug)]
pub enum FailureReason {
    Key(KeyError),
    Upsert(StoreError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureReason::Key(e) => write!(f, "key extraction failed - {}", e),
            FailureReason::Upsert(e) => write!(f, "upsert failed - {}", e),
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub received: usize,
    pub written: usize,
    pub failures: Vec<RecordFailure>,
}

impl IngestSummary {
    pub fn skipped(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| matches!(f.reason, FailureReason::Key(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.failures.len() - self.skipped()
    }
}

/// A record paired with its extracted key, ready to be written.
pub type Keyed<'a> = Result<(String, &'a Value), KeyError>;

/// Pair every record with its key, preserving payload order.
pub fn key_records<'a>(items: &'a [Value], key_field: &str) -> Vec<Keyed<'a>> {
    items
        .iter()
        .map(|item| extract_key(item, key_field).map(|key| (key, item)))
        .collect()
}

/// Write every keyed record through `conn`, in order. Failures are recorded and
/// the loop carries on with the next record.
pub async fn upsert_records<C: KvConnection>(
    conn: &mut C,
    keyed: Vec<Keyed<'_>>,
) -> IngestSummary {
    let start = Instant::now();
    let mut summary = IngestSummary {
        received: keyed.len(),
        ..Default::default()
    };

    for (index, entry) in keyed.into_iter().enumerate() {
        let (key, record) = match entry {
            Ok(keyed) => keyed,
            Err(e) => {
                let reason = FailureReason::Key(e);
                warn!("skipping record {}: {}", index, reason);
                summary.failures.push(RecordFailure { index, reason });
                continue;
            }
        };

        let value = record.to_string();
        match conn.set(&key, &value).await {
            Ok(()) => {
                debug!("record {} set. key: {} - value: {}", index, key, value);
                summary.written += 1;
            }
            Err(e) => {
                let reason = FailureReason::Upsert(e);
                warn!("record {} not written: {}", index, reason);
                summary.failures.push(RecordFailure { index, reason });
            }
        }
    }

    info!(
        "processed {} records in {:?}: {} written, {} skipped, {} failed",
        summary.received,
        start.elapsed(),
        summary.written,
        summary.skipped(),
        summary.failed()
    );
    summary
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingConnection {
        writes: Vec<(String, String)>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl KvConnection for RecordingConnection {
        async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.fail_on.as_deref() == Some(key) {
                return Err(StoreError::Write {
                    key: key.to_string(),
                    reason: "boom".to_string(),
                });
            }
            self.writes.push((key.to_string(), value.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_order_and_counts() {
        let items = vec![
            json!({"k": "a", "v": 1}),
            json!({"v": 2}),
            json!({"k": "b", "v": 3}),
        ];
        let mut conn = RecordingConnection::default();
        let summary = upsert_records(&mut conn, key_records(&items, "k")).await;

        assert_eq!(summary.received, 3);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.failures[0].index, 1);
        assert_eq!(
            conn.writes,
            vec![
                ("a".to_string(), r#"{"k":"a","v":1}"#.to_string()),
                ("b".to_string(), r#"{"k":"b","v":3}"#.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_upsert_failure_does_not_stop_batch() {
        let items = vec![json!({"k": "a"}), json!({"k": "b"}), json!({"k": "c"})];
        let mut conn = RecordingConnection {
            fail_on: Some("b".to_string()),
            ..Default::default()
        };
        let summary = upsert_records(&mut conn, key_records(&items, "k")).await;

        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed(), 1);
        assert!(matches!(
            summary.failures[0].reason,
            FailureReason::Upsert(StoreError::Write { .. })
        ));
        let keys: Vec<&str> = conn.writes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    /// Stalls on one key past its deadline, the way a slow server would.
    struct StallingConnection {
        writes: Vec<String>,
        stall_on: &'static str,
        deadline: Duration,
    }

    #[async_trait]
    impl KvConnection for StallingConnection {
        async fn set(&mut self, key: &str, _value: &str) -> Result<(), StoreError> {
            let stall = if key == self.stall_on {
                Duration::from_secs(5)
            } else {
                Duration::ZERO
            };
            tokio::time::timeout(self.deadline, tokio::time::sleep(stall))
                .await
                .map_err(|_| StoreError::Timeout {
                    operation: "set",
                    after: self.deadline,
                })?;
            self.writes.push(key.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_set_timeout_fails_only_that_record() {
        let items = vec![json!({"k": "a"}), json!({"k": "slow"}), json!({"k": "c"})];
        let mut conn = StallingConnection {
            writes: Vec::new(),
            stall_on: "slow",
            deadline: Duration::from_millis(20),
        };
        let summary = upsert_records(&mut conn, key_records(&items, "k")).await;

        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures[0].index, 1);
        assert!(matches!(
            summary.failures[0].reason,
            FailureReason::Upsert(StoreError::Timeout {
                operation: "set",
                ..
            })
        ));
        assert_eq!(conn.writes, vec!["a", "c"]);
    }
}
