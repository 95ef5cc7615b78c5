// src/driver/mod.rs
pub mod producer;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{DriverError, StoreError};
use crate::process::parse_table;
use crate::schema::{is_degenerate, normalize_key, PROVENANCE_COLUMN};
use crate::store::{Commit, DatasetStore, Location};

pub use producer::{Producer, Script, ScriptedProducer};

/// One `(category, raw table text)` pair handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub category: String,
    pub table: String,
}

impl BatchItem {
    pub fn new(category: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            table: table.into(),
        }
    }
}

/// What happened to one category.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Written(Commit),
    /// Blank text or a table without rows: nothing was written.
    Unchanged,
    Failed {
        kind: &'static str,
        #[serde(serialize_with = "serialize_display")]
        error: DriverError,
    },
}

fn serialize_display<S: Serializer>(error: &DriverError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub key: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl CategoryReport {
    fn new(category: &str, result: Result<Option<Commit>, DriverError>) -> Self {
        let key = normalize_key(category);
        let outcome = match result {
            Ok(Some(commit)) => Outcome::Written(commit),
            Ok(None) => Outcome::Unchanged,
            Err(error) => {
                warn!(category, key = %key, error = %error, "category failed");
                Outcome::Failed {
                    kind: error.kind(),
                    error,
                }
            }
        };
        Self {
            category: category.to_string(),
            key,
            outcome,
        }
    }
}

/// Per-category results of a batch, in input order.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<CategoryReport>,
}

impl BatchReport {
    /// Distinct locations written by this batch, in first-written order.
    pub fn locations(&self) -> Vec<&Location> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter_map(|e| match &e.outcome {
                Outcome::Written(commit) => Some(&commit.location),
                _ => None,
            })
            .filter(|loc| seen.insert(*loc))
            .collect()
    }

    pub fn failures(&self) -> Vec<&CategoryReport> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed { .. }))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failures().is_empty()
    }
}

/// Turns producer output into dataset writes, one category at a time, with
/// failures isolated per category.
pub struct AccumulationDriver {
    store: DatasetStore,
    max_concurrency: usize,
    use_header_hint: bool,
}

impl AccumulationDriver {
    pub fn new(store: DatasetStore) -> Self {
        Self {
            store,
            max_concurrency: 4,
            use_header_hint: true,
        }
    }

    pub fn from_config(store: DatasetStore, config: &Config) -> Self {
        Self::new(store)
            .with_max_concurrency(config.max_concurrency)
            .with_header_hint(config.use_header_hint)
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_header_hint(mut self, enabled: bool) -> Self {
        self.use_header_hint = enabled;
        self
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Parse `raw` and merge it into the dataset for `category`.
    ///
    /// Blank text is a no-op (`Ok(None)`), as is a header without rows.
    #[instrument(level = "debug", skip(self, raw))]
    pub async fn accumulate(&self, category: &str, raw: &str) -> Result<Option<Commit>, DriverError> {
        if raw.trim().is_empty() {
            debug!("blank table text; nothing to write");
            return Ok(None);
        }

        let key = normalize_key(category);
        if is_degenerate(&key) {
            info!(
                category,
                key = %key,
                "label normalizes to a degenerate key; unrelated labels may share this dataset"
            );
        }

        let table = parse_table(raw)?;
        let violations = table.provenance_violations();
        if !violations.is_empty() {
            warn!(
                key = %key,
                rows = ?violations,
                "{} contains the field separator; cells will be quoted",
                PROVENANCE_COLUMN
            );
        }

        let store = self.store.clone();
        let task_key = key.clone();
        let commit = run_blocking(&key, move || store.write(&task_key, table)).await?;
        Ok(commit)
    }

    /// Accumulate every item, up to `max_concurrency` at a time. Writes to
    /// the same key are serialized by the store; the report keeps input order.
    pub async fn accumulate_batch<I>(&self, items: I) -> BatchReport
    where
        I: IntoIterator<Item = BatchItem>,
    {
        let entries = stream::iter(items)
            .map(|item| async move {
                let result = self.accumulate(&item.category, &item.table).await;
                CategoryReport::new(&item.category, result)
            })
            .buffered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = BatchReport { entries };
        info!(
            categories = report.entries.len(),
            written = report.locations().len(),
            failed = report.failures().len(),
            "batch done"
        );
        report
    }

    /// Full pipeline for one document: detect categories, extract a table per
    /// category (with the existing header as hint) and accumulate it.
    ///
    /// Only a failed detection fails the whole call; every other failure is
    /// reported against its category.
    #[instrument(level = "info", skip_all, fields(producer = producer.name(), text_len = text.len()))]
    pub async fn ingest(
        &self,
        producer: &dyn Producer,
        text: &str,
    ) -> Result<BatchReport, DriverError> {
        let labels = producer
            .detect_categories(text)
            .await
            .map_err(|e| DriverError::Detection(format!("{:#}", e)))?;
        let labels = dedupe_by_key(labels);
        info!(categories = ?labels, "detected categories");

        let entries = stream::iter(labels)
            .map(|label| async move {
                let result = self.extract_and_accumulate(producer, text, &label).await;
                CategoryReport::new(&label, result)
            })
            .buffered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(BatchReport { entries })
    }

    /// Columns of the existing dataset for `key`; empty when there is none or
    /// it cannot be read (the write itself will report that).
    pub async fn header_hint(&self, key: &str) -> Vec<String> {
        let store = self.store.clone();
        let task_key = key.to_string();
        match run_blocking(key, move || store.header(&task_key)).await {
            Ok(Some(header)) => header,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "could not read existing header; extracting without hint");
                Vec::new()
            }
        }
    }

    async fn extract_and_accumulate(
        &self,
        producer: &dyn Producer,
        text: &str,
        label: &str,
    ) -> Result<Option<Commit>, DriverError> {
        let hint = if self.use_header_hint {
            self.header_hint(&normalize_key(label)).await
        } else {
            Vec::new()
        };
        debug!(category = label, hint = ?hint, "extracting");

        let raw = producer
            .extract_table(text, label, &hint)
            .await
            .map_err(|e| DriverError::Extraction {
                category: label.to_string(),
                reason: format!("{:#}", e),
            })?;
        self.accumulate(label, &raw).await
    }
}

/// Keep the first label for every key; later spellings of the same category
/// would only extract the same rows again.
fn dedupe_by_key(labels: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .into_iter()
        .filter(|label| {
            let fresh = seen.insert(normalize_key(label));
            if !fresh {
                debug!(label = %label, "dropping duplicate category");
            }
            fresh
        })
        .collect()
}

/// Run store IO on the blocking pool.
async fn run_blocking<T, F>(key: &str, f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Interrupted {
            key: key.to_string(),
            reason: e.to_string(),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tracing_subscriber::{fmt, EnvFilter};

    fn init_logging() {
        let _ = fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    }

    fn driver() -> AccumulationDriver {
        AccumulationDriver::new(DatasetStore::in_memory())
    }

    #[tokio::test]
    async fn blank_text_is_a_no_op() -> Result<()> {
        init_logging();
        let driver = driver();
        assert!(driver.accumulate("Economy", "").await?.is_none());
        assert!(driver.accumulate("Economy", "   \n\t").await?.is_none());
        assert!(driver.store().list()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn header_only_text_is_unchanged() -> Result<()> {
        let driver = driver();
        let report = driver
            .accumulate_batch([BatchItem::new("Economy", "date,value\n")])
            .await;
        assert!(matches!(report.entries[0].outcome, Outcome::Unchanged));
        assert!(report.locations().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn parse_failure_does_not_stop_the_batch() -> Result<()> {
        init_logging();
        let driver = driver();
        let report = driver
            .accumulate_batch([
                BatchItem::new("Economy", "date,value\n2024,1\n"),
                BatchItem::new("Health", "a,b\n1,2,3\n"),
                BatchItem::new("Sports", "team,score\nA,3\n"),
            ])
            .await;

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.entries[1].key, "health");
        match &report.entries[1].outcome {
            Outcome::Failed { kind, error } => {
                assert_eq!(*kind, "parse");
                assert!(matches!(error, DriverError::Parse(_)));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!report.is_success());
        assert_eq!(
            report.locations(),
            vec![
                &Location::Memory("economy".into()),
                &Location::Memory("sports".into())
            ]
        );
        assert!(driver.store().load("health")?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn spellings_of_a_category_land_in_one_dataset() -> Result<()> {
        let driver = driver();
        driver.accumulate("Air Pollution", "pm25\n10\n").await?;
        driver.accumulate("  AIR-POLLUTION  ", "pm25\n12\n").await?;
        driver.accumulate("air_pollution", "pm25\n14\n").await?;

        let keys: Vec<String> = driver.store().list()?.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["air_pollution"]);
        let table = driver.store().load("air_pollution")?.unwrap();
        assert_eq!(
            table.column("pm25").unwrap(),
            vec![Some("10"), Some("12"), Some("14")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn degenerate_label_still_writes() -> Result<()> {
        let driver = driver();
        let commit = driver.accumulate("???", "a\n1\n").await?.unwrap();
        assert_eq!(commit.location, Location::Memory("___".into()));
        Ok(())
    }

    #[tokio::test]
    async fn ingest_passes_existing_header_as_hint() -> Result<()> {
        init_logging();
        let driver = driver();
        driver
            .accumulate("economy", "date,value,input_reference\n2024,1,p1\n")
            .await?;

        let producer = ScriptedProducer::new(["Economy", "Health"])
            .with_table("Economy", "value,source,input_reference\n2,imf,p2\n")
            .with_table("Health", "cases\n5\n");
        let report = driver.ingest(&producer, "some document").await?;

        assert!(report.is_success());
        assert_eq!(report.locations().len(), 2);
        // categories run concurrently, so extraction order is not fixed
        let mut hints = producer.hints();
        hints.sort();
        assert_eq!(
            hints,
            vec![
                (
                    "Economy".to_string(),
                    vec![
                        "date".to_string(),
                        "value".to_string(),
                        "input_reference".to_string()
                    ]
                ),
                ("Health".to_string(), vec![]),
            ]
        );

        let economy = driver.store().load("economy")?.unwrap();
        assert_eq!(
            economy.columns,
            vec!["date", "input_reference", "source", "value"]
        );
        assert_eq!(economy.num_rows(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn ingest_without_hints() -> Result<()> {
        let driver = driver().with_header_hint(false);
        driver.accumulate("economy", "a\n1\n").await?;
        let producer = ScriptedProducer::new(["economy"]).with_table("economy", "a\n2\n");

        driver.ingest(&producer, "doc").await?;

        assert_eq!(producer.hints(), vec![("economy".to_string(), vec![])]);
        Ok(())
    }

    #[tokio::test]
    async fn extraction_failure_is_reported_per_category() -> Result<()> {
        let driver = driver();
        let producer = ScriptedProducer::new(["economy", "health"]).with_table("economy", "a\n1\n");

        let report = driver.ingest(&producer, "doc").await?;

        assert!(matches!(report.entries[0].outcome, Outcome::Written(_)));
        match &report.entries[1].outcome {
            Outcome::Failed { kind, .. } => assert_eq!(*kind, "extraction"),
            other => panic!("expected failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_labels_are_extracted_once() -> Result<()> {
        let driver = driver();
        let producer = ScriptedProducer::new(["Economy", "economy", "ECONOMY!"])
            .with_table("Economy", "a\n1\n");

        let report = driver.ingest(&producer, "doc").await?;

        // "ECONOMY!" maps to economy_ and is its own category
        assert_eq!(report.entries.len(), 2);
        assert_eq!(producer.hints().len(), 2);
        assert_eq!(driver.store().load("economy")?.unwrap().num_rows(), 1);
        Ok(())
    }

    struct BrokenProducer;

    #[async_trait]
    impl Producer for BrokenProducer {
        async fn detect_categories(&self, _text: &str) -> Result<Vec<String>> {
            Err(anyhow!("model unavailable"))
        }

        async fn extract_table(
            &self,
            _text: &str,
            _category: &str,
            _header_hint: &[String],
        ) -> Result<String> {
            unreachable!("detection never succeeds")
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn failed_detection_fails_the_ingest() {
        let driver = driver();
        let err = driver.ingest(&BrokenProducer, "doc").await.unwrap_err();
        assert!(matches!(err, DriverError::Detection(ref m) if m.contains("model unavailable")));
    }

    #[tokio::test]
    async fn report_serializes_per_category_status() -> Result<()> {
        let driver = driver();
        let report = driver
            .accumulate_batch([
                BatchItem::new("economy", "a\n1\n"),
                BatchItem::new("health", ""),
                BatchItem::new("sports", "x,x\n1,2\n"),
            ])
            .await;

        let json = serde_json::to_value(&report)?;
        let entries = json["entries"].as_array().unwrap();
        assert_eq!(entries[0]["status"], "written");
        assert_eq!(entries[0]["location"], "memory://economy");
        assert_eq!(entries[0]["rows_appended"], 1);
        assert_eq!(entries[1]["status"], "unchanged");
        assert_eq!(entries[2]["status"], "failed");
        assert_eq!(entries[2]["kind"], "parse");
        assert!(entries[2]["error"].as_str().unwrap().contains("`x`"));
        Ok(())
    }
}
