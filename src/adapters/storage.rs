use crate::domain::model::{OrderReport, ServiceIndexEntry};
use crate::domain::ports::OrderStore;
use crate::utils::error::{RelayError, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "service_index.json";
const ORDERS_DIR: &str = "orders";

/// Filesystem store rooted at one data directory:
///
/// ```text
/// <base>/service_index.json
/// <base>/orders/<order_id>.claim
/// <base>/orders/<order_id>.json
/// ```
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn order_path(&self, order_id: &str, extension: &str) -> Result<PathBuf> {
        let valid = !order_id.is_empty()
            && order_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RelayError::PayloadError {
                message: format!("order id '{}' is not usable as a file name", order_id),
            });
        }
        Ok(self
            .base_path
            .join(ORDERS_DIR)
            .join(format!("{}.{}", order_id, extension)))
    }

    fn report_path(&self, order_id: &str) -> Result<PathBuf> {
        self.order_path(order_id, "json")
    }

    /// Writes next to the target and renames over it, so readers never see a
    /// half-written file.
    fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl OrderStore for LocalStorage {
    async fn load_service_rows(&self, path: &str) -> Result<Vec<Vec<String>>> {
        let full_path = self.base_path.join(path);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&full_path)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        tracing::debug!("Read {} service rows from {}", rows.len(), full_path.display());
        Ok(rows)
    }

    async fn save_service_index(&self, entries: &[ServiceIndexEntry]) -> Result<()> {
        let data = serde_json::to_vec_pretty(entries)?;
        Self::write_atomic(&self.base_path.join(INDEX_FILE), &data)
    }

    async fn load_service_index(&self) -> Result<Vec<ServiceIndexEntry>> {
        let path = self.base_path.join(INDEX_FILE);
        if !path.exists() {
            tracing::warn!(
                "No service index at {}, every service resolves to dummy",
                path.display()
            );
            return Ok(Vec::new());
        }
        let data = fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn claim_order(&self, order_id: &str) -> Result<bool> {
        let claim = self.order_path(order_id, "claim")?;
        if self.report_path(order_id)?.exists() {
            return Ok(false);
        }
        if let Some(parent) = claim.parent() {
            fs::create_dir_all(parent)?;
        }
        // create_new is atomic: only one concurrent caller wins the file.
        match OpenOptions::new().write(true).create_new(true).open(&claim) {
            Ok(mut file) => {
                writeln!(file, "{}", Utc::now().to_rfc3339())?;
                tracing::debug!("Order {} claimed at {}", order_id, claim.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_report(&self, report: &OrderReport) -> Result<()> {
        let path = self.report_path(&report.order_id)?;
        let data = serde_json::to_vec_pretty(report)?;
        Self::write_atomic(&path, &data)?;
        tracing::debug!("Report for order {} saved to {}", report.order_id, path.display());
        Ok(())
    }

    async fn load_report(&self, order_id: &str) -> Result<Option<OrderReport>> {
        let path = self.report_path(order_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ProviderId;
    use tempfile::TempDir;

    fn report(order_id: &str) -> OrderReport {
        OrderReport {
            order_id: order_id.to_string(),
            payment_system: Some("yakassa".to_string()),
            created_at: Utc::now(),
            total: 0,
            lines: Vec::new(),
            unparsed: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_reads_flexible_csv_rows() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("services.csv"),
            "ВК: Лайки Стандарт, 101, socproof\n\"Telegram: Просмотры, быстрые\",202,fxsmmsoc\nbroken,row\n",
        )
        .unwrap();

        let storage = LocalStorage::new(dir.path());
        let rows = storage.load_service_rows("services.csv").await.unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["ВК: Лайки Стандарт", "101", "socproof"]);
        assert_eq!(rows[1][0], "Telegram: Просмотры, быстрые");
        assert_eq!(rows[2].len(), 2);
    }

    #[tokio::test]
    async fn test_missing_csv_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.load_service_rows("nope.csv").await.is_err());
    }

    #[tokio::test]
    async fn test_service_index_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.load_service_index().await.unwrap().is_empty());

        let entries = vec![ServiceIndexEntry {
            service_name: "вк: лайки".to_string(),
            service_id: Some("101".to_string()),
            provider_id: ProviderId::Socproof,
        }];
        storage.save_service_index(&entries).await.unwrap();

        assert_eq!(storage.load_service_index().await.unwrap(), entries);
        assert!(!dir.path().join("service_index.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_report_persistence_and_duplicate_detection() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(storage.load_report("1624284557").await.unwrap().is_none());

        storage.save_report(&report("1624284557")).await.unwrap();

        // A stored report blocks the order even without a claim file.
        assert!(!storage.claim_order("1624284557").await.unwrap());
        let loaded = storage.load_report("1624284557").await.unwrap().unwrap();
        assert_eq!(loaded.order_id, "1624284557");
        assert_eq!(loaded.payment_system.as_deref(), Some("yakassa"));
    }

    #[tokio::test]
    async fn test_rejects_path_like_order_ids() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(
            storage.claim_order("../etc/passwd").await,
            Err(RelayError::PayloadError { .. })
        ));
        assert!(storage.save_report(&report("")).await.is_err());
    }

    #[tokio::test]
    async fn test_order_can_be_claimed_once() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(storage.claim_order("77").await.unwrap());
        assert!(!storage.claim_order("77").await.unwrap());
        assert!(storage.claim_order("78").await.unwrap());
        assert!(dir.path().join("orders").join("77.claim").exists());

        // Saving the report keeps the claim in place.
        storage.save_report(&report("77")).await.unwrap();
        assert!(!storage.claim_order("77").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        let (first, second) = tokio::join!(storage.claim_order("9"), storage.claim_order("9"));
        assert_ne!(first.unwrap(), second.unwrap());
    }
}
