use crate::domain::model::{ProviderId, ServiceIndexEntry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

fn index_key(service_name: &str) -> String {
    service_name.trim().to_lowercase()
}

/// Why a row was left out of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowRejection {
    WrongFieldCount { row: usize, fields: usize },
    UnknownProvider { row: usize, provider: String },
    EmptyServiceName { row: usize },
    Duplicate { row: usize, service_name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub accepted: usize,
    pub rejected: Vec<RowRejection>,
}

impl RebuildReport {
    pub fn duplicates(&self) -> usize {
        self.rejected
            .iter()
            .filter(|r| matches!(r, RowRejection::Duplicate { .. }))
            .count()
    }

    pub fn invalid(&self) -> usize {
        self.rejected.len() - self.duplicates()
    }
}

/// Case- and trim-insensitive map from service name to provider entry.
#[derive(Debug, Clone, Default)]
pub struct ServiceIndex {
    entries: HashMap<String, ServiceIndexEntry>,
    /// Keys in row order, so the index can be persisted as it was imported.
    order: Vec<String>,
}

impl ServiceIndex {
    /// Validates and deduplicates raw `(service_name, service_id, provider_id)`
    /// rows. The first row for a name wins; later duplicates are dropped.
    pub fn rebuild<I, R>(rows: I) -> (Self, RebuildReport)
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[String]>,
    {
        let mut index = ServiceIndex::default();
        let mut report = RebuildReport::default();

        for (row_no, row) in rows.into_iter().enumerate() {
            let row = row.as_ref();
            if row.len() != 3 {
                report.rejected.push(RowRejection::WrongFieldCount {
                    row: row_no,
                    fields: row.len(),
                });
                continue;
            }

            let provider_id = match row[2].trim().parse::<ProviderId>() {
                Ok(id) => id,
                Err(_) => {
                    report.rejected.push(RowRejection::UnknownProvider {
                        row: row_no,
                        provider: row[2].clone(),
                    });
                    continue;
                }
            };

            let key = index_key(&row[0]);
            if key.is_empty() {
                report
                    .rejected
                    .push(RowRejection::EmptyServiceName { row: row_no });
                continue;
            }
            if index.entries.contains_key(&key) {
                report.rejected.push(RowRejection::Duplicate {
                    row: row_no,
                    service_name: key,
                });
                continue;
            }

            let service_id = Some(row[1].trim().to_string()).filter(|id| !id.is_empty());
            index.order.push(key.clone());
            index.entries.insert(
                key.clone(),
                ServiceIndexEntry {
                    service_name: key,
                    service_id,
                    provider_id,
                },
            );
            report.accepted += 1;
        }

        (index, report)
    }

    /// Loads already validated entries (e.g. from storage).
    pub fn from_entries(entries: impl IntoIterator<Item = ServiceIndexEntry>) -> Self {
        let mut index = ServiceIndex::default();
        for mut entry in entries {
            let key = index_key(&entry.service_name);
            if index.entries.contains_key(&key) {
                continue;
            }
            entry.service_name = key.clone();
            index.order.push(key.clone());
            index.entries.insert(key, entry);
        }
        index
    }

    /// Never fails: unknown names resolve to the dummy provider.
    pub fn resolve(&self, service_name: &str) -> ServiceIndexEntry {
        self.entries
            .get(&index_key(service_name))
            .cloned()
            .unwrap_or_else(|| ServiceIndexEntry::fallback(service_name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<ServiceIndexEntry> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).cloned())
            .collect()
    }
}

/// Read-many, replace-rarely handle. Readers get a consistent snapshot; a
/// replacement swaps the whole index at once.
#[derive(Debug, Clone, Default)]
pub struct SharedServiceIndex {
    inner: Arc<RwLock<Arc<ServiceIndex>>>,
}

impl SharedServiceIndex {
    pub fn new(index: ServiceIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    pub fn snapshot(&self) -> Arc<ServiceIndex> {
        self.inner.read().clone()
    }

    pub fn resolve(&self, service_name: &str) -> ServiceIndexEntry {
        self.snapshot().resolve(service_name)
    }

    pub fn replace(&self, index: ServiceIndex) {
        *self.inner.write() = Arc::new(index);
    }
}
