//! In-memory persistence engine (for testing/development)

use crate::error::SessionError;
use crate::session::{DocumentSession, NEW_DOCUMENT_VERSION, StoredDocument};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Shared in-memory database holding one row per document type.
#[derive(Clone, Default)]
pub struct InMemoryDocumentDb {
    rows: Arc<Mutex<HashMap<String, StoredDocument>>>,
}

impl InMemoryDocumentDb {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session (one per unit of work).
    pub fn session(&self) -> InMemorySession {
        InMemorySession {
            db: self.clone(),
            identity: HashMap::new(),
            pending: Vec::new(),
            in_transaction: false,
        }
    }

    /// Read a row outside any session.
    pub fn row(&self, document_type: &str) -> Option<StoredDocument> {
        self.rows.lock().get(document_type).cloned()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the database is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

struct PendingWrite {
    document_type: String,
    content: Value,
    expected_version: Option<u64>,
}

/// Session over an [`InMemoryDocumentDb`].
pub struct InMemorySession {
    db: InMemoryDocumentDb,
    identity: HashMap<String, StoredDocument>,
    pending: Vec<PendingWrite>,
    in_transaction: bool,
}

impl InMemorySession {
    fn end_transaction(&mut self) {
        self.pending.clear();
        self.identity.clear();
        self.in_transaction = false;
    }
}

#[async_trait]
impl DocumentSession for InMemorySession {
    async fn query(&mut self, document_type: &str) -> Result<Option<StoredDocument>, SessionError> {
        self.in_transaction = true;

        if let Some(row) = self.identity.get(document_type) {
            return Ok(Some(row.clone()));
        }

        let row = self.db.row(document_type);
        if let Some(row) = &row {
            self.identity.insert(document_type.to_string(), row.clone());
        }
        Ok(row)
    }

    fn detach(&mut self, document_type: &str) {
        self.identity.remove(document_type);
    }

    async fn save(
        &mut self,
        document_type: &str,
        content: Value,
        expected_version: Option<u64>,
    ) -> Result<(), SessionError> {
        self.in_transaction = true;
        self.pending.retain(|w| w.document_type != document_type);
        self.pending.push(PendingWrite {
            document_type: document_type.to_string(),
            content,
            expected_version,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SessionError> {
        let result = {
            let mut rows = self.db.rows.lock();

            let conflict = self.pending.iter().find_map(|write| {
                let expected = write.expected_version?;
                let actual = rows
                    .get(&write.document_type)
                    .map(|row| row.version)
                    .unwrap_or(NEW_DOCUMENT_VERSION);
                (actual != expected).then(|| SessionError::ConcurrencyConflict {
                    document_type: write.document_type.clone(),
                    expected,
                    actual,
                })
            });

            match conflict {
                Some(conflict) => Err(conflict),
                None => {
                    for write in self.pending.drain(..) {
                        let version = rows
                            .get(&write.document_type)
                            .map(|row| row.version)
                            .unwrap_or(NEW_DOCUMENT_VERSION)
                            + 1;
                        debug!(document_type = %write.document_type, version, "Row committed");
                        rows.insert(
                            write.document_type,
                            StoredDocument {
                                content: write.content,
                                version,
                            },
                        );
                    }
                    Ok(())
                }
            }
        };

        self.end_transaction();
        result
    }

    async fn cancel(&mut self) -> Result<(), SessionError> {
        self.end_transaction();
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}
