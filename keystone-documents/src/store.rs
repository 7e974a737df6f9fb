//! Unit-of-work document store.
//!
//! A [`DocumentStore`] lives for one logical transaction. It holds at most one
//! mutable instance per document type, the writes scheduled through
//! [`DocumentStore::update`], and the hooks to run once the persistence engine
//! has committed (or rejected) those writes.

use crate::document::{Document, Tracked};
use crate::error::{DocumentError, DocumentResult, UnitOfWorkState};
use crate::session::{DocumentSession, NEW_DOCUMENT_VERSION};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tracing::{debug, warn};

type CommitHook = Box<dyn FnOnce() -> BoxFuture<'static, DocumentResult<()>> + Send>;
type Snapshot = Box<dyn Fn() -> DocumentResult<Value> + Send + Sync>;

struct LoadedDocument {
    document: Box<dyn Any + Send + Sync>,
    version: u64,
}

struct PendingSave {
    type_id: TypeId,
    document_type: &'static str,
    snapshot: Snapshot,
    expected_version: Option<u64>,
}

/// Document store scoped to one unit of work.
///
/// Not meant to be shared: every method takes `&mut self`.
pub struct DocumentStore {
    session: Box<dyn DocumentSession>,
    loaded: HashMap<TypeId, LoadedDocument>,
    pending: Vec<PendingSave>,
    success_types: Vec<TypeId>,
    failure_types: Vec<TypeId>,
    after_commit_success: Vec<CommitHook>,
    after_commit_failure: Vec<CommitHook>,
    updating: HashSet<TypeId>,
    state: UnitOfWorkState,
}

impl DocumentStore {
    /// Open a unit of work over a persistence session.
    pub fn new(session: impl DocumentSession + 'static) -> Self {
        Self::from_boxed(Box::new(session))
    }

    /// Open a unit of work over a boxed session.
    pub fn from_boxed(session: Box<dyn DocumentSession>) -> Self {
        Self {
            session,
            loaded: HashMap::new(),
            pending: Vec::new(),
            success_types: Vec::new(),
            failure_types: Vec::new(),
            after_commit_success: Vec::new(),
            after_commit_failure: Vec::new(),
            updating: HashSet::new(),
            state: UnitOfWorkState::Open,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    /// Get the mutable instance of `T`, creating it with `T::default()` when
    /// the store is empty.
    pub async fn get_mutable<T: Document>(&mut self) -> DocumentResult<Tracked<T>> {
        self.get_mutable_with(T::default).await
    }

    /// Get the mutable instance of `T`, creating it with `factory` when the
    /// store is empty.
    ///
    /// Repeated calls within the unit of work return the same instance.
    pub async fn get_mutable_with<T, F>(&mut self, factory: F) -> DocumentResult<Tracked<T>>
    where
        T: Document,
        F: FnOnce() -> T,
    {
        self.ensure_open()?;

        if let Some(tracked) = self.loaded_handle::<T>() {
            return Ok(tracked);
        }

        let (document, version) = match self.session.query(T::document_type()).await? {
            Some(row) => (serde_json::from_value::<T>(row.content)?, row.version),
            None => (factory(), NEW_DOCUMENT_VERSION),
        };

        let tracked = Tracked::new(document);
        self.loaded.insert(
            TypeId::of::<T>(),
            LoadedDocument {
                document: Box::new(tracked.clone()),
                version,
            },
        );
        Ok(tracked)
    }

    /// Get a detached snapshot of `T`, defaulting to `T::default()`.
    pub async fn get_immutable<T: Document>(&mut self) -> DocumentResult<T> {
        self.get_immutable_with(T::default).await
    }

    /// Get a detached snapshot of `T`.
    ///
    /// The snapshot reflects the stored row, never the in-flight mutable
    /// instance of this unit of work, and later mutations of either do not
    /// affect the other. `factory` only runs when no row exists.
    pub async fn get_immutable_with<T, F>(&mut self, factory: F) -> DocumentResult<T>
    where
        T: Document,
        F: FnOnce() -> T,
    {
        self.ensure_open()?;
        let document_type = T::document_type();

        if self.loaded.contains_key(&TypeId::of::<T>()) {
            self.session.detach(document_type);
        }

        match self.session.query(document_type).await? {
            Some(row) => {
                self.session.detach(document_type);
                Ok(serde_json::from_value(row.content)?)
            }
            None => Ok(factory()),
        }
    }

    /// Schedule `document` for persistence and refresh the cache once committed.
    ///
    /// On success `update_cache` receives the committed state. On a
    /// concurrency conflict the commit fails with
    /// [`DocumentError::Concurrency`]. Both hooks are registered once per
    /// document type; later calls only reschedule the write.
    pub async fn update<T, F, Fut>(
        &mut self,
        document: &Tracked<T>,
        update_cache: F,
        check_concurrency: bool,
    ) -> DocumentResult<()>
    where
        T: Document,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = DocumentResult<()>> + Send + 'static,
    {
        self.ensure_open()?;
        let type_id = TypeId::of::<T>();
        let document_type = T::document_type();

        let version = match self.loaded.get_mut(&type_id) {
            Some(loaded) => {
                let same = loaded
                    .document
                    .downcast_ref::<Tracked<T>>()
                    .is_some_and(|current| current.ptr_eq(document));
                if !same {
                    loaded.document = Box::new(document.clone());
                }
                loaded.version
            }
            None => {
                let version = self
                    .session
                    .query(document_type)
                    .await?
                    .map(|row| row.version)
                    .unwrap_or(NEW_DOCUMENT_VERSION);
                self.loaded.insert(
                    type_id,
                    LoadedDocument {
                        document: Box::new(document.clone()),
                        version,
                    },
                );
                version
            }
        };

        let check_concurrency = check_concurrency
            || self
                .pending
                .iter()
                .any(|p| p.type_id == type_id && p.expected_version.is_some());
        self.pending.retain(|p| p.type_id != type_id);

        let source = document.clone();
        self.pending.push(PendingSave {
            type_id,
            document_type,
            snapshot: Box::new(move || -> DocumentResult<Value> {
                Ok(serde_json::to_value(&*source.read())?)
            }),
            expected_version: check_concurrency.then_some(version),
        });

        let committed = document.clone();
        self.after_commit_success::<T, _, _>(move || async move {
            update_cache(committed.snapshot()).await
        });

        self.after_commit_failure::<T, _, _>(move || async move {
            Err(DocumentError::Concurrency {
                document_type: document_type.to_string(),
            })
        });

        Ok(())
    }

    /// Run `callback` after a successful commit.
    ///
    /// Only the first registration per document type within the unit of work
    /// is kept. Callbacks run in registration order.
    pub fn after_commit_success<T, F, Fut>(&mut self, callback: F)
    where
        T: Document,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = DocumentResult<()>> + Send + 'static,
    {
        let type_id = TypeId::of::<T>();
        if self.success_types.contains(&type_id) {
            return;
        }
        self.success_types.push(type_id);
        self.after_commit_success
            .push(Box::new(move || callback().boxed()));
    }

    /// Run `callback` when the commit hits a concurrency conflict.
    ///
    /// Same once-per-type rule as [`DocumentStore::after_commit_success`]. The
    /// first callback returning an error decides the commit's error; when all
    /// succeed the conflict is considered handled.
    pub fn after_commit_failure<T, F, Fut>(&mut self, callback: F)
    where
        T: Document,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = DocumentResult<()>> + Send + 'static,
    {
        let type_id = TypeId::of::<T>();
        if self.failure_types.contains(&type_id) {
            return;
        }
        self.failure_types.push(type_id);
        self.after_commit_failure
            .push(Box::new(move || callback().boxed()));
    }

    /// Abort the unit of work without persisting anything.
    pub async fn cancel(&mut self) -> DocumentResult<()> {
        self.ensure_open()?;
        self.discard();
        self.session.cancel().await?;
        self.state = UnitOfWorkState::Canceled;
        debug!("Unit of work canceled");
        Ok(())
    }

    /// Persist scheduled writes and run the commit hooks.
    pub async fn commit(&mut self) -> DocumentResult<()> {
        self.ensure_open()?;

        for pending in std::mem::take(&mut self.pending) {
            let content = (pending.snapshot)()?;
            self.session
                .save(pending.document_type, content, pending.expected_version)
                .await?;
        }

        if !self.session.in_transaction() {
            self.state = UnitOfWorkState::Committed;
            return Ok(());
        }

        self.state = UnitOfWorkState::Committing;
        match self.session.commit().await {
            Ok(()) => {
                self.state = UnitOfWorkState::Committed;
                self.after_commit_failure.clear();
                for hook in std::mem::take(&mut self.after_commit_success) {
                    hook().await?;
                }
                Ok(())
            }
            Err(e) if e.is_concurrency_conflict() => {
                self.state = UnitOfWorkState::Conflicted;
                self.after_commit_success.clear();
                warn!(error = %e, "Unit of work commit conflicted");
                if self.after_commit_failure.is_empty() {
                    return Err(e.into());
                }
                for hook in std::mem::take(&mut self.after_commit_failure) {
                    hook().await?;
                }
                Ok(())
            }
            Err(e) => {
                self.state = UnitOfWorkState::Failed;
                self.discard();
                Err(e.into())
            }
        }
    }

    /// Whether a write of `T` is in progress in this unit of work.
    pub fn is_updating<T: Document>(&self) -> bool {
        self.updating.contains(&TypeId::of::<T>())
    }

    /// Redirect reads of `T` to the mutable instance until the unit of work ends.
    pub fn mark_updating<T: Document>(&mut self) {
        self.updating.insert(TypeId::of::<T>());
    }

    fn loaded_handle<T: Document>(&self) -> Option<Tracked<T>> {
        self.loaded
            .get(&TypeId::of::<T>())
            .and_then(|loaded| loaded.document.downcast_ref::<Tracked<T>>())
            .cloned()
    }

    fn ensure_open(&self) -> DocumentResult<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(DocumentError::Closed(self.state))
        }
    }

    fn discard(&mut self) {
        self.pending.clear();
        self.after_commit_success.clear();
        self.after_commit_failure.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::memory::InMemoryDocumentDb;
    use crate::session::StoredDocument;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    impl Document for Counter {}

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Flags {
        enabled: Vec<String>,
    }

    impl Document for Flags {}

    fn noop<T>(_: T) -> futures::future::Ready<DocumentResult<()>> {
        futures::future::ready(Ok(()))
    }

    #[tokio::test]
    async fn test_get_mutable_is_reference_stable() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());

        let first = store.get_mutable::<Counter>().await.unwrap();
        first.write().value = 7;
        let second = store.get_mutable::<Counter>().await.unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(second.read().value, 7);
    }

    #[tokio::test]
    async fn test_factory_only_runs_for_missing_row() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());

        let created = store
            .get_mutable_with(|| Counter { value: 42 })
            .await
            .unwrap();
        assert_eq!(created.read().value, 42);
        store.update(&created, noop, false).await.unwrap();
        store.commit().await.unwrap();

        let mut store = DocumentStore::new(db.session());
        let loaded = store
            .get_immutable_with(|| Counter { value: 1 })
            .await
            .unwrap();
        assert_eq!(loaded.value, 42);
    }

    #[tokio::test]
    async fn test_immutable_ignores_in_flight_mutation() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());
        let counter = store.get_mutable::<Counter>().await.unwrap();
        counter.write().value = 1;
        store.update(&counter, noop, false).await.unwrap();
        store.commit().await.unwrap();

        let mut store = DocumentStore::new(db.session());
        let mutable = store.get_mutable::<Counter>().await.unwrap();
        mutable.write().value = 99;

        let mut snapshot = store.get_immutable::<Counter>().await.unwrap();
        assert_eq!(snapshot.value, 1);

        snapshot.value = 500;
        let mut other_scope = DocumentStore::new(db.session());
        assert_eq!(other_scope.get_immutable::<Counter>().await.unwrap().value, 1);
        assert_eq!(mutable.read().value, 99);
    }

    #[tokio::test]
    async fn test_success_hook_runs_once_per_type() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let counter = store.get_mutable::<Counter>().await.unwrap();
        for value in 1..=3 {
            counter.write().value = value;
            let calls = calls.clone();
            store
                .update(
                    &counter,
                    move |committed: Counter| async move {
                        calls.lock().push(committed.value);
                        Ok(())
                    },
                    false,
                )
                .await
                .unwrap();
        }
        store.commit().await.unwrap();

        // First registration wins, but it sees the committed state.
        assert_eq!(*calls.lock(), vec![3]);
        assert_eq!(db.row("Counter").unwrap().content["value"], 3);
        assert_eq!(store.state(), UnitOfWorkState::Committed);
    }

    #[tokio::test]
    async fn test_hooks_of_distinct_types_run_in_order() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());
        let order = Arc::new(Mutex::new(Vec::new()));

        let flags = store.get_mutable::<Flags>().await.unwrap();
        let counter = store.get_mutable::<Counter>().await.unwrap();

        let o = order.clone();
        store
            .update(&flags, move |_| async move {
                o.lock().push("flags");
                Ok(())
            }, false)
            .await
            .unwrap();
        let o = order.clone();
        store
            .update(&counter, move |_| async move {
                o.lock().push("counter");
                Ok(())
            }, false)
            .await
            .unwrap();
        let o = order.clone();
        store.after_commit_success::<Counter, _, _>(move || async move {
            o.lock().push("ignored");
            Ok(())
        });

        store.commit().await.unwrap();
        assert_eq!(*order.lock(), vec!["flags", "counter"]);
    }

    #[tokio::test]
    async fn test_conflict_without_failure_hook_propagates_original() {
        let db = InMemoryDocumentDb::new();
        let mut first = DocumentStore::new(db.session());
        let mut second = DocumentStore::new(db.session());

        let a = first.get_mutable::<Counter>().await.unwrap();
        let b = second.get_mutable::<Counter>().await.unwrap();
        a.write().value = 1;
        b.write().value = 2;

        first.update(&a, noop, true).await.unwrap();
        first.commit().await.unwrap();

        // Schedule the write without registering any failure hook.
        second.pending.push(PendingSave {
            type_id: TypeId::of::<Counter>(),
            document_type: Counter::document_type(),
            snapshot: Box::new(|| -> DocumentResult<Value> { Ok(serde_json::json!({"value": 2})) }),
            expected_version: Some(NEW_DOCUMENT_VERSION),
        });
        let err = second.commit().await.unwrap_err();

        assert!(matches!(
            err,
            DocumentError::Session(SessionError::ConcurrencyConflict { expected: 0, actual: 1, .. })
        ));
        assert_eq!(second.state(), UnitOfWorkState::Conflicted);
        assert_eq!(db.row("Counter").unwrap().content["value"], 1);
    }

    #[tokio::test]
    async fn test_conflict_with_failure_hook_is_translated() {
        let db = InMemoryDocumentDb::new();
        let mut first = DocumentStore::new(db.session());
        let mut second = DocumentStore::new(db.session());

        let a = first.get_mutable::<Counter>().await.unwrap();
        let b = second.get_mutable::<Counter>().await.unwrap();

        first.update(&a, noop, true).await.unwrap();
        second.update(&b, noop, true).await.unwrap();
        first.commit().await.unwrap();

        let err = second.commit().await.unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Concurrency { ref document_type } if document_type == "Counter"
        ));
    }

    #[tokio::test]
    async fn test_failure_hook_can_suppress_conflict() {
        let db = InMemoryDocumentDb::new();
        let mut first = DocumentStore::new(db.session());
        let mut second = DocumentStore::new(db.session());

        let a = first.get_mutable::<Counter>().await.unwrap();
        let b = second.get_mutable::<Counter>().await.unwrap();
        first.update(&a, noop, true).await.unwrap();

        let handled = Arc::new(Mutex::new(false));
        let flag = handled.clone();
        second.after_commit_failure::<Counter, _, _>(move || async move {
            *flag.lock() = true;
            Ok(())
        });
        second.update(&b, noop, true).await.unwrap();
        first.commit().await.unwrap();

        second.commit().await.unwrap();
        assert!(*handled.lock());
        assert_eq!(second.state(), UnitOfWorkState::Conflicted);
    }

    #[tokio::test]
    async fn test_unchecked_update_overwrites() {
        let db = InMemoryDocumentDb::new();
        let mut first = DocumentStore::new(db.session());
        let mut second = DocumentStore::new(db.session());

        let a = first.get_mutable::<Counter>().await.unwrap();
        let b = second.get_mutable::<Counter>().await.unwrap();
        a.write().value = 1;
        b.write().value = 2;

        first.update(&a, noop, false).await.unwrap();
        second.update(&b, noop, false).await.unwrap();
        first.commit().await.unwrap();
        second.commit().await.unwrap();

        assert_eq!(db.row("Counter").unwrap().content["value"], 2);
    }

    #[tokio::test]
    async fn test_cancel_persists_nothing_and_closes() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());
        let counter = store.get_mutable::<Counter>().await.unwrap();
        store.update(&counter, noop, false).await.unwrap();

        store.cancel().await.unwrap();

        assert!(db.is_empty());
        assert_eq!(store.state(), UnitOfWorkState::Canceled);
        assert!(matches!(
            store.get_mutable::<Counter>().await,
            Err(DocumentError::Closed(UnitOfWorkState::Canceled))
        ));
        assert!(store.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_commit_without_transaction_is_a_no_op() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        store.after_commit_success::<Counter, _, _>(move || async move {
            *flag.lock() = true;
            Ok(())
        });

        store.commit().await.unwrap();

        assert!(!*ran.lock());
        assert_eq!(store.state(), UnitOfWorkState::Committed);
    }

    #[tokio::test]
    async fn test_failing_success_hook_short_circuits() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());
        let ran = Arc::new(Mutex::new(false));

        let flags = store.get_mutable::<Flags>().await.unwrap();
        let counter = store.get_mutable::<Counter>().await.unwrap();
        store
            .update(&flags, |_| async { Err(DocumentError::Serialization("boom".into())) }, false)
            .await
            .unwrap();
        let flag = ran.clone();
        store
            .update(&counter, move |_| async move {
                *flag.lock() = true;
                Ok(())
            }, false)
            .await
            .unwrap();

        let err = store.commit().await.unwrap_err();
        assert!(matches!(err, DocumentError::Serialization(_)));
        assert!(!*ran.lock());
        // The write itself is durable.
        assert!(db.row("Flags").is_some());
    }

    struct BrokenSession;

    #[async_trait]
    impl DocumentSession for BrokenSession {
        async fn query(&mut self, _: &str) -> Result<Option<StoredDocument>, SessionError> {
            Ok(None)
        }

        fn detach(&mut self, _: &str) {}

        async fn save(&mut self, _: &str, _: Value, _: Option<u64>) -> Result<(), SessionError> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), SessionError> {
            Err(SessionError::Storage("disk full".to_string()))
        }

        async fn cancel(&mut self) -> Result<(), SessionError> {
            Ok(())
        }

        fn in_transaction(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_other_commit_errors_propagate() {
        let mut store = DocumentStore::new(BrokenSession);
        let counter = store.get_mutable::<Counter>().await.unwrap();
        let handled = Arc::new(Mutex::new(false));
        let flag = handled.clone();
        store.after_commit_failure::<Counter, _, _>(move || async move {
            *flag.lock() = true;
            Ok(())
        });
        store.update(&counter, noop, true).await.unwrap();

        let err = store.commit().await.unwrap_err();

        assert!(matches!(err, DocumentError::Session(SessionError::Storage(_))));
        assert!(!*handled.lock());
        assert_eq!(store.state(), UnitOfWorkState::Failed);
    }

    #[tokio::test]
    async fn test_updating_flag_is_scope_local() {
        let db = InMemoryDocumentDb::new();
        let mut store = DocumentStore::new(db.session());
        store.mark_updating::<Counter>();

        let other = DocumentStore::new(db.session());
        assert!(store.is_updating::<Counter>());
        assert!(!store.is_updating::<Flags>());
        assert!(!other.is_updating::<Counter>());
    }
}
