//! Cached access to a document through a unit of work.

use crate::document::{Document, Tracked};
use crate::error::DocumentResult;
use crate::store::DocumentStore;
use keystone_cache::DocumentCache;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Caching policy of a [`DocumentManager`].
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    /// Expiration of the cached entry; `None` keeps it until invalidated.
    pub expiration: Option<Duration>,
    /// Reject commits when the row changed since it was loaded.
    pub check_concurrency: bool,
    /// Cache key; defaults to the document type name.
    pub cache_key: Option<String>,
    /// Tags attached to the cache entry for bulk invalidation.
    pub tags: Vec<String>,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            expiration: None,
            check_concurrency: true,
            cache_key: None,
            tags: Vec::new(),
        }
    }
}

impl DocumentOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache entry expiration.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Enable or disable optimistic concurrency checks.
    pub fn with_check_concurrency(mut self, check: bool) -> Self {
        self.check_concurrency = check;
        self
    }

    /// Override the cache key.
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Add a tag to the cache entry.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Reads `T` from the cache when possible and keeps the cache in step with
/// committed writes.
///
/// Within a unit of work that is updating `T`, reads observe the in-flight
/// mutable instance instead of the cached snapshot.
pub struct DocumentManager<T> {
    cache: Arc<DocumentCache>,
    options: DocumentOptions,
    _document: PhantomData<fn() -> T>,
}

impl<T> Clone for DocumentManager<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            options: self.options.clone(),
            _document: PhantomData,
        }
    }
}

impl<T: Document> DocumentManager<T> {
    /// Create a manager with default options.
    pub fn new(cache: Arc<DocumentCache>) -> Self {
        Self::with_options(cache, DocumentOptions::default())
    }

    /// Create a manager with explicit options.
    pub fn with_options(cache: Arc<DocumentCache>, options: DocumentOptions) -> Self {
        Self {
            cache,
            options,
            _document: PhantomData,
        }
    }

    /// Caching policy in use.
    pub fn options(&self) -> &DocumentOptions {
        &self.options
    }

    /// Key of the cached entry.
    pub fn cache_key(&self) -> &str {
        self.options
            .cache_key
            .as_deref()
            .unwrap_or_else(|| T::document_type())
    }

    /// Read a snapshot of `T`, defaulting to `T::default()`.
    pub async fn get_or_create_immutable(&self, store: &mut DocumentStore) -> DocumentResult<T> {
        self.get_or_create_immutable_with(store, T::default).await
    }

    /// Read a snapshot of `T`, building it with `factory` when nothing is stored.
    pub async fn get_or_create_immutable_with<F>(
        &self,
        store: &mut DocumentStore,
        factory: F,
    ) -> DocumentResult<T>
    where
        F: FnOnce() -> T,
    {
        if store.is_updating::<T>() {
            let tracked = store.get_mutable_with(factory).await?;
            return Ok(tracked.snapshot());
        }

        let key = self.cache_key();
        match self.cache.get::<T>(key).await {
            Ok(Some(document)) => return Ok(document),
            Ok(None) => debug!(key = %key, "Document cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Document cache read failed"),
        }

        // A fill never overwrites an entry committed while this one was loading.
        let document = store.get_immutable_with(factory).await?;
        if let Err(e) = self.cache.fill(key, &document, self.options.expiration, &self.tags()).await {
            warn!(key = %key, error = %e, "Document cache fill failed");
        }
        Ok(document)
    }

    /// Load the mutable instance of `T` and route later reads in this unit of
    /// work to it.
    pub async fn get_or_create_mutable(&self, store: &mut DocumentStore) -> DocumentResult<Tracked<T>> {
        self.get_or_create_mutable_with(store, T::default).await
    }

    /// Like [`DocumentManager::get_or_create_mutable`] with a custom factory.
    pub async fn get_or_create_mutable_with<F>(
        &self,
        store: &mut DocumentStore,
        factory: F,
    ) -> DocumentResult<Tracked<T>>
    where
        F: FnOnce() -> T,
    {
        let tracked = store.get_mutable_with(factory).await?;
        store.mark_updating::<T>();
        Ok(tracked)
    }

    /// Schedule `document` for persistence; the cache is refreshed on every
    /// node once the unit of work commits.
    pub async fn update(&self, store: &mut DocumentStore, document: &Tracked<T>) -> DocumentResult<()> {
        let cache = self.cache.clone();
        let key = self.cache_key().to_string();
        let expiration = self.options.expiration;
        let tags = self.options.tags.clone();

        store
            .update(
                document,
                move |committed: T| async move {
                    let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
                    cache.set(&key, &committed, expiration, &tags).await?;
                    Ok(())
                },
                self.options.check_concurrency,
            )
            .await
    }

    /// Drop the cached entry on every node.
    pub async fn invalidate(&self) -> DocumentResult<()> {
        self.cache.remove(self.cache_key()).await?;
        Ok(())
    }

    fn tags(&self) -> Vec<&str> {
        self.options.tags.iter().map(String::as_str).collect()
    }
}
