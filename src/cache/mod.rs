//! The public cache client.

use crate::codec::{
    decode_entity, decode_string, encode_entity, encode_string, CodecRegistry, ValueCodec,
};
use crate::config::CacheConfig;
use crate::error::{CodecError, Error, Result};
use crate::health::HealthState;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::namespace::KeyNamespacer;
use crate::pipeline::{BatchPipeline, MutationFuture};
use crate::request::{
    AddScoredRequest, DeleteEntryRequest, DeleteMapOfEntitiesRequest,
    GetEntityRequest, GetMapOfEntitiesRequest, GetScoredEntitiesRequest, GetScoredStringsRequest,
    GetStringRequest, PutMapOfEntitiesRequest, PutRequest, PutStringRequest,
};
use crate::scan::ScanDecoder;
use crate::scored::ScoredCollectionAdapter;
use crate::store::{BatchCommand, StoreFacade};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Caching client over a key-value/sorted-set store.
///
/// Every mutation has a synchronous form that awaits the store directly
/// and an `_async` form that joins the shared batch and returns a
/// [`MutationFuture`] resolving once that batch executes.
///
/// Keys are namespaced once per call according to the request's
/// `namespace_enabled` flag. Requests missing a key or value fail before
/// the store is touched.
pub struct IgniteCache {
    config: CacheConfig,
    store: Arc<dyn StoreFacade>,
    namespacer: KeyNamespacer,
    codec: Arc<dyn ValueCodec>,
    pipeline: BatchPipeline,
    scored: ScoredCollectionAdapter,
    scanner: ScanDecoder,
    metrics: Arc<CacheMetrics>,
    pub(crate) health: HealthState,
}

impl IgniteCache {
    /// Create a client with the built-in codecs.
    ///
    /// Must be called from within a Tokio runtime; retired batches execute
    /// on that runtime.
    pub fn new(config: CacheConfig, store: Arc<dyn StoreFacade>) -> Result<Self> {
        Self::with_codec_registry(config, store, &CodecRegistry::default())
    }

    /// Create a client resolving its entity codec from `registry`.
    pub fn with_codec_registry(
        config: CacheConfig,
        store: Arc<dyn StoreFacade>,
        registry: &CodecRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let codec = registry.resolve(&config.codec)?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("cache client needs a tokio runtime: {}", e)))?;

        let metrics = Arc::new(CacheMetrics::new());
        let namespacer = KeyNamespacer::from_config(&config);
        let pipeline =
            BatchPipeline::new(store.clone(), config.batch_size, metrics.clone(), runtime);
        let scored = ScoredCollectionAdapter::new(store.clone());
        let scanner = ScanDecoder::new(store.clone(), config.scan_limit, metrics.clone());

        info!(
            batch_size = config.batch_size,
            scan_limit = scanner.limit(),
            namespace = namespacer.prefix().unwrap_or(""),
            codec = codec.name(),
            "Started cache client"
        );

        Ok(Self {
            config,
            store,
            namespacer,
            codec,
            pipeline,
            scored,
            scanner,
            metrics,
            health: HealthState::default(),
        })
    }

    // ==================== Strings ====================

    /// Read a string value.
    pub async fn get_string(&self, request: &GetStringRequest) -> Result<Option<String>> {
        let key = self.key(request.checked()?, request.namespace_enabled);
        self.read_string(&key).await
    }

    /// Read a string value under the configured namespace.
    pub async fn get_string_by_key(&self, key: &str) -> Result<Option<String>> {
        self.read_string(&self.key(key, true)).await
    }

    /// Write a string value. Returns whether the write applied, which is
    /// only ever `false` for a compare-and-set.
    pub async fn put_string(&self, request: &PutStringRequest) -> Result<bool> {
        let (key, value, expected) = self.string_put_parts(request)?;
        self.put_bytes(&key, value, request.ttl, expected).await
    }

    /// Queue a string write on the shared batch.
    pub fn put_string_async(&self, request: &PutStringRequest) -> Result<MutationFuture> {
        let (key, value, expected) = self.string_put_parts(request)?;
        let command = put_command(key, value, request.ttl, expected);
        self.pipeline.enqueue(command, request.mutation_id.clone())
    }

    // ==================== Entities ====================

    /// Read and decode an entity.
    pub async fn get_entity<T: DeserializeOwned>(
        &self,
        request: &GetEntityRequest,
    ) -> Result<Option<T>> {
        let key = self.key(request.checked()?, request.namespace_enabled);
        self.read_entity(&key).await
    }

    /// Read an entity under the configured namespace.
    pub async fn get_entity_by_key<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.read_entity(&self.key(key, true)).await
    }

    /// Encode and write an entity.
    pub async fn put_entity<T: Serialize>(&self, request: &PutRequest<T>) -> Result<bool> {
        let (key, value, expected) = self.entity_put_parts(request)?;
        self.put_bytes(&key, value, request.ttl, expected).await
    }

    /// Queue an entity write on the shared batch.
    pub fn put_entity_async<T: Serialize>(&self, request: &PutRequest<T>) -> Result<MutationFuture> {
        let (key, value, expected) = self.entity_put_parts(request)?;
        let command = put_command(key, value, request.ttl, expected);
        self.pipeline.enqueue(command, request.mutation_id.clone())
    }

    // ==================== Scored collections ====================

    /// Add a string to a scored collection.
    pub async fn add_scored_string(&self, request: &AddScoredRequest<String>) -> Result<bool> {
        let (key, value) = self.scored_parts(request, |v| Ok(encode_string(v)))?;
        self.scored.add(&key, request.score, value).await
    }

    /// Queue a scored string insert. The future fails if the member was already present.
    pub fn add_scored_string_async(
        &self,
        request: &AddScoredRequest<String>,
    ) -> Result<MutationFuture> {
        let (key, value) = self.scored_parts(request, |v| Ok(encode_string(v)))?;
        let command = ScoredCollectionAdapter::add_command(key, request.score, value);
        self.pipeline.enqueue(command, request.mutation_id.clone())
    }

    /// Read a window of strings from a scored collection.
    pub async fn get_scored_strings(&self, request: &GetScoredStringsRequest) -> Result<Vec<String>> {
        let key = self.key(request.checked()?, request.namespace_enabled);
        self.scored
            .range(&key, request.range())
            .await?
            .into_iter()
            .map(|entry| decode_string(&entry.value).map_err(Error::from))
            .collect()
    }

    /// Add an entity to a scored collection.
    pub async fn add_scored_entity<T: Serialize>(
        &self,
        request: &AddScoredRequest<T>,
    ) -> Result<bool> {
        let codec = self.codec.as_ref();
        let (key, value) = self.scored_parts(request, |v| Ok(encode_entity(codec, v)?))?;
        self.scored.add(&key, request.score, value).await
    }

    /// Queue a scored entity insert. The future fails if the member was already present.
    pub fn add_scored_entity_async<T: Serialize>(
        &self,
        request: &AddScoredRequest<T>,
    ) -> Result<MutationFuture> {
        let codec = self.codec.as_ref();
        let (key, value) = self.scored_parts(request, |v| Ok(encode_entity(codec, v)?))?;
        let command = ScoredCollectionAdapter::add_command(key, request.score, value);
        self.pipeline.enqueue(command, request.mutation_id.clone())
    }

    /// Read a window of entities from a scored collection.
    pub async fn get_scored_entities<T: DeserializeOwned>(
        &self,
        request: &GetScoredEntitiesRequest,
    ) -> Result<Vec<T>> {
        let key = self.key(request.checked()?, request.namespace_enabled);
        let codec = self.codec.as_ref();
        self.scored
            .range(&key, request.range())
            .await?
            .into_iter()
            .map(|entry| decode_entity(codec, &entry.value).map_err(Error::from))
            .collect()
    }

    // ==================== Deletes ====================

    /// Delete a single value. Returns whether it existed.
    pub async fn delete(&self, request: &DeleteEntryRequest) -> Result<bool> {
        let key = self.key(request.checked()?, request.namespace_enabled);
        self.remove(&key).await
    }

    /// Delete a single value under the configured namespace.
    pub async fn delete_by_key(&self, key: &str) -> Result<bool> {
        self.remove(&self.key(key, true)).await
    }

    /// Queue a delete on the shared batch.
    pub fn delete_async(&self, request: &DeleteEntryRequest) -> Result<MutationFuture> {
        let key = self.key(request.checked()?, request.namespace_enabled);
        self.pipeline
            .enqueue(BatchCommand::Delete { key }, request.mutation_id.clone())
    }

    // ==================== Maps ====================

    /// Store every entry of a map of entities under one key.
    pub async fn put_map_of_entities<T: Serialize>(
        &self,
        request: &PutMapOfEntitiesRequest<T>,
    ) -> Result<()> {
        let (key, entries) = request.checked()?;
        let key = self.key(key, request.namespace_enabled);

        let codec = self.codec.as_ref();
        let encoded = entries
            .iter()
            .map(|(field, entity)| Ok((field.clone(), encode_entity(codec, entity)?)))
            .collect::<std::result::Result<HashMap<_, _>, CodecError>>()?;

        debug!(key = %key, fields = encoded.len(), "Putting map of entities");
        self.store.map_put_all(&key, encoded).await?;
        Ok(())
    }

    /// Read the requested fields of a map, or the whole map when none are listed.
    pub async fn get_map_of_entities<T: DeserializeOwned>(
        &self,
        request: &GetMapOfEntitiesRequest,
    ) -> Result<HashMap<String, T>> {
        let key = self.key(request.checked()?, request.namespace_enabled);
        let raw = if request.fields.is_empty() {
            debug!(key = %key, "Reading whole map");
            self.store.map_read_all(&key).await?
        } else {
            debug!(key = %key, fields = ?request.fields, "Reading map fields");
            self.store.map_get_all(&key, &request.fields).await?
        };

        let codec = self.codec.as_ref();
        raw.into_iter()
            .map(|(field, value)| Ok((field, decode_entity(codec, &value)?)))
            .collect::<std::result::Result<_, CodecError>>()
            .map_err(Error::from)
    }

    /// Remove the requested fields of a map, or the whole map when none are listed.
    pub async fn delete_map_of_entities(&self, request: &DeleteMapOfEntitiesRequest) -> Result<()> {
        let key = self.key(request.checked()?, request.namespace_enabled);
        if request.fields.is_empty() {
            debug!(key = %key, "Deleting whole map");
            self.store.map_delete(&key).await?;
        } else {
            let removed = self.store.map_remove_fields(&key, &request.fields).await?;
            debug!(key = %key, removed, "Removed map fields");
        }
        Ok(())
    }

    // ==================== Scans ====================

    /// Decode every single value whose key fully matches the regular
    /// expression `pattern`.
    ///
    /// The pattern is namespaced unless `namespace_enabled` is `Some(false)`.
    pub async fn scan_entities<T: DeserializeOwned>(
        &self,
        pattern: &str,
        namespace_enabled: Option<bool>,
    ) -> Result<HashMap<String, T>> {
        let pattern = self.key(pattern, namespace_enabled.unwrap_or(true));
        let codec = self.codec.as_ref();
        self.scanner
            .scan_all(&pattern, |raw| decode_entity(codec, raw))
            .await
    }

    // ==================== Lifecycle ====================

    /// Flush the current batch and wait for every retired batch to execute.
    pub async fn shutdown(&self) {
        info!(pending = self.pipeline.pending(), "Shutting down cache client");
        self.pipeline.shutdown().await;
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Operations waiting in the current batch.
    pub fn pending_operations(&self) -> usize {
        self.pipeline.pending()
    }

    // ==================== Internals ====================

    fn key(&self, key: &str, namespace_enabled: bool) -> String {
        self.namespacer.resolve(key, namespace_enabled)
    }

    async fn read_string(&self, key: &str) -> Result<Option<String>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(decode_string(&raw)?)),
            None => Ok(None),
        }
    }

    async fn read_entity<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(decode_entity(self.codec.as_ref(), &raw)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let existed = self.store.delete(key).await?;
        debug!(key, existed, "Deleted value");
        Ok(existed)
    }

    async fn put_bytes(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        expected: Option<Bytes>,
    ) -> Result<bool> {
        match expected {
            Some(expected) => {
                let applied = self.store.compare_and_set(key, expected, value).await?;
                debug!(key, applied, "Compare-and-set");
                Ok(applied)
            }
            None => {
                self.store.set(key, value, ttl).await?;
                debug!(key, ttl_ms = ttl.map(|t| t.as_millis() as u64), "Put value");
                Ok(true)
            }
        }
    }

    fn string_put_parts(&self, request: &PutStringRequest) -> Result<PutParts> {
        let (key, value) = request.checked()?;
        Ok((
            self.key(key, request.namespace_enabled),
            encode_string(value),
            request.expected_value.as_deref().map(encode_string),
        ))
    }

    fn entity_put_parts<T: Serialize>(&self, request: &PutRequest<T>) -> Result<PutParts> {
        let (key, value) = request.checked()?;
        let codec = self.codec.as_ref();
        let expected = match &request.expected_value {
            Some(expected) => Some(encode_entity(codec, expected)?),
            None => None,
        };
        Ok((
            self.key(key, request.namespace_enabled),
            encode_entity(codec, value)?,
            expected,
        ))
    }

    fn scored_parts<T>(
        &self,
        request: &AddScoredRequest<T>,
        encode: impl FnOnce(&T) -> Result<Bytes>,
    ) -> Result<(String, Bytes)> {
        let (key, value) = request.checked()?;
        Ok((self.key(key, request.namespace_enabled), encode(value)?))
    }
}

/// Namespaced key, encoded value and encoded expected value.
type PutParts = (String, Bytes, Option<Bytes>);

fn put_command(key: String, value: Bytes, ttl: Option<Duration>, expected: Option<Bytes>) -> BatchCommand {
    match expected {
        Some(expected) => BatchCommand::CompareAndSet {
            key,
            expected,
            value,
        },
        None => BatchCommand::Set { key, value, ttl },
    }
}

impl std::fmt::Debug for IgniteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgniteCache")
            .field("namespace", &self.namespacer.prefix())
            .field("codec", &self.codec.name())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::store::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Vehicle {
        vin: String,
        speed: u32,
    }

    fn vehicle(vin: &str, speed: u32) -> Vehicle {
        Vehicle {
            vin: vin.to_string(),
            speed,
        }
    }

    fn cache(store: &MemoryStore, namespace: Option<&str>) -> IgniteCache {
        let mut config = CacheConfig::new().with_batch_size(2);
        if let Some(ns) = namespace {
            config = config.with_namespace(ns);
        }
        IgniteCache::new(config, Arc::new(store.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_string_with_namespace() {
        let store = MemoryStore::new();
        let cache = cache(&store, Some("ns"));

        cache
            .put_string(&PutStringRequest::new().with_key("k").with_value("v"))
            .await
            .unwrap();

        assert_eq!(store.get("ns:k").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(cache.get_string_by_key("k").await.unwrap().as_deref(), Some("v"));

        let raw = GetStringRequest::new()
            .with_key("ns:k")
            .with_namespace_enabled(false);
        assert_eq!(cache.get_string(&raw).await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_put_string_compare_and_set() {
        let store = MemoryStore::new();
        let cache = cache(&store, None);
        cache
            .put_string(&PutStringRequest::new().with_key("k").with_value("cur"))
            .await
            .unwrap();

        let stale = PutStringRequest::new()
            .with_key("k")
            .with_value("new")
            .if_current_matches("old");
        assert!(!cache.put_string(&stale).await.unwrap());

        let fresh = PutStringRequest::new()
            .with_key("k")
            .with_value("new")
            .if_current_matches("cur");
        assert!(cache.put_string(&fresh).await.unwrap());
        assert_eq!(cache.get_string_by_key("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_entity_round_trip() {
        let store = MemoryStore::new();
        let cache = cache(&store, Some("fleet"));

        cache
            .put_entity(&PutRequest::<Vehicle>::new().with_key("car").with_value(vehicle("V1", 80)))
            .await
            .unwrap();
        let back: Option<Vehicle> = cache.get_entity_by_key("car").await.unwrap();
        assert_eq!(back, Some(vehicle("V1", 80)));

        let missing: Option<Vehicle> = cache.get_entity_by_key("bike").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_missing_key_fails_validation() {
        let store = MemoryStore::new();
        let cache = cache(&store, None);

        let err = cache
            .put_string(&PutStringRequest::new().with_value("v"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingKey { .. })
        ));

        let err = cache
            .put_string_async(&PutStringRequest::new().with_key("k"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingValue { .. })
        ));
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_scored_strings() {
        let store = MemoryStore::new();
        let cache = cache(&store, None);

        for (score, name) in [(2.0, "B"), (1.0, "A")] {
            cache
                .add_scored_string(
                    &AddScoredRequest::<String>::new()
                        .with_key("presidents")
                        .with_score(score)
                        .with_value(name),
                )
                .await
                .unwrap();
        }

        let window = GetScoredStringsRequest::new()
            .with_key("presidents")
            .with_start_index(0)
            .with_end_index(1);
        assert_eq!(cache.get_scored_strings(&window).await.unwrap(), vec!["A", "B"]);

        let reversed = window.from_reverse_index();
        assert_eq!(cache.get_scored_strings(&reversed).await.unwrap(), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_async_put_resolves_with_mutation_id() {
        let store = MemoryStore::new();
        let cache = cache(&store, None);

        let first = cache
            .put_string_async(
                &PutStringRequest::new()
                    .with_key("a")
                    .with_value("1")
                    .with_mutation_id("m-1"),
            )
            .unwrap();
        let second = cache
            .delete_async(&DeleteEntryRequest::new().with_key("b").with_mutation_id("m-2"))
            .unwrap();

        assert_eq!(first.await.unwrap().as_deref(), Some("m-1"));
        assert_eq!(second.await.unwrap().as_deref(), Some("m-2"));
        assert_eq!(cache.get_string_by_key("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_map_of_entities() {
        let store = MemoryStore::new();
        let cache = cache(&store, Some("ns"));

        let mut fleet = HashMap::new();
        fleet.insert("a".to_string(), vehicle("A", 1));
        fleet.insert("b".to_string(), vehicle("B", 2));
        cache
            .put_map_of_entities(&PutMapOfEntitiesRequest::new().with_key("fleet").with_value(fleet))
            .await
            .unwrap();

        let all: HashMap<String, Vehicle> = cache
            .get_map_of_entities(&GetMapOfEntitiesRequest::new().with_key("fleet"))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let only_a: HashMap<String, Vehicle> = cache
            .get_map_of_entities(&GetMapOfEntitiesRequest::new().with_key("fleet").with_fields(["a"]))
            .await
            .unwrap();
        assert_eq!(only_a["a"], vehicle("A", 1));
        assert_eq!(only_a.len(), 1);

        cache
            .delete_map_of_entities(&DeleteMapOfEntitiesRequest::new().with_key("fleet").with_fields(["a"]))
            .await
            .unwrap();
        let rest: HashMap<String, Vehicle> = cache
            .get_map_of_entities(&GetMapOfEntitiesRequest::new().with_key("fleet"))
            .await
            .unwrap();
        assert_eq!(rest.keys().collect::<Vec<_>>(), vec!["b"]);

        cache
            .delete_map_of_entities(&DeleteMapOfEntitiesRequest::new().with_key("fleet"))
            .await
            .unwrap();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_scan_entities_namespaces_pattern() {
        let store = MemoryStore::new();
        let cache = cache(&store, Some("ns"));

        for i in 0..3 {
            cache
                .put_entity(
                    &PutRequest::<Vehicle>::new()
                        .with_key(format!("car:{}", i))
                        .with_value(vehicle(&format!("V{}", i), i)),
                )
                .await
                .unwrap();
        }

        let found: HashMap<String, Vehicle> = cache.scan_entities("car:.*", None).await.unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found["ns:car:1"], vehicle("V1", 1));

        let raw: HashMap<String, Vehicle> =
            cache.scan_entities("car:.*", Some(false)).await.unwrap();
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_codec_is_fatal() {
        let config = CacheConfig::new().with_codec("com.example.Missing");
        let result = IgniteCache::new(config, Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
