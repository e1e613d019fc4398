//! Request types accepted by [`IgniteCache`](crate::IgniteCache).
//!
//! Requests are built fluently and validated before the store is touched.
//! Keys and values are optional so that an incomplete request can be
//! reported as a [`ValidationError`] instead of failing at compile time in
//! generic callers.

use crate::error::ValidationError;
use crate::types::RangeSpec;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Requests that carry mandatory fields.
///
/// The client reads mandatory fields through each request's `checked()`,
/// which `validate` wraps.
pub trait Validate {
    /// Check mandatory fields.
    fn validate(&self) -> Result<(), ValidationError>;
}

fn require_key<'a>(
    key: &'a Option<String>,
    request: &'static str,
) -> Result<&'a str, ValidationError> {
    key.as_deref()
        .ok_or(ValidationError::MissingKey { request })
}

fn require_value<'a, T>(
    value: &'a Option<T>,
    request: &'static str,
) -> Result<&'a T, ValidationError> {
    value
        .as_ref()
        .ok_or(ValidationError::MissingValue { request })
}

/// Write a single value, optionally with a TTL or as a compare-and-set.
#[derive(Debug, Clone)]
pub struct PutRequest<T> {
    pub key: Option<String>,
    pub value: Option<T>,
    /// Expiry; `None` stores the value without one.
    pub ttl: Option<Duration>,
    /// When present the write only applies if the stored value equals this.
    pub expected_value: Option<T>,
    pub mutation_id: Option<String>,
    pub namespace_enabled: bool,
}

impl<T> Default for PutRequest<T> {
    fn default() -> Self {
        Self {
            key: None,
            value: None,
            ttl: None,
            expected_value: None,
            mutation_id: None,
            namespace_enabled: true,
        }
    }
}

impl<T> PutRequest<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<T>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Turn the write into a compare-and-set against `expected`.
    pub fn if_current_matches(mut self, expected: impl Into<T>) -> Self {
        self.expected_value = Some(expected.into());
        self
    }

    pub fn with_mutation_id(mut self, mutation_id: impl Into<String>) -> Self {
        self.mutation_id = Some(mutation_id.into());
        self
    }

    pub fn with_namespace_enabled(mut self, enabled: bool) -> Self {
        self.namespace_enabled = enabled;
        self
    }
}

impl<T> PutRequest<T> {
    pub(crate) fn checked(&self) -> Result<(&str, &T), ValidationError> {
        Ok((require_key(&self.key, "put")?, require_value(&self.value, "put")?))
    }
}

impl<T> Validate for PutRequest<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.checked().map(|_| ())
    }
}

/// Put request for plain strings.
pub type PutStringRequest = PutRequest<String>;

/// Put request for codec-encoded entities.
pub type PutEntityRequest<T> = PutRequest<T>;

/// Read a single value.
#[derive(Debug, Clone)]
pub struct GetRequest {
    pub key: Option<String>,
    pub namespace_enabled: bool,
}

impl Default for GetRequest {
    fn default() -> Self {
        Self {
            key: None,
            namespace_enabled: true,
        }
    }
}

impl GetRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_namespace_enabled(mut self, enabled: bool) -> Self {
        self.namespace_enabled = enabled;
        self
    }
}

impl GetRequest {
    pub(crate) fn checked(&self) -> Result<&str, ValidationError> {
        require_key(&self.key, "get")
    }
}

impl Validate for GetRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        self.checked().map(|_| ())
    }
}

pub type GetStringRequest = GetRequest;
pub type GetEntityRequest = GetRequest;

/// Add a value to a scored collection.
#[derive(Debug, Clone)]
pub struct AddScoredRequest<T> {
    pub key: Option<String>,
    pub score: f64,
    pub value: Option<T>,
    pub mutation_id: Option<String>,
    pub namespace_enabled: bool,
}

impl<T> Default for AddScoredRequest<T> {
    fn default() -> Self {
        Self {
            key: None,
            score: 0.0,
            value: None,
            mutation_id: None,
            namespace_enabled: true,
        }
    }
}

impl<T> AddScoredRequest<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_value(mut self, value: impl Into<T>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_mutation_id(mut self, mutation_id: impl Into<String>) -> Self {
        self.mutation_id = Some(mutation_id.into());
        self
    }

    pub fn with_namespace_enabled(mut self, enabled: bool) -> Self {
        self.namespace_enabled = enabled;
        self
    }
}

impl<T> AddScoredRequest<T> {
    pub(crate) fn checked(&self) -> Result<(&str, &T), ValidationError> {
        Ok((
            require_key(&self.key, "add scored")?,
            require_value(&self.value, "add scored")?,
        ))
    }
}

impl<T> Validate for AddScoredRequest<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.checked().map(|_| ())
    }
}

pub type AddScoredStringRequest = AddScoredRequest<String>;
pub type AddScoredEntityRequest<T> = AddScoredRequest<T>;

/// Read a position window from a scored collection.
#[derive(Debug, Clone)]
pub struct GetScoredRequest {
    pub key: Option<String>,
    pub start_index: i64,
    pub end_index: i64,
    pub reversed: bool,
    pub namespace_enabled: bool,
}

impl Default for GetScoredRequest {
    fn default() -> Self {
        Self {
            key: None,
            start_index: 0,
            end_index: 0,
            reversed: false,
            namespace_enabled: true,
        }
    }
}

impl GetScoredRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_start_index(mut self, start: i64) -> Self {
        self.start_index = start;
        self
    }

    pub fn with_end_index(mut self, end: i64) -> Self {
        self.end_index = end;
        self
    }

    /// Walk the collection from the highest score down.
    pub fn from_reverse_index(mut self) -> Self {
        self.reversed = true;
        self
    }

    pub fn with_namespace_enabled(mut self, enabled: bool) -> Self {
        self.namespace_enabled = enabled;
        self
    }

    /// The requested window.
    pub fn range(&self) -> RangeSpec {
        RangeSpec {
            start: self.start_index,
            end: self.end_index,
            reversed: self.reversed,
        }
    }
}

impl GetScoredRequest {
    pub(crate) fn checked(&self) -> Result<&str, ValidationError> {
        require_key(&self.key, "get scored")
    }
}

impl Validate for GetScoredRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        self.checked().map(|_| ())
    }
}

pub type GetScoredStringsRequest = GetScoredRequest;
pub type GetScoredEntitiesRequest = GetScoredRequest;

/// Delete a single value.
#[derive(Debug, Clone)]
pub struct DeleteEntryRequest {
    pub key: Option<String>,
    pub mutation_id: Option<String>,
    pub namespace_enabled: bool,
}

impl Default for DeleteEntryRequest {
    fn default() -> Self {
        Self {
            key: None,
            mutation_id: None,
            namespace_enabled: true,
        }
    }
}

impl DeleteEntryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_mutation_id(mut self, mutation_id: impl Into<String>) -> Self {
        self.mutation_id = Some(mutation_id.into());
        self
    }

    pub fn with_namespace_enabled(mut self, enabled: bool) -> Self {
        self.namespace_enabled = enabled;
        self
    }
}

impl DeleteEntryRequest {
    pub(crate) fn checked(&self) -> Result<&str, ValidationError> {
        require_key(&self.key, "delete")
    }
}

impl Validate for DeleteEntryRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        self.checked().map(|_| ())
    }
}

/// Store a map of entities under one key.
#[derive(Debug, Clone)]
pub struct PutMapOfEntitiesRequest<T> {
    pub key: Option<String>,
    pub value: Option<HashMap<String, T>>,
    pub namespace_enabled: bool,
}

impl<T> Default for PutMapOfEntitiesRequest<T> {
    fn default() -> Self {
        Self {
            key: None,
            value: None,
            namespace_enabled: true,
        }
    }
}

impl<T> PutMapOfEntitiesRequest<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: HashMap<String, T>) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_namespace_enabled(mut self, enabled: bool) -> Self {
        self.namespace_enabled = enabled;
        self
    }
}

impl<T> PutMapOfEntitiesRequest<T> {
    pub(crate) fn checked(&self) -> Result<(&str, &HashMap<String, T>), ValidationError> {
        Ok((require_key(&self.key, "put map")?, require_value(&self.value, "put map")?))
    }
}

impl<T> Validate for PutMapOfEntitiesRequest<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.checked().map(|_| ())
    }
}

/// Read or delete fields of a stored map. An empty field set addresses the whole map.
#[derive(Debug, Clone)]
pub struct MapFieldsRequest {
    pub key: Option<String>,
    pub fields: HashSet<String>,
    pub namespace_enabled: bool,
}

impl Default for MapFieldsRequest {
    fn default() -> Self {
        Self {
            key: None,
            fields: HashSet::new(),
            namespace_enabled: true,
        }
    }
}

impl MapFieldsRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_namespace_enabled(mut self, enabled: bool) -> Self {
        self.namespace_enabled = enabled;
        self
    }
}

impl MapFieldsRequest {
    pub(crate) fn checked(&self) -> Result<&str, ValidationError> {
        require_key(&self.key, "map fields")
    }
}

impl Validate for MapFieldsRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        self.checked().map(|_| ())
    }
}

pub type GetMapOfEntitiesRequest = MapFieldsRequest;
pub type DeleteMapOfEntitiesRequest = MapFieldsRequest;
