//! Value codecs and the registry that selects one by name.
//!
//! Strings are always stored as raw UTF-8. Entities go through a
//! [`ValueCodec`] chosen once at startup from [`CacheConfig::codec`](crate::CacheConfig).

use crate::error::{CodecError, Error, Result};
use bytes::Bytes;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::info;

/// Name of the default JSON codec.
pub const JSON_CODEC: &str = "json";

/// Name of the LZ4-framed JSON codec.
pub const JSON_LZ4_CODEC: &str = "json-lz4";

/// Encodes entity documents to stored bytes and back.
pub trait ValueCodec: Send + Sync + fmt::Debug {
    /// Registered name of this codec.
    fn name(&self) -> &'static str;

    /// Encode a document.
    fn encode(&self, value: &Value) -> std::result::Result<Bytes, CodecError>;

    /// Decode stored bytes into a document.
    fn decode(&self, raw: &[u8]) -> std::result::Result<Value, CodecError>;
}

/// Encode a typed entity with `codec`.
pub fn encode_entity<T: Serialize>(
    codec: &dyn ValueCodec,
    entity: &T,
) -> std::result::Result<Bytes, CodecError> {
    let doc = serde_json::to_value(entity)?;
    codec.encode(&doc)
}

/// Decode a typed entity with `codec`.
pub fn decode_entity<T: DeserializeOwned>(
    codec: &dyn ValueCodec,
    raw: &[u8],
) -> std::result::Result<T, CodecError> {
    let doc = codec.decode(raw)?;
    Ok(serde_json::from_value(doc)?)
}

/// Encode a string value.
pub fn encode_string(value: &str) -> Bytes {
    Bytes::copy_from_slice(value.as_bytes())
}

/// Decode a string value.
pub fn decode_string(raw: &[u8]) -> std::result::Result<String, CodecError> {
    Ok(String::from_utf8(raw.to_vec())?)
}

/// Plain JSON documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn name(&self) -> &'static str {
        JSON_CODEC
    }

    fn encode(&self, value: &Value) -> std::result::Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode(&self, raw: &[u8]) -> std::result::Result<Value, CodecError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// JSON documents wrapped in an LZ4 frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4JsonCodec;

impl ValueCodec for Lz4JsonCodec {
    fn name(&self) -> &'static str {
        JSON_LZ4_CODEC
    }

    fn encode(&self, value: &Value) -> std::result::Result<Bytes, CodecError> {
        let json = serde_json::to_vec(value)?;
        let mut encoder = FrameEncoder::new(Vec::with_capacity(json.len() / 2 + 16));
        encoder.write_all(&json)?;
        let compressed = encoder
            .finish()
            .map_err(|e| CodecError::Compression(std::io::Error::other(e)))?;
        Ok(Bytes::from(compressed))
    }

    fn decode(&self, raw: &[u8]) -> std::result::Result<Value, CodecError> {
        let mut decoder = FrameDecoder::new(raw);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Constructor registered for a codec name.
pub type CodecFactory = fn() -> Arc<dyn ValueCodec>;

/// Maps configured codec names to constructors.
///
/// Resolution happens once when the client starts; the resulting codec is
/// immutable afterwards.
#[derive(Clone)]
pub struct CodecRegistry {
    factories: HashMap<String, CodecFactory>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(JSON_CODEC, || Arc::new(JsonCodec));
        registry.register(JSON_LZ4_CODEC, || Arc::new(Lz4JsonCodec));
        registry
    }
}

impl CodecRegistry {
    /// Registry with no codecs.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) a codec constructor.
    pub fn register(&mut self, name: impl Into<String>, factory: CodecFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Registered codec names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the codec registered under `name`. A blank name selects JSON.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ValueCodec>> {
        let name = match name.trim() {
            "" => JSON_CODEC,
            other => other,
        };
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::Config(format!("unable to load entity codec: {}", name))
        })?;
        info!(codec = name, "Loaded entity codec");
        Ok(factory())
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.names())
            .finish()
    }
}
