//! Stored payload encoding.

use std::fmt::Debug;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{PersistenceError, PersistenceResult};
use crate::types::Resource;

/// Turns resources into the bytes kept in `resources.data` and back.
pub trait PayloadCodec: Send + Sync + Debug {
    fn encode(&self, resource: &Resource) -> PersistenceResult<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> PersistenceResult<Resource>;
}

/// JSON compressed with gzip.
#[derive(Debug, Clone, Copy)]
pub struct GzipJsonCodec {
    level: Compression,
}

impl GzipJsonCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipJsonCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl PayloadCodec for GzipJsonCodec {
    fn encode(&self, resource: &Resource) -> PersistenceResult<Vec<u8>> {
        let json = serde_json::to_vec(resource.content())?;
        let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), self.level);
        encoder
            .write_all(&json)
            .map_err(|e| PersistenceError::serialization(format!("gzip encode failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| PersistenceError::serialization(format!("gzip encode failed: {}", e)))
    }

    fn decode(&self, data: &[u8]) -> PersistenceResult<Resource> {
        let mut json = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut json)
            .map_err(|e| PersistenceError::serialization(format!("gzip decode failed: {}", e)))?;
        Resource::from_json(serde_json::from_slice(&json)?)
    }
}
