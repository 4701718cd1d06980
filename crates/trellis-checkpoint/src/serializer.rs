//! Serialization protocol for checkpoint blobs.

use serde::{Deserialize, Serialize};

use trellis_core::error::{GraphError, Result};

use crate::types::TypedBlob;

/// Turns values into tagged byte blobs and back.
///
/// The tag travels with the bytes so a blob written by one serializer is
/// never silently decoded by another.
pub trait Serializer: Send + Sync {
    fn type_tag(&self) -> &str;

    fn dumps<T: Serialize>(&self, value: &T) -> Result<TypedBlob>;

    fn loads<T: for<'de> Deserialize<'de>>(&self, blob: &TypedBlob) -> Result<T>;
}

/// JSON serializer (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub const TYPE_TAG: &'static str = "json";

    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn dumps<T: Serialize>(&self, value: &T) -> Result<TypedBlob> {
        Ok(TypedBlob {
            type_tag: Self::TYPE_TAG.to_string(),
            bytes: serde_json::to_vec(value)?,
        })
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, blob: &TypedBlob) -> Result<T> {
        if blob.type_tag != Self::TYPE_TAG {
            return Err(GraphError::Checkpoint(format!(
                "cannot decode '{}' blob with the json serializer",
                blob.type_tag
            ))
            .into());
        }
        Ok(serde_json::from_slice(&blob.bytes)?)
    }
}
