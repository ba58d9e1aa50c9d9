//! Static device metadata: display name -> {type, tag}.
//!
//! File format (JSON object keyed by the device name as shown in the Meross app):
//!
//! ```json
//! { "Plug1": { "type": "mss310", "tag": "kitchen" } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Tag published for devices missing from the metadata file
pub const UNKNOWN_TAG: &str = "none";
/// Type published for devices missing from the metadata file
pub const UNKNOWN_TYPE: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("cannot read metadata file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid metadata file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    #[serde(rename = "type")]
    pub device_type: String,
    pub tag: String,
}

/// Labels resolved for one device name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLabels {
    pub tag: String,
    pub device_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    devices: HashMap<String, DeviceMetadata>,
}

impl MetadataStore {
    /// Loads the mapping from disk. Missing or malformed files are errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path).map_err(|source| MetadataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&txt).map_err(|source| MetadataError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(txt: &str) -> Result<Self, serde_json::Error> {
        Ok(Self { devices: serde_json::from_str(txt)? })
    }

    pub fn get(&self, name: &str) -> Option<&DeviceMetadata> {
        self.devices.get(name)
    }

    /// Tag and type for a device name, falling back to `none` / `unknown`
    pub fn resolve(&self, name: &str) -> DeviceLabels {
        match self.get(name) {
            Some(meta) => DeviceLabels {
                tag: meta.tag.clone(),
                device_type: meta.device_type.clone(),
            },
            None => DeviceLabels {
                tag: UNKNOWN_TAG.to_string(),
                device_type: UNKNOWN_TYPE.to_string(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
