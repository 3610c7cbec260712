//! Device manifest
//!
//! ```toml
//! [misc]
//! major = 10
//!
//! [[device]]
//! name = "rtc"
//! kind = "zero"
//! minor = 135
//! on_demand = true
//! ```

use kaal_miscdev::{MiscConfig, MISC_DYNAMIC_MINOR};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("device {name}: on-demand devices need a fixed minor")]
    OnDemandNeedsMinor { name: String },

    #[error("device {name}: errno is only meaningful for kind = \"reject\"")]
    StrayErrno { name: String },
}

/// Driver behind a manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Discards writes, reads end-of-file
    Null,
    /// Reads zeros
    Zero,
    /// Reads back what was written on the same open
    Echo,
    /// Refuses every open
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSpec {
    pub name: Option<String>,

    /// Omitted for a dynamic minor
    pub minor: Option<u32>,

    pub kind: DeviceKind,

    /// Node path relative to /dev, overriding the name
    pub devnode: Option<String>,

    /// Registered by the loader on first open instead of at boot
    #[serde(default)]
    pub on_demand: bool,

    /// Owning module, pinned while the device is open
    pub module: Option<String>,

    /// Errno returned by a `reject` device (EPERM if omitted)
    pub errno: Option<i32>,
}

impl DeviceSpec {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Fixed minor, if any
    pub fn fixed_minor(&self) -> Option<u32> {
        self.minor.filter(|&minor| minor != MISC_DYNAMIC_MINOR)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub misc: MiscConfig,

    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceSpec>,
}

impl Manifest {
    /// Load and validate a manifest file
    ///
    /// A missing file yields the default (empty) manifest.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            log::info!("{} not found, starting with no devices", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    fn validate(&self) -> Result<(), ManifestError> {
        for spec in &self.devices {
            if spec.on_demand && spec.fixed_minor().is_none() {
                return Err(ManifestError::OnDemandNeedsMinor {
                    name: spec.label().to_string(),
                });
            }
            if spec.errno.is_some() && spec.kind != DeviceKind::Reject {
                return Err(ManifestError::StrayErrno {
                    name: spec.label().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let manifest: Manifest = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }
}
