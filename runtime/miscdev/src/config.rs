//! Multiplexer configuration

use serde::Deserialize;

use crate::chrdev::DevT;

/// Char major shared by all misc devices
pub const MISC_MAJOR: u32 = 10;

/// Runtime configuration of a [`Misc`](crate::Misc) instance
///
/// The size of the dynamic minor region is fixed at compile time
/// ([`DYNAMIC_MINORS`](crate::DYNAMIC_MINORS)).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MiscConfig {
    /// Shared char major
    pub major: u32,

    /// Device class the nodes are published in
    pub class_name: String,

    /// Prefix of the on-demand load key
    pub alias_prefix: String,

    /// Name of the listing (`/proc/<proc_name>`)
    pub proc_name: String,
}

impl Default for MiscConfig {
    fn default() -> Self {
        Self {
            major: MISC_MAJOR,
            class_name: "misc".to_string(),
            alias_prefix: "char-major".to_string(),
            proc_name: "misc".to_string(),
        }
    }
}

impl MiscConfig {
    /// Key handed to the module loader when `minor` has no driver
    pub fn module_alias(&self, minor: u32) -> String {
        format!("{}-{}-{}", self.alias_prefix, self.major, minor)
    }

    pub fn devt(&self, minor: u32) -> DevT {
        DevT::new(self.major, minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_alias() {
        let config = MiscConfig::default();
        assert_eq!(config.module_alias(130), "char-major-10-130");
        assert_eq!(config.devt(63), DevT::new(10, 63));
    }

    #[test]
    fn test_partial_toml() {
        let config: MiscConfig = toml::from_str(
            r#"
            major = 42
            alias_prefix = "misc-alias"
            "#,
        )
        .unwrap();

        assert_eq!(config.major, 42);
        assert_eq!(config.class_name, "misc");
        assert_eq!(config.module_alias(7), "misc-alias-42-7");
    }
}
