use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, brands_path};

/// Human-edited brand table. Loaded once at run start and treated as read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandTableConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub brands: Vec<BrandEntryConfig>,
    #[serde(default)]
    pub multi_word: Vec<MultiWordBrandConfig>,
}

impl Default for BrandTableConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            brands: Vec::new(),
            multi_word: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandEntryConfig {
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub known_lines: Vec<String>,
}

/// A brand whose name spans several words, e.g. `"Arden Grange"`. When `slug`
/// is omitted it is derived from `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiWordBrandConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

impl BrandTableConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}

/// Loads `.larder/brands.toml`. A missing table is an error: running without
/// alias data would silently mint a slug for every spelling variant.
pub fn load_brand_table(workspace_root: impl AsRef<Path>) -> Result<BrandTableConfig, ConfigError> {
    let path = brands_path(workspace_root);
    if !path.exists() {
        return Err(ConfigError::MissingBrandTable(path));
    }

    let raw = fs::read_to_string(path)?;
    BrandTableConfig::from_toml_str(&raw)
}

fn default_version() -> String {
    "0".to_owned()
}
