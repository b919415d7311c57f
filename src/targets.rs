//! Target list loading
//!
//! The target list is a JSON document with a `urls` object mapping a unique
//! job name to the URL to capture:
//!
//! ```json
//! { "urls": { "news_home": "https://news.example/", "docs": "https://docs.example/" } }
//! ```
//!
//! Declaration order is preserved and becomes the submission order of the run.

use crate::{sanitize_filename, validate_url, ConfigError};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::info;

/// One validated (name, URL) pair from the target list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub url: String,
    /// Filesystem-safe name for this target's artifact
    pub file_stem: String,
}

#[derive(Deserialize)]
struct TargetFile {
    urls: OrderedEntries,
}

/// Name/URL pairs in declaration order, repeated keys included. serde maps
/// collapse repeated keys, which would hide duplicate names.
struct OrderedEntries(Vec<(String, String)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of target name to URL string")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, String>()? {
                    entries.push(entry);
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Load and validate the target list at `path`.
pub fn load_targets(path: &Path) -> Result<Vec<Target>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let targets = parse_targets(&content)?;
    info!("Loaded {} targets from {}", targets.len(), path.display());
    for (i, target) in targets.iter().take(3).enumerate() {
        info!("   {}. {}: {}", i + 1, target.name, target.url);
    }
    if targets.len() > 3 {
        info!("   ... and {} more", targets.len() - 3);
    }

    Ok(targets)
}

/// Parse and validate a target list document.
pub fn parse_targets(content: &str) -> Result<Vec<Target>, ConfigError> {
    let file: TargetFile =
        serde_json::from_str(content).map_err(|e| ConfigError::Malformed(e.to_string()))?;

    build_targets(file.urls.0)
}

/// Validate name/URL pairs and derive their file stems.
pub fn build_targets(entries: Vec<(String, String)>) -> Result<Vec<Target>, ConfigError> {
    if entries.is_empty() {
        return Err(ConfigError::Empty);
    }

    let mut names = HashSet::new();
    let mut stems: HashMap<String, String> = HashMap::new();
    let mut targets = Vec::with_capacity(entries.len());

    for (name, url) in entries {
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidName(name));
        }
        if !names.insert(name.clone()) {
            return Err(ConfigError::DuplicateName(name));
        }

        let url = url.trim().to_string();
        validate_url(&url).map_err(|reason| ConfigError::InvalidUrl {
            name: name.clone(),
            url: url.clone(),
            reason,
        })?;

        let file_stem = sanitize_filename(&name);
        if let Some(first) = stems.get(&file_stem) {
            return Err(ConfigError::FileStemCollision {
                first: first.clone(),
                second: name,
                stem: file_stem,
            });
        }
        stems.insert(file_stem.clone(), name.clone());

        targets.push(Target {
            name,
            url,
            file_stem,
        });
    }

    Ok(targets)
}
