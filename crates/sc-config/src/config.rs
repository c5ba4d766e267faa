//! Source topology
//!
//! [`SafetyCenterConfig`] is validated on construction and immutable
//! afterwards. Declaration order of sources is preserved and exposed
//! through [`SafetyCenterConfig::source_order`], which the aggregation
//! uses to break severity ties.

use crate::broadcast::Broadcast;
use crate::error::ConfigError;
use crate::flags::SafetyCenterFlags;
use crate::source::{SafetySource, SafetySourcesGroup, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Validated source topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyCenterConfig {
    groups: Vec<SafetySourcesGroup>,
    broadcasts: Vec<Broadcast>,
    /// source id -> (group index, source index, declaration order)
    index: HashMap<String, (usize, usize, usize)>,
}

impl SafetyCenterConfig {
    /// Validate `groups` and derive broadcasts
    ///
    /// # Errors
    /// - `ConfigError::DuplicateGroup` / `DuplicateSource` on id clashes
    /// - `ConfigError::InvalidSource` when an external source has no
    ///   package or a static source declares one
    pub fn new(groups: Vec<SafetySourcesGroup>) -> Result<Self, ConfigError> {
        let mut index = HashMap::new();
        let mut group_ids = Vec::with_capacity(groups.len());
        let mut broadcasts: Vec<Broadcast> = Vec::new();
        let mut order = 0;

        for (g, group) in groups.iter().enumerate() {
            if group_ids.contains(&group.id.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.id.clone()));
            }
            group_ids.push(group.id.as_str());

            for (s, source) in group.sources.iter().enumerate() {
                validate_source(source)?;
                if index.insert(source.id.clone(), (g, s, order)).is_some() {
                    return Err(ConfigError::DuplicateSource(source.id.clone()));
                }
                order += 1;

                let Some(package) = source.package_name.as_deref() else {
                    continue;
                };
                match broadcasts.iter_mut().find(|b| b.package_name == package) {
                    Some(broadcast) => broadcast.add_source(source),
                    None => {
                        let mut broadcast = Broadcast::new(package);
                        broadcast.add_source(source);
                        broadcasts.push(broadcast);
                    }
                }
            }
        }

        tracing::debug!(
            "Loaded {} sources in {} groups, {} broadcasts",
            index.len(),
            groups.len(),
            broadcasts.len()
        );

        Ok(Self {
            groups,
            broadcasts,
            index,
        })
    }

    /// Config without any source
    #[must_use]
    pub fn empty() -> Self {
        Self {
            groups: Vec::new(),
            broadcasts: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Parse and validate a TOML document holding `[[groups]]`
    ///
    /// # Errors
    /// Parse or validation errors
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        load_from_str(document).map(|(config, _)| config)
    }

    /// Groups in declaration order
    #[inline]
    #[must_use]
    pub fn groups(&self) -> &[SafetySourcesGroup] {
        &self.groups
    }

    /// Derived broadcasts, one per owning package
    #[inline]
    #[must_use]
    pub fn broadcasts(&self) -> &[Broadcast] {
        &self.broadcasts
    }

    /// Look up a source by id
    #[must_use]
    pub fn source(&self, source_id: &str) -> Option<&SafetySource> {
        self.index
            .get(source_id)
            .map(|&(g, s, _)| &self.groups[g].sources[s])
    }

    /// Group containing `source_id`
    #[must_use]
    pub fn group_of(&self, source_id: &str) -> Option<&SafetySourcesGroup> {
        self.index.get(source_id).map(|&(g, _, _)| &self.groups[g])
    }

    /// Declaration position of `source_id` across all groups
    #[must_use]
    pub fn source_order(&self, source_id: &str) -> Option<usize> {
        self.index.get(source_id).map(|&(_, _, order)| order)
    }

    /// Every source in declaration order
    pub fn sources(&self) -> impl Iterator<Item = &SafetySource> {
        self.groups.iter().flat_map(|g| g.sources.iter())
    }

    /// Sources that report data, in declaration order
    pub fn external_sources(&self) -> impl Iterator<Item = &SafetySource> {
        self.sources().filter(|s| s.is_external())
    }

    /// Whether `source_id` is configured and reports data
    #[must_use]
    pub fn is_external_source(&self, source_id: &str) -> bool {
        self.source(source_id).is_some_and(SafetySource::is_external)
    }

    /// Number of configured sources
    #[inline]
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.index.len()
    }
}

impl Default for SafetyCenterConfig {
    fn default() -> Self {
        Self::empty()
    }
}

fn validate_source(source: &SafetySource) -> Result<(), ConfigError> {
    if source.id.trim().is_empty() {
        return Err(ConfigError::invalid_source(&source.id, "empty id"));
    }
    match (source.kind, source.package_name.as_deref()) {
        (SourceKind::Static, Some(_)) => Err(ConfigError::invalid_source(
            &source.id,
            "static sources cannot declare a package",
        )),
        (SourceKind::Dynamic | SourceKind::IssueOnly, None | Some("")) => Err(
            ConfigError::invalid_source(&source.id, "external sources need a package"),
        ),
        _ => Ok(()),
    }
}

/// On-disk document: flags plus groups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Policy overrides
    #[serde(default)]
    pub flags: SafetyCenterFlags,
    /// Source groups
    #[serde(default)]
    pub groups: Vec<SafetySourcesGroup>,
}

/// Parse a TOML document into topology and flags
///
/// # Errors
/// Parse or validation errors
pub fn load_from_str(document: &str) -> Result<(SafetyCenterConfig, SafetyCenterFlags), ConfigError> {
    let file: ConfigFile = toml::from_str(document)?;
    let config = SafetyCenterConfig::new(file.groups)?;
    Ok((config, file.flags))
}

/// Read and parse a TOML config file
///
/// # Errors
/// IO, parse or validation errors
pub fn load_from_path(
    path: impl AsRef<Path>,
) -> Result<(SafetyCenterConfig, SafetyCenterFlags), ConfigError> {
    let path = path.as_ref();
    let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&document)
}
