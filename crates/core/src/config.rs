use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::pairing::PairingStrategy;
use crate::relocate::Ownership;

pub const DEFAULT_LOCK_FILE: &str = "/var/run/scanbox.lock";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub scan: ScanConfig,
    pub stability: StabilityConfig,
    pub ownership: OwnershipConfig,
    pub merge: MergeConfig,
    pub safety: SafetyConfig,
    pub tags: Vec<TagConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub lock_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: None,
            destination: None,
            lock_file: DEFAULT_LOCK_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: [".pdf", ".jpg", ".jpeg", ".png", ".tiff", ".tif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub wait_secs: u64,
    pub duplex_gate_secs: u64,
    pub max_age_mins: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            wait_secs: 10,
            duplex_gate_secs: 30,
            max_age_mins: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipConfig {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: u32,
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            uid: None,
            gid: None,
            mode: 0o660,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub delete_sources: bool,
    pub drop_blank_pages: bool,
    pub extensions: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            delete_sources: true,
            drop_blank_pages: true,
            extensions: vec![".pdf".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    pub name: String,
    pub pattern: String,
    pub strategy: PairingStrategy,
    #[serde(default)]
    pub sort_pattern: Option<String>,
}

pub fn default_tags() -> Vec<TagConfig> {
    vec![
        TagConfig {
            name: "double-sided".into(),
            pattern: "^double-sided".into(),
            strategy: PairingStrategy::Consecutive,
            sort_pattern: None,
        },
        TagConfig {
            name: "duplex-batch".into(),
            pattern: "^duplex-batch".into(),
            strategy: PairingStrategy::OutsideIn,
            sort_pattern: None,
        },
    ]
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("SCANBOX")
            .prefix_separator("_")
            .separator("__"),
    );
    let cfg = settings.build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;
    if app.tags.is_empty() {
        app.tags = default_tags();
    }
    Ok(app)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("no file extensions configured")]
    NoExtensions,
    #[error("invalid tag name {0:?}")]
    InvalidTagName(String),
    #[error("duplicate tag name {0:?}")]
    DuplicateTag(String),
    #[error("invalid pattern for tag {tag:?}: {source}")]
    InvalidPattern {
        tag: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub struct TagRule {
    pub name: String,
    pub pattern: Regex,
    pub strategy: PairingStrategy,
    pub sort_pattern: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub extensions: Vec<String>,
    pub merge_extensions: Vec<String>,
    pub tags: Vec<TagRule>,
    pub stability_wait: Duration,
    pub duplex_gate_wait: Duration,
    pub max_age: Duration,
    pub ownership: Ownership,
    pub delete_sources: bool,
    pub drop_blank_pages: bool,
    pub dry_run: bool,
}

impl ScanSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        let source = cfg
            .paths
            .source
            .as_deref()
            .ok_or(ConfigError::Missing("paths.source"))?;
        let destination = cfg
            .paths
            .destination
            .as_deref()
            .ok_or(ConfigError::Missing("paths.destination"))?;

        let extensions = normalize_extensions(&cfg.scan.extensions);
        if extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        let mut seen = HashSet::new();
        let mut tags = Vec::with_capacity(cfg.tags.len());
        for tag in &cfg.tags {
            if tag.name.is_empty() || tag.name.contains(['/', '\\']) {
                return Err(ConfigError::InvalidTagName(tag.name.clone()));
            }
            if !seen.insert(tag.name.as_str()) {
                return Err(ConfigError::DuplicateTag(tag.name.clone()));
            }
            let compile = |pattern: &str| {
                Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    tag: tag.name.clone(),
                    source,
                })
            };
            tags.push(TagRule {
                name: tag.name.clone(),
                pattern: compile(&tag.pattern)?,
                strategy: tag.strategy,
                sort_pattern: tag.sort_pattern.as_deref().map(compile).transpose()?,
            });
        }

        Ok(Self {
            source: PathBuf::from(source),
            destination: PathBuf::from(destination),
            extensions,
            merge_extensions: normalize_extensions(&cfg.merge.extensions),
            tags,
            stability_wait: Duration::from_secs(cfg.stability.wait_secs),
            duplex_gate_wait: Duration::from_secs(cfg.stability.duplex_gate_secs),
            max_age: Duration::from_secs(cfg.stability.max_age_mins * 60),
            ownership: Ownership {
                uid: cfg.ownership.uid,
                gid: cfg.ownership.gid,
                mode: cfg.ownership.mode,
            },
            delete_sources: cfg.merge.delete_sources,
            drop_blank_pages: cfg.merge.drop_blank_pages,
            dry_run: cfg.safety.dry_run,
        })
    }
}

pub fn normalize_extensions(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for ext in raw {
        let ext = ext.trim().to_lowercase();
        if ext.is_empty() || ext == "." {
            continue;
        }
        let ext = if ext.starts_with('.') {
            ext
        } else {
            format!(".{ext}")
        };
        if !out.contains(&ext) {
            out.push(ext);
        }
    }
    out
}
