//! The run configuration: where dumps come from, who owns what, and where
//! tickets go.
//!
//! A configuration is built once, either from a JSON file or from command
//! line values, validated, and then only ever borrowed.
//!
//! ```json
//! {
//!   "dumps": { "path": "crashes/", "recursive": true },
//!   "rules": [
//!     { "filter": { "field": "module", "rule": "exact", "value": "gfx.dll" }, "owner": "Jane Doe" }
//!   ],
//!   "default_owner": "Crash Triage",
//!   "tracker": { "url": "https://redmine.example.com/", "project": "crashes" },
//!   "create_tickets": true
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::OwnershipTable;

fn default_pattern() -> String {
    String::from("*.dmp")
}

/// A dump file, or a directory of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpSource {
    pub path: PathBuf,
    /// Also look into subdirectories.
    #[serde(default)]
    pub recursive: bool,
    /// Glob matched against file names inside a directory.
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl DumpSource {
    pub fn new(path: impl Into<PathBuf>) -> DumpSource {
        DumpSource {
            path: path.into(),
            recursive: false,
            pattern: default_pattern(),
        }
    }
}

/// The tracker instance and project tickets are filed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerTarget {
    pub url: Url,
    /// Project id or identifier.
    pub project: String,
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dumps: Option<DumpSource>,
    #[serde(flatten)]
    pub ownership: OwnershipTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerTarget>,
    #[serde(default)]
    pub create_tickets: bool,
    /// Directories of Breakpad symbol files used to symbolize stacks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols_paths: Vec<PathBuf>,
}

/// A configuration that can't be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no dump file or directory given")]
    NoInput,
    #[error("{} doesn't exist", .0.display())]
    MissingInput(PathBuf),
    #[error("invalid dump pattern: {0}")]
    BadPattern(#[from] glob::PatternError),
    #[error("the default owner has no name")]
    EmptyDefaultOwner,
    #[error("rule {0} has no owner")]
    EmptyOwner(String),
    #[error("ticket creation needs a tracker url and project")]
    MissingTracker,
    #[error("{0}")]
    BadArgument(String),
}

impl Configuration {
    /// Read, parse and validate the configuration stored at `path`.
    pub fn load(path: &Path) -> Result<Configuration, ConfigError> {
        let config = Configuration::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse `path` without validating it, for callers that still
    /// have values to merge in.
    pub fn read(path: &Path) -> Result<Configuration, ConfigError> {
        debug!("loading configuration from {}", path.display());
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Configuration::from_json(&text)
    }

    /// Write the configuration to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        debug!("saving configuration to {}", path.display());
        let mut text = self.to_json()?;
        text.push('\n');
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Configuration, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The tracker target, when ticket creation is enabled.
    pub fn ticket_target(&self) -> Option<&TrackerTarget> {
        self.tracker.as_ref().filter(|_| self.create_tickets)
    }

    /// Check the invariants serde can't express.
    ///
    /// Shadowed rules are not an error (the first one wins) but are logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dumps.is_none() {
            return Err(ConfigError::NoInput);
        }
        if self.ownership.default_owner().name().trim().is_empty() {
            return Err(ConfigError::EmptyDefaultOwner);
        }
        if let Some(entry) = self
            .ownership
            .entries()
            .iter()
            .find(|entry| entry.owner.name().trim().is_empty())
        {
            return Err(ConfigError::EmptyOwner(entry.filter.to_string()));
        }
        if self.create_tickets {
            match &self.tracker {
                Some(target) if !target.project.trim().is_empty() => {}
                _ => return Err(ConfigError::MissingTracker),
            }
        }
        self.ownership.warn_duplicates();
        Ok(())
    }
}
