//! YAML rule file, written atomically.
//!
//! Layout:
//!
//! ```yaml
//! rules:
//!   - match: {header: List-Id, contains: newsletter.example.com}
//!     actions:
//!       - move: Newsletters
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::RulesError;
use crate::pipeline::types::RuleSet;
use crate::store::RuleStore;

/// Rule set stored as YAML at a fixed path.
#[derive(Debug, Clone)]
pub struct YamlRuleFile {
    path: PathBuf,
}

impl YamlRuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self, reason: impl ToString) -> RulesError {
        RulesError::Write {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl RuleStore for YamlRuleFile {
    fn load(&self) -> Result<Option<RuleSet>, RulesError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Rules file not found");
                return Ok(None);
            }
            Err(source) => {
                return Err(RulesError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        // An empty document is an empty rule set, not an error.
        if text.trim().is_empty() {
            return Ok(Some(RuleSet::default()));
        }

        let rules: RuleSet = serde_yaml::from_str(&text).map_err(|source| RulesError::Parse {
            path: self.path.clone(),
            source,
        })?;

        info!("Loaded {} rules from {}", rules.len(), self.path.display());
        for (i, rule) in rules.iter().enumerate() {
            debug!("  Rule {}: {} contains '{}'", i + 1, rule.matcher.header, rule.matcher.needle);
        }
        Ok(Some(rules))
    }

    /// Write to a temporary file beside the target, then rename over it.
    fn save(&self, rules: &RuleSet) -> Result<(), RulesError> {
        let yaml = serde_yaml::to_string(rules)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.write_err(e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.write_err(e))?;
        tmp.write_all(yaml.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| self.write_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.write_err(e.error))?;

        info!("Saved {} rules to {}", rules.len(), self.path.display());
        Ok(())
    }
}
