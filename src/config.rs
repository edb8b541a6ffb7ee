//! Configuration: credentials and paths from the environment, and the
//! training table.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::channels::{ImapConfig, SmtpConfig};
use crate::error::ConfigError;
use crate::pipeline::trainer::TrainingCategory;
use crate::pipeline::types::Action;

pub const DEFAULT_IMAP_HOST: &str = "imap.mailbox.org";
pub const DEFAULT_SMTP_HOST: &str = "smtp.mailbox.org";
pub const DEFAULT_RULES_FILE: &str = ".imap-rules.yaml";
pub const FILER_LOG_FILE: &str = ".imap-filer.log";
pub const TRAINER_LOG_FILE: &str = ".imap-trainer.log";

/// Everything a filer or trainer run needs from its environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub rules_path: PathBuf,
    /// Mailbox the filer scans.
    pub source_mailbox: String,
    /// Directory the log files are written to.
    pub log_dir: PathBuf,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), dirs::home_dir())
    }

    /// Build configuration from `lookup`, resolving default paths under `home`.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        home: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));
        let port = |key: &str, default: u16| -> Result<u16, ConfigError> {
            match var(key) {
                Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("{raw:?}: {e}"),
                }),
                None => Ok(default),
            }
        };
        let home_dir = |what: &str| {
            home.clone()
                .ok_or_else(|| ConfigError::NoHomeDir(what.into()))
        };

        let imap_user = required("IMAP_USER")?;
        let imap_pass = required("IMAP_PASS")?;

        let imap = ImapConfig {
            host: var("IMAP_HOST").unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            port: port("IMAP_PORT", 993)?,
            username: imap_user.clone(),
            password: SecretString::from(imap_pass.clone()),
        };
        let smtp = SmtpConfig {
            host: var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            port: port("SMTP_PORT", 465)?,
            username: var("SMTP_USER").unwrap_or(imap_user),
            password: SecretString::from(var("SMTP_PASS").unwrap_or(imap_pass)),
        };

        let rules_path = match var("FILER_RULES_FILE") {
            Some(path) => PathBuf::from(path),
            None => home_dir("the rules file")?.join(DEFAULT_RULES_FILE),
        };
        let log_dir = match var("FILER_LOG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => home_dir("the log directory")?,
        };

        Ok(Self {
            imap,
            smtp,
            rules_path,
            source_mailbox: var("FILER_SOURCE_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
            log_dir,
        })
    }

    /// Path of the log file named `file_name` in the log directory.
    pub fn log_file(&self, file_name: &str) -> PathBuf {
        self.log_dir.join(file_name)
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }
}

/// Staging mailboxes and the actions learned for them.
pub fn default_training_categories() -> Vec<TrainingCategory> {
    vec![
        TrainingCategory::new("Train/Newsletters", vec![Action::move_to("Newsletters")]),
        TrainingCategory::new("Train/Updates", vec![Action::move_to("Updates")]),
        TrainingCategory::new(
            "Train/Offers",
            vec![Action::MarkRead, Action::move_to("Offers")],
        ),
        TrainingCategory::new(
            "Train/Receipts",
            vec![Action::MarkRead, Action::move_to("Receipts")],
        ),
        TrainingCategory::new(
            "Train/Travel",
            vec![
                Action::forward_to("plans@tripit.com"),
                Action::move_to("Travel/Flight Tickets"),
                Action::MarkRead,
            ],
        )
        .with_subject_hints(),
        TrainingCategory::new(
            "Train/AutoArchive",
            vec![Action::MarkRead, Action::move_to("Archive")],
        ),
        TrainingCategory::new("Train/AutoDelete", vec![Action::move_to("Autodelete")]),
    ]
}
