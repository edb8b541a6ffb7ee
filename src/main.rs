use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use mail_filer::channels::{ImapConnector, SmtpForwarder};
use mail_filer::config::{self, Config, FILER_LOG_FILE, TRAINER_LOG_FILE};
use mail_filer::pipeline::{ActionExecutor, Filer, Trainer};
use mail_filer::store::YamlRuleFile;

#[derive(Parser)]
#[command(version, about = "File IMAP mail by rules learned from hand-sorted folders")]
struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Rule file to use instead of FILER_RULES_FILE.
    #[arg(long, global = true)]
    rules: Option<PathBuf>,
    /// Log file to write instead of the per-command default.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy, Debug)]
enum Command {
    /// Apply the rules to every message in the source mailbox.
    File,
    /// Learn rules from the Train/* mailboxes and file their messages.
    Train,
}

impl Command {
    fn log_file_name(self) -> &'static str {
        match self {
            Self::File => FILER_LOG_FILE,
            Self::Train => TRAINER_LOG_FILE,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage. Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::from_env();
    let log_path = cli.log_file.clone().or_else(|| {
        config
            .as_ref()
            .ok()
            .map(|c| c.log_file(cli.command.log_file_name()))
    });
    let _guard = init_tracing(cli.verbose, log_path.as_deref());

    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(rules) = cli.rules {
        config.rules_path = rules;
    }

    let command = cli.command;
    match tokio::task::spawn_blocking(move || run(command, &config)).await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("{command:?} failed: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{command:?} task failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Stderr plus an optional appending log file. The returned guard flushes
/// the file writer on drop.
fn init_tracing(verbose: bool, log_path: Option<&Path>) -> Option<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let mut open_error = None;
    let (file_layer, guard) = match log_path.map(open_log) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            open_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(e) = open_error {
        error!("Could not open log file: {e}");
    }
    guard
}

fn open_log(path: &Path) -> Result<RollingFileAppender, String> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("{} is not a file path", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| format!("{}: {e}", path.display()))
}

fn run(command: Command, config: &Config) -> mail_filer::Result<()> {
    let connector = ImapConnector::new(config.imap.clone());
    let forwarder = SmtpForwarder::new(config.smtp.clone());
    let rule_file = YamlRuleFile::new(&config.rules_path);
    let executor = ActionExecutor::new(&forwarder);

    info!("Using rules file {}", rule_file.path().display());
    match command {
        Command::File => {
            Filer::new(&rule_file, executor)
                .with_source_mailbox(&config.source_mailbox)
                .run(&connector)?;
        }
        Command::Train => {
            Trainer::new(&rule_file, executor, config::default_training_categories())
                .run(&connector)?;
        }
    }
    Ok(())
}
