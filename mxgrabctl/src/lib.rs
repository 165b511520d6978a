use std::fmt;
use std::future::Future;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use mxgrab_core::browser::{BrowserLauncher, BrowserPool};
use mxgrab_core::extractor::{ExtractionReport, ManifestExtractor};
use mxgrab_core::session::SourceValidator;
use mxgrab_core::{
    load_config, BrowserResolver, GrabberConfig, NoopObserver, ProgressEvent, ProgressObserver,
    SessionControl, SessionController, SessionSnapshot, SessionStatus, Tool, ToolLocator,
    ToolSource,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

const DEFAULT_CONFIG: &str = "configs/mxgrab.toml";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] mxgrab_core::ConfigError),
    #[error("{0}")]
    Session(#[from] mxgrab_core::SessionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch streaming videos from web pages", long_about = None)]
pub struct Cli {
    /// Path to mxgrab.toml
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve and download the video behind a page
    Grab(GrabArgs),
    /// Resolve manifest candidates without downloading
    Probe(ProbeArgs),
    /// Show where each external tool was found
    Tools,
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct GrabArgs {
    /// Page URL
    pub url: String,
    /// Destination file or directory (defaults to the working directory)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
    /// Show the browser window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Page URL
    pub url: String,
    /// Show the browser window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
}

pub fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "mxgrab_core=debug,mxgrabctl=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    // a subscriber may already be installed by an embedding process
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "mxgrabctl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Grab(args) => {
            let outcome = context.grab(args, cli.format).await?;
            render(&outcome, cli.format)?;
            if outcome.session.status == SessionStatus::Failed {
                return Err(AppError::Failed(
                    outcome
                        .session
                        .error_detail
                        .unwrap_or_else(|| "download failed".to_string()),
                ));
            }
        }
        Commands::Probe(args) => {
            let report = context.probe(args, cli.format).await?;
            render(&report, cli.format)?;
            if report.candidates.is_empty() {
                return Err(AppError::Failed("Could not find video stream URL.".into()));
            }
        }
        Commands::Tools => {
            let report = tool_report(&context.locator);
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more required tools are missing".to_string(),
                ));
            }
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

/// Loads the config file. A missing file at the default location falls back to
/// built-in defaults; an explicitly given path must exist.
pub fn load_settings(path: &Path) -> Result<GrabberConfig> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        debug!(path = %path.display(), "config file absent, using defaults");
        return Ok(GrabberConfig::default());
    }
    Ok(load_config(path)?)
}

struct AppContext {
    config: GrabberConfig,
    locator: ToolLocator,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_settings(&cli.config)?;
        let locator = ToolLocator::from_config(&config.tools);
        Ok(Self { config, locator })
    }

    fn resolver(&self, headed: bool) -> BrowserResolver<BrowserLauncher> {
        let mut browser = self.config.browser.clone();
        if headed {
            browser.chromium.headless = false;
        }
        let executable = self.locator.locate(Tool::Browser).ok();
        let helper = self.locator.locate(Tool::DownloadHelper).ok();
        BrowserResolver::new(
            BrowserPool::new(BrowserLauncher::new(browser, executable)),
            ManifestExtractor::new(self.config.extractor.clone(), helper),
        )
    }

    async fn probe(&self, args: &ProbeArgs, format: OutputFormat) -> Result<ExtractionReport> {
        let validator = SourceValidator::new(&self.config.sources)?;
        let url = validator.validate(&args.url)?;
        let resolver = self.resolver(args.headed);
        let control = SessionControl::new();
        let observer: Box<dyn ProgressObserver> = match format {
            OutputFormat::Text => Box::new(|fraction: f64, message: &str| {
                eprintln!("{}", progress_line(fraction, message));
            }),
            OutputFormat::Json => Box::new(NoopObserver),
        };
        let report = resolver.probe(&url, &control.watch(), observer.as_ref()).await;
        resolver.pool().release().await;
        Ok(report?)
    }

    async fn grab(&self, args: &GrabArgs, format: OutputFormat) -> Result<GrabOutcome> {
        let resolver = Arc::new(self.resolver(args.headed));
        let controller =
            SessionController::new(self.config.clone(), self.locator.clone(), resolver)?;
        with_teardown(&controller, drive_grab(&controller, args, format)).await
    }
}

/// Runs `work`, then stops any session it left running, disposes it and
/// releases the cached browser, whatever `work` returned.
async fn with_teardown<T, F>(controller: &SessionController, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let result = work.await;
    controller.shutdown().await;
    if let Err(err) = controller.reset().await {
        warn!(error = %err, "session could not be disposed");
    }
    result
}

async fn drive_grab(
    controller: &SessionController,
    args: &GrabArgs,
    format: OutputFormat,
) -> Result<GrabOutcome> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    controller.submit_with_observer(&args.url, Arc::new(tx)).await?;
    if format == OutputFormat::Text {
        eprintln!("Type p + Enter to pause, r to resume, c to cancel.");
    }
    let mut keys = spawn_key_reader();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let finished = controller.wait();
    tokio::pin!(finished);

    let snapshot = loop {
        tokio::select! {
            Some(event) = rx.recv() => print_event(&event, format)?,
            Some(key) = keys.recv() => {
                tokio::spawn(apply_key(controller.clone(), key));
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                tokio::spawn(apply_key(controller.clone(), KeyCommand::Cancel));
            }
            snapshot = &mut finished => break snapshot,
        }
    };
    while let Ok(event) = rx.try_recv() {
        print_event(&event, format)?;
    }

    let session = snapshot.ok_or_else(|| AppError::Failed("session vanished".into()))?;
    let delivered = if session.status == SessionStatus::Completed {
        let destination = match &args.output {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        let path = controller.deliver(&destination).await?;
        info!(path = %path.display(), "video saved");
        Some(path)
    } else {
        None
    };
    let session = controller.snapshot().unwrap_or(session);
    Ok(GrabOutcome { session, delivered })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Pause,
    Resume,
    Cancel,
}

pub fn parse_key(line: &str) -> Option<KeyCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "pause" => Some(KeyCommand::Pause),
        "r" | "resume" => Some(KeyCommand::Resume),
        "c" | "cancel" => Some(KeyCommand::Cancel),
        _ => None,
    }
}

/// Reads keyboard commands on a plain thread. Tokio's stdin would keep the
/// runtime alive on exit while a read is pending.
fn spawn_key_reader() -> mpsc::UnboundedReceiver<KeyCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if let Some(key) = parse_key(&line) {
                if tx.send(key).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

async fn apply_key(controller: SessionController, key: KeyCommand) {
    let result = match key {
        KeyCommand::Pause => controller.pause().await,
        KeyCommand::Resume => controller.resume().await,
        KeyCommand::Cancel => controller.cancel().await,
    };
    if let Err(err) = result {
        warn!(error = %err, ?key, "ignored session command");
        eprintln!("{err}");
    }
}

fn progress_line(fraction: f64, message: &str) -> String {
    format!("[{:>5.1}%] {message}", fraction * 100.0)
}

fn print_event(event: &ProgressEvent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => eprintln!("{}", progress_line(event.fraction, &event.message)),
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct GrabOutcome {
    pub session: SessionSnapshot,
    pub delivered: Option<PathBuf>,
}

impl DisplayFallback for GrabOutcome {
    fn display(&self) -> String {
        let session = &self.session;
        let mut lines = vec![
            format!("session: {}", session.id),
            format!("status: {}", session.status),
            format!(
                "started: {}",
                session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        ];
        if let Some(manifest) = session.manifest_candidates.first() {
            lines.push(format!("manifest: {manifest}"));
        }
        if let Some(path) = &self.delivered {
            lines.push(format!("saved to: {}", path.display()));
        }
        if let Some(detail) = &session.error_detail {
            lines.push(format!("error: {detail}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for ExtractionReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "attempts: {}, strategy: {}",
            self.attempts,
            self.strategy
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )];
        if self.cancelled {
            lines.push("cancelled".to_string());
        }
        lines.extend(self.candidates.iter().cloned());
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ToolEntry {
    pub tool: Tool,
    pub status: CheckStatus,
    pub path: Option<PathBuf>,
    pub source: Option<ToolSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

pub fn tool_report(locator: &ToolLocator) -> Vec<ToolEntry> {
    locator
        .report()
        .into_iter()
        .map(|status| {
            let check = match (&status.path, status.required) {
                (Some(_), _) => CheckStatus::Ok,
                (None, true) => CheckStatus::Error,
                (None, false) => CheckStatus::Warn,
            };
            ToolEntry {
                tool: status.tool,
                status: check,
                path: status.path,
                source: status.source,
            }
        })
        .collect()
}

impl DisplayFallback for Vec<ToolEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                let detail = match (&entry.path, entry.source) {
                    (Some(path), Some(source)) => {
                        let origin = match source {
                            ToolSource::Override => "override",
                            ToolSource::SearchPath => "search path",
                            ToolSource::KnownLocation => "known location",
                        };
                        format!("{} ({origin})", path.display())
                    }
                    (Some(path), None) => path.display().to_string(),
                    (None, _) if entry.tool.is_required() => "not found".to_string(),
                    (None, _) => "not found (optional)".to_string(),
                };
                format!("[{}] {} - {}", entry.status, entry.tool, detail)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
