mod config;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use capability::{Capability, CapabilityResult, SurfaceId, join};
use clap::{Parser, Subcommand};
use runtime::ui::UiProviders;
use runtime::{Degradation, Grantly, GrantlyConfig, IssueKind, RequestCallback};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::Profile;
use error::{Error, Result};

const LOG_ENV: &str = "GRANTLY_LOG";

#[derive(Parser)]
#[command(name = "grantly")]
#[command(about = "Capability request orchestration against a scripted host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current state of capabilities without prompting
    Check {
        /// Application profile (TOML)
        profile: PathBuf,
        /// Capabilities to check
        #[arg(required = true)]
        capabilities: Vec<String>,
    },
    /// Run a request, answering host prompts from the profile
    Request {
        /// Application profile (TOML)
        profile: PathBuf,
        /// Surface the request is made from
        #[arg(short, long, default_value = "main")]
        surface: String,
        /// Skip rationale and permanent-denial dialogs (overrides the profile)
        #[arg(long)]
        lazy: bool,
        /// Print the journal as JSON lines
        #[arg(long)]
        json: bool,
        /// Capabilities to request
        #[arg(required = true)]
        capabilities: Vec<String>,
    },
    /// Validate the engine configuration and print effective values
    Config {
        /// Application profile (TOML)
        profile: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            profile,
            capabilities,
        } => cmd_check(&profile, &capabilities).await,
        Commands::Request {
            profile,
            surface,
            lazy,
            json,
            capabilities,
        } => cmd_request(&profile, &surface, lazy, json, &capabilities).await,
        Commands::Config { profile } => cmd_config(&profile),
    }
}

fn init_tracing(config: &GrantlyConfig) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(config.log_level()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_profile(path: &Path) -> Result<Profile> {
    let profile = Profile::load(path).map_err(|e| Error::Config(e.to_string()))?;
    init_tracing(&profile.grantly);
    Ok(profile)
}

async fn cmd_check(path: &Path, capabilities: &[String]) -> Result<()> {
    let profile = load_profile(path)?;
    let grantly = Grantly::init(
        profile.grantly.clone(),
        Arc::new(profile.host()),
        Arc::new(profile.manifest()),
        UiProviders::default(),
    )?;

    let surface = SurfaceId::new("cli");
    println!("{:<28}  {:<26}  RATIONALE", "CAPABILITY", "STATE");
    println!("{}", "-".repeat(68));
    for id in capabilities {
        let capability = Capability::from(id.as_str());
        let result = grantly.checker().check_for(&surface, &capability)?;
        println!(
            "{:<28}  {:<26}  {}",
            capability.as_str(),
            result.state.to_string(),
            if result.requires_rationale { "yes" } else { "-" }
        );
    }

    grantly.shutdown().await?;
    Ok(())
}

/// Forwards results to the command and reports everything else.
struct Reporter {
    results: mpsc::UnboundedSender<Vec<CapabilityResult>>,
}

impl RequestCallback for Reporter {
    fn on_results(&self, results: &[CapabilityResult]) {
        let _ = self.results.send(results.to_vec());
    }

    fn on_cancelled(&self) {
        println!("request cancelled");
    }

    fn on_error(&self, error: &runtime::Error) {
        eprintln!("request failed: {error}");
    }

    fn on_degraded(&self, degradation: Degradation) {
        println!("denial behavior applied: {degradation:?}");
    }
}

async fn cmd_request(
    path: &Path,
    surface: &str,
    lazy: bool,
    json: bool,
    capabilities: &[String],
) -> Result<()> {
    let profile = load_profile(path)?;
    let host = Arc::new(profile.host());
    let grantly = Grantly::init(
        profile.grantly.clone(),
        host.clone(),
        Arc::new(profile.manifest()),
        UiProviders::default(),
    )?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut request = grantly
        .request(surface)
        .capabilities(capabilities.iter().map(String::as_str))
        .callback(Reporter { results: tx });
    if lazy {
        request = request.lazy(true);
    }
    let submitted = grantly.execute(request).await?;
    println!("request {} ({})", submitted.id, submitted.state);
    if let Some(delay) = submitted.retry_after {
        println!("prompt failed, retrying in {}ms", delay.as_millis());
    }

    // Play the user: answer prompts until the request leaves the registry.
    let results = loop {
        for (prompted_on, prompted) in host.take_pending() {
            println!("host prompt on {prompted_on}: {}", join(&prompted));
            let answer = host.answer(&prompted);
            let handled = grantly.handle().deliver(answer).await?;
            debug!(handled, "answer delivered");
        }

        tokio::select! {
            results = rx.recv() => break results,
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        if grantly.handle().active_request_for(surface).await?.is_none() {
            break rx.try_recv().ok();
        }
    };

    match results {
        Some(results) => {
            println!();
            println!("{:<28}  {:<26}  RATIONALE", "CAPABILITY", "RESULT");
            println!("{}", "-".repeat(68));
            for result in &results {
                println!(
                    "{:<28}  {:<26}  {}",
                    result.capability.display_name(),
                    result.state.to_string(),
                    if result.requires_rationale { "yes" } else { "-" }
                );
            }
        }
        None => println!("no results delivered"),
    }

    println!();
    println!("gate: {}", grantly.gate_status());
    println!();
    if json {
        print!("{}", grantly.journal().to_json_lines().map_err(std::io::Error::from)?);
    } else {
        for entry in grantly.journal().entries() {
            println!("{entry}");
        }
    }

    grantly.shutdown().await?;
    Ok(())
}

fn cmd_config(path: &Path) -> Result<()> {
    let profile = load_profile(path)?;
    let mut config = profile.grantly;

    let issues = config.issues();
    if issues.is_empty() {
        println!("configuration ok");
    }
    let mut fatal = None;
    for issue in issues {
        match issue.kind {
            IssueKind::Cosmetic => {
                println!("repaired: {issue}");
                config.repair(&issue);
            }
            IssueKind::Structural => {
                println!("invalid:  {issue}");
                fatal.get_or_insert(issue);
            }
        }
    }

    println!();
    let effective = toml::to_string_pretty(&config).map_err(|e| Error::Config(e.to_string()))?;
    print!("{effective}");

    match fatal {
        Some(issue) => Err(runtime::Error::InvalidConfiguration(issue).into()),
        None => Ok(()),
    }
}
