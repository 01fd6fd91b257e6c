use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use fahari_ai::{CivicLensEngine, ErrorKind, GenerationError, IssueReport, LegalAssistant};
use fahari_core::{ConfigManager, FahariConfig, LoggingConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

mod render;

#[derive(Parser)]
#[command(
    name = "fahari",
    version,
    author,
    about = "Fahari Legal civic tools: CivicLens issue analysis and a legal information assistant",
    long_about = None
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "FAHARI_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured model
    #[arg(short, long, global = true)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Analyze a civic issue report")]
    Analyze {
        /// Issue text. Read from --file or stdin when omitted.
        text: Option<String>,

        #[arg(short, long, help = "Read the issue text from a file")]
        file: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "pretty")]
        format: OutputFormat,

        #[arg(long, help = "Disable Google Search grounding")]
        no_search: bool,
    },

    #[command(about = "Chat with the Fahari legal information assistant")]
    Chat,

    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    #[command(about = "Show the effective configuration")]
    Show,

    #[command(about = "Write a default configuration file")]
    Init {
        /// Target path. Defaults to ~/.fahari/config.toml.
        path: Option<PathBuf>,

        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(hint) = e.downcast_ref::<GenerationError>().and_then(error_hint) {
            eprintln!("{}", hint.yellow());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // `config init` must work even when the existing file is broken
    if let Commands::Config {
        action: ConfigAction::Init { path, force },
    } = &cli.command
    {
        return handle_config_init(path.as_deref(), *force);
    }

    // The configured subscriber depends on the config, so loading logs through a scoped one
    let mut manager = with_bootstrap_logging(env_filter(cli.verbose, "warn"), std::io::stderr, || {
        ConfigManager::load(cli.config.as_deref())
    })
    .context("Failed to load configuration")?;
    if let Some(model) = &cli.model {
        manager.config_mut().ai.model = model.clone();
        ConfigManager::validate_config(manager.config())?;
    }

    init_tracing(&manager.config().logging, cli.verbose);

    match cli.command {
        Commands::Analyze {
            text,
            file,
            format,
            no_search,
        } => handle_analyze(manager.config(), text, file, format, no_search).await,
        Commands::Chat => handle_chat(manager.config()).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&manager),
            ConfigAction::Init { path, force } => handle_config_init(path.as_deref(), force),
        },
    }
}

fn env_filter(verbose: bool, fallback_level: &str) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_level))
    }
}

/// Run `f` with a thread-local subscriber writing to `writer`
fn with_bootstrap_logging<W, T>(filter: EnvFilter, writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = Registry::default().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_target(false)
            .compact(),
    );
    tracing::subscriber::with_default(subscriber, f)
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let filter = env_filter(verbose, &logging.level);

    // Logs go to stderr so rendered output on stdout stays clean
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if logging.format == "pretty" {
        let subscriber = Registry::default().with(filter).with(fmt_layer.pretty());
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt_layer.compact());
        tracing::subscriber::set_global_default(subscriber).ok();
    }
}

fn error_hint(error: &GenerationError) -> Option<&'static str> {
    if error.is_credential_rejected() {
        return Some(
            "The API key was rejected. Check GEMINI_API_KEY or run `fahari config show`.",
        );
    }
    match error.kind() {
        ErrorKind::Configuration => {
            Some("Set GEMINI_API_KEY in your environment or in a .env file.")
        }
        _ => None,
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn read_issue_text(text: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }

    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("Provide the issue text as an argument, with --file, or on stdin");
    }
    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .context("Failed to read issue text from stdin")?;
    Ok(buffer)
}

async fn handle_analyze(
    config: &FahariConfig,
    text: Option<String>,
    file: Option<PathBuf>,
    format: OutputFormat,
    no_search: bool,
) -> Result<()> {
    let mut ai = config.ai.clone();
    if no_search {
        ai.google_search = false;
    }
    let engine = CivicLensEngine::from_ai_config(&ai)?;

    let report = IssueReport::new(read_issue_text(text, file)?)?;

    let pb = spinner(&format!("Analyzing with {}...", engine.model_name()));
    let result = engine.analyze(&report).await;
    pb.finish_and_clear();
    let analysis = result?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
        OutputFormat::Pretty => print!("{}", render::render_analysis(&analysis)),
    }

    Ok(())
}

async fn handle_chat(config: &FahariConfig) -> Result<()> {
    let mut assistant = LegalAssistant::from_ai_config(&config.ai)?;

    println!("{}", "Fahari Legal Assistant".green().bold());
    println!(
        "{}",
        "General legal information only. This is not legal advice.".dimmed()
    );
    println!("{}", "Type /reset to start over or /exit to quit.\n".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you>".cyan().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match line.trim() {
            "/exit" | "/quit" => break,
            "/reset" => {
                assistant.reset();
                println!("{}", "Conversation cleared.".dimmed());
                continue;
            }
            "" => continue,
            _ => {}
        }

        print!("{} ", "fahari>".green().bold());
        std::io::stdout().flush()?;

        let result = assistant
            .send(&line, |fragment| {
                print!("{}", fragment);
                std::io::stdout().flush().ok();
            })
            .await;
        println!();

        match result {
            Ok(_) => println!(),
            Err(e) if e.kind() == ErrorKind::Configuration || e.is_credential_rejected() => {
                return Err(e.into());
            }
            Err(e) => {
                eprintln!(
                    "{} Failed to get a response from the assistant. Please try again. ({})\n",
                    "Error:".red().bold(),
                    e
                );
            }
        }
    }

    Ok(())
}

fn handle_config_show(manager: &ConfigManager) -> Result<()> {
    let config = manager.config();

    println!("{}", "Configuration".bold().underline());
    match manager.config_path() {
        Some(path) => println!("  {}: {}", "file".cyan().bold(), path.display()),
        None => println!("  {}: {}", "file".cyan().bold(), "(defaults)".dimmed()),
    }
    println!("  {}: {}", "provider".cyan().bold(), config.ai.provider.green());
    println!("  {}: {}", "model".cyan().bold(), config.ai.model.green());
    println!("  {}: {}", "base_url".cyan().bold(), config.ai.base_url);
    println!(
        "  {}: {}",
        "api_key".cyan().bold(),
        if config.ai.api_key.is_some() {
            "set".green()
        } else {
            "not set".red()
        }
    );
    println!("  {}: {}s", "timeout".cyan().bold(), config.ai.timeout_secs);
    println!(
        "  {}: {}",
        "temperature".cyan().bold(),
        config
            .ai
            .temperature
            .map(|t| t.to_string())
            .unwrap_or_else(|| "model default".to_string())
    );
    println!(
        "  {}: {}",
        "google_search".cyan().bold(),
        config.ai.google_search
    );
    println!(
        "  {}: {} ({})",
        "logging".cyan().bold(),
        config.logging.level,
        config.logging.format
    );

    Ok(())
}

fn handle_config_init(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => ConfigManager::user_config_path()
            .context("Could not determine the home directory; pass a path explicitly")?,
    };

    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    ConfigManager::create_default_config(&path)?;
    println!(
        "{} Wrote default configuration to {}",
        "✓".green(),
        path.display()
    );
    println!(
        "{}",
        "The API key is never stored in this file; set GEMINI_API_KEY instead.".dimmed()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_config_warnings_reach_bootstrap_logger() {
        let captured = Captured::default();
        let writer = captured.clone();

        let config = with_bootstrap_logging(
            EnvFilter::new("warn"),
            move || writer.clone(),
            || {
                ConfigManager::apply_env_overrides(FahariConfig::default(), |key| match key {
                    "FAHARI_TIMEOUT_SECS" => Some("abc".to_string()),
                    "FAHARI_TEMPERATURE" => Some("hot".to_string()),
                    _ => None,
                })
            },
        );

        assert_eq!(config.ai.timeout_secs, 120);
        let logs = captured.text();
        assert!(logs.contains("FAHARI_TIMEOUT_SECS: abc"), "logs: {logs}");
        assert!(logs.contains("FAHARI_TEMPERATURE: hot"), "logs: {logs}");
    }

    #[test]
    fn test_verbose_forces_debug_filter() {
        assert_eq!(env_filter(true, "warn").to_string(), "debug");
    }
}
