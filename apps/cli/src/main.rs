use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use diaphantium_core::{bootstrap, extract_fields, EngineConfig, Runtime};
use indicatif::ProgressBar;
use output::{OutputFormat, Renderer};
use progress::spinner;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "diaphantium",
    version,
    about = "Recover the game's supply protocol field names and inspect the packet engine setup."
)]
struct Cli {
    /// Configuration file (TOML or JSON) layered over the defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the cache directory used by the script client.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    /// Preferred renderer for command output.
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    /// Disable ANSI colors in CLI output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Suppress non-critical CLI output.
    #[arg(long, global = true)]
    quiet: bool,
    /// Disable progress indicators for network work.
    #[arg(long, global = true)]
    no_progress: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand, Clone)]
enum Command {
    /// Extract the supply and cooldown field names from a bundle file or URL.
    Extract {
        source: String,
        /// Download the bundle even when a cached copy exists.
        #[arg(long)]
        refresh: bool,
    },
    /// Locate the bundle referenced by a game page, then extract from it.
    Discover { page: String },
    /// Show the action table and which category skips cooldowns.
    Keys,
    /// Print the effective configuration.
    Config,
    /// Manage the script cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand, Clone)]
enum CacheCommand {
    /// Report cache directory status and hit counters.
    Status,
    /// Clear the in-memory cache while keeping disk artifacts.
    ClearMemory,
}

#[derive(Clone, Debug, Serialize)]
struct CacheStatusReport {
    path: String,
    exists: bool,
    file_count: usize,
    memory_hits: usize,
    disk_hits: usize,
    misses: usize,
}

#[derive(Clone, Debug, Serialize)]
struct KeyRow {
    key: String,
    category: String,
    cooldown_exempt: bool,
}

impl Cli {
    fn progress_enabled(&self) -> bool {
        !self.quiet && !self.no_progress
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    if cli.no_color {
        std::env::set_var("NO_COLOR", "1");
    }

    if let Command::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "diaphantium", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = EngineConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;
    if let Some(dir) = &cli.cache_dir {
        config.client.cache_dir = Some(dir.clone());
    }

    let runtime = bootstrap(config)?;
    let renderer = Renderer::new(cli.format);

    match &cli.command {
        Command::Extract { source, refresh } => {
            handle_extract(source, *refresh, &cli, &renderer, &runtime).await
        }
        Command::Discover { page } => handle_discover(page, &cli, &renderer, &runtime).await,
        Command::Keys => {
            if cli.quiet {
                return Ok(());
            }
            let config = runtime.config();
            let rows: Vec<KeyRow> = config
                .actions
                .entries()
                .iter()
                .map(|binding| KeyRow {
                    key: binding.key.clone(),
                    category: binding.category.to_string(),
                    cooldown_exempt: config.exempt_category.as_ref() == Some(&binding.category),
                })
                .collect();
            renderer.keys(&rows)
        }
        Command::Config => {
            if cli.quiet {
                return Ok(());
            }
            renderer.config(runtime.config())
        }
        Command::Cache { command } => handle_cache_command(command, &cli, &renderer, &runtime),
        Command::Completions { .. } => Ok(()),
    }
}

async fn handle_extract(
    source: &str,
    refresh: bool,
    cli: &Cli,
    renderer: &Renderer,
    runtime: &Runtime,
) -> Result<()> {
    let text = if is_url(source) {
        let spinner = spinner(cli.progress_enabled(), format!("Fetching {source}..."));
        let result = if refresh {
            runtime.client().refresh_text(source).await
        } else {
            runtime.client().fetch_text(source).await
        };
        finish_spinner(spinner, None);
        result.with_context(|| format!("failed to fetch {source}"))?
    } else {
        fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };

    let fields = extract_fields(&text)?;
    info!(
        target: "diaphantium_cli",
        source,
        supply_field = %fields.supply_field,
        cooldown_field = %fields.cooldown_field,
        "extraction succeeded"
    );
    if !cli.quiet {
        renderer.fields(&fields)?;
    }
    Ok(())
}

async fn handle_discover(page: &str, cli: &Cli, renderer: &Renderer, runtime: &Runtime) -> Result<()> {
    let discovery = runtime.page_discovery(page);
    let spinner = spinner(cli.progress_enabled(), format!("Discovering bundle on {page}..."));
    let result = discovery.discover().await;
    match result {
        Ok(fields) => {
            finish_spinner(spinner, Some("Field identifiers recovered".to_string()));
            if !cli.quiet {
                renderer.fields(&fields)?;
            }
            Ok(())
        }
        Err(error) => {
            finish_spinner(spinner, None);
            Err(anyhow::Error::new(error).context(format!("discovery failed for {page}")))
        }
    }
}

fn handle_cache_command(
    command: &CacheCommand,
    cli: &Cli,
    renderer: &Renderer,
    runtime: &Runtime,
) -> Result<()> {
    let client = runtime.client();
    match command {
        CacheCommand::Status => {
            let path = client.cache_dir().clone();
            let (exists, file_count) = match fs::read_dir(&path) {
                Ok(entries) => (true, entries.filter_map(std::result::Result::ok).count()),
                Err(error) => {
                    info!(
                        target: "diaphantium_cli",
                        error = %error,
                        path = %path.display(),
                        "unable to inspect cache directory"
                    );
                    (path.exists(), 0)
                }
            };

            if cli.quiet {
                return Ok(());
            }

            let stats = client.cache_stats();
            let report = CacheStatusReport {
                path: path.display().to_string(),
                exists,
                file_count,
                memory_hits: stats.memory.hits,
                disk_hits: stats.disk.hits,
                misses: stats.total().misses,
            };
            renderer.cache_status(&report)
        }
        CacheCommand::ClearMemory => {
            client.clear_memory_cache();
            if cli.quiet {
                return Ok(());
            }
            renderer.cache_cleared()
        }
    }
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,diaphantium_cli=info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .without_time()
        .with_ansi(!cli.no_color)
        .compact()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow!("failed to initialize logging: {error}"))
}

fn finish_spinner(spinner: Option<ProgressBar>, message: Option<String>) {
    if let Some(progress) = spinner {
        if let Some(msg) = message {
            progress.finish_with_message(msg);
        } else {
            progress.finish_and_clear();
        }
    }
}

mod output {
    use std::fmt::Write;

    use anyhow::Result;
    use clap::ValueEnum;
    use diaphantium_core::{EngineConfig, FieldIdentifier};
    use serde_json::{self, json};

    use crate::{CacheStatusReport, KeyRow};

    #[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
    pub enum OutputFormat {
        Json,
        Table,
        Text,
    }

    #[derive(Copy, Clone, Debug)]
    pub struct Renderer {
        format: OutputFormat,
    }

    impl Renderer {
        pub fn new(format: OutputFormat) -> Self {
            Self { format }
        }

        pub fn fields(&self, fields: &FieldIdentifier) -> Result<()> {
            match self.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(fields)?);
                }
                OutputFormat::Table => {
                    let rows = vec![
                        vec!["supply".to_string(), fields.supply_field.clone()],
                        vec!["cooldown".to_string(), fields.cooldown_field.clone()],
                    ];
                    render_table(&["Field", "Identifier"], &rows);
                }
                OutputFormat::Text => {
                    println!("Supply field: {}", fields.supply_field);
                    println!("Cooldown field: {}", fields.cooldown_field);
                }
            }
            Ok(())
        }

        pub fn keys(&self, rows: &[KeyRow]) -> Result<()> {
            match self.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(rows)?);
                }
                OutputFormat::Table => {
                    let rows: Vec<Vec<String>> = rows
                        .iter()
                        .map(|row| {
                            vec![
                                row.key.clone(),
                                row.category.clone(),
                                if row.cooldown_exempt { "yes" } else { "no" }.to_string(),
                            ]
                        })
                        .collect();
                    render_table(&["Key", "Category", "Cooldown exempt"], &rows);
                }
                OutputFormat::Text => {
                    for row in rows {
                        let suffix = if row.cooldown_exempt { " (no cooldown)" } else { "" };
                        println!("{} -> {}{suffix}", row.key, row.category);
                    }
                }
            }
            Ok(())
        }

        pub fn config(&self, config: &EngineConfig) -> Result<()> {
            match self.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(config)?);
                }
                OutputFormat::Table => {
                    let rows: Vec<Vec<String>> = config_settings(config)?
                        .into_iter()
                        .map(|(label, value)| vec![label.to_string(), value])
                        .collect();
                    render_table(&["Setting", "Value"], &rows);
                }
                OutputFormat::Text => {
                    for (label, value) in config_settings(config)? {
                        println!("{label}: {value}");
                    }
                }
            }
            Ok(())
        }

        pub fn cache_status(&self, report: &CacheStatusReport) -> Result<()> {
            match self.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(report)?);
                }
                OutputFormat::Table => {
                    let rows = vec![
                        vec!["Path".to_string(), report.path.clone()],
                        vec!["Exists".to_string(), report.exists.to_string()],
                        vec!["File Count".to_string(), report.file_count.to_string()],
                        vec!["Memory Hits".to_string(), report.memory_hits.to_string()],
                        vec!["Disk Hits".to_string(), report.disk_hits.to_string()],
                        vec!["Misses".to_string(), report.misses.to_string()],
                    ];
                    render_table(&["Property", "Value"], &rows);
                }
                OutputFormat::Text => {
                    println!("Cache directory: {}", report.path);
                    println!("Exists: {}", report.exists);
                    println!("File count: {}", report.file_count);
                }
            }
            Ok(())
        }

        pub fn cache_cleared(&self) -> Result<()> {
            match self.format {
                OutputFormat::Json => {
                    let payload = json!({ "event": "clear_memory_cache", "status": "success" });
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                }
                OutputFormat::Text => {
                    println!("In-memory cache cleared.");
                }
                OutputFormat::Table => {
                    let rows = vec![vec!["Status".to_string(), "Cleared".to_string()]];
                    render_table(&["Field", "Value"], &rows);
                }
            }
            Ok(())
        }
    }

    /// Human-readable summary of the settings that shape a session.
    pub(crate) fn config_settings(config: &EngineConfig) -> Result<Vec<(&'static str, String)>> {
        let policy = serde_json::to_value(config.cooldown_policy)?;
        Ok(vec![
            ("Bundle path fragment", config.discovery.path_fragment.clone()),
            ("Discovery attempts", config.discovery.max_attempts.to_string()),
            ("Retry interval (ms)", config.discovery.retry_interval_ms.to_string()),
            (
                "Cooldown exempt",
                config
                    .exempt_category
                    .as_ref()
                    .map_or_else(|| "none".to_string(), ToString::to_string),
            ),
            ("Cooldown policy", policy.as_str().unwrap_or_default().to_string()),
            ("Skip on cooldown", config.skip_on_cooldown.to_string()),
            ("Event history", config.event_capacity.to_string()),
            ("Supply interval (ms)", config.clicker.supply_interval_ms.to_string()),
            ("Mine delay (ms)", config.clicker.mine_delay_ms.to_string()),
        ])
    }

    fn render_table(headers: &[&str], rows: &[Vec<String>]) {
        let mut widths: Vec<usize> = headers.iter().map(|header| header.len()).collect();
        for row in rows {
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
        }

        fn render_line(columns: &[&str], widths: &[usize]) -> String {
            let mut line = String::new();
            for (value, &width) in columns.iter().zip(widths) {
                let _ = write!(line, "| {value:width$} ");
            }
            line.push('|');
            line
        }

        println!("{}", render_line(headers, &widths));
        let separator: String = widths
            .iter()
            .map(|width| format!("|{:-^1$}", "", width + 2))
            .collect();
        println!("{separator}|");

        for row in rows {
            let cols: Vec<&str> = row.iter().map(String::as_str).collect();
            println!("{}", render_line(&cols, &widths));
        }
    }
}

mod progress {
    use std::time::Duration;

    use indicatif::{ProgressBar, ProgressStyle};

    pub fn spinner(message_enabled: bool, message: impl Into<String>) -> Option<ProgressBar> {
        if !message_enabled {
            return None;
        }
        let progress = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        progress.set_style(style);
        progress.set_message(message.into());
        progress.enable_steady_tick(Duration::from_millis(80));
        Some(progress)
    }
}
