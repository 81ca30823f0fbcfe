//! ppfx: prefix redirector CLI
//!
//! Commands:
//!   resolve <url>   - show where an open of <url> would be served from
//!   stat <url>      - stat through the redirector
//!   cat <url>       - read an object through the redirector to stdout
//!   ls <url>        - list a directory through the redirector
//!   status          - prefix rules and remote storage health
//!   config show     - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ppfx_core::config::PpfxConfig;
use ppfx_core::{Access, DirListFlags, OpenFlags};
use ppfx_redirect::{Dispatcher, RouteDecision};
use ppfx_storage::{check_health, Credentials, OpendalClient};

/// Largest single read issued by `cat`.
const CAT_CHUNK: u32 = 4 * 1024 * 1024;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "ppfx",
    version,
    about = "Prefix redirector client",
    long_about = "ppfx: inspect and exercise local-mirror redirection of remote URLs"
)]
struct Cli {
    /// Path to the ppfx configuration file
    #[arg(
        long,
        short = 'c',
        env = "PPFX_CONFIG",
        default_value = "/etc/ppfx/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PPFX_LOG", default_value = "warn")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "PPFX_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Per-operation timeout in seconds (0: configured default)
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the route an open would take, without opening anything
    Resolve {
        url: String,
        /// Route as a creation (NEW) instead of a read
        #[arg(long)]
        create: bool,
    },

    /// Stat an object through the redirector
    Stat { url: String },

    /// Read an object through the redirector and write it to stdout
    Cat {
        url: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Bytes to read (default: to the end of the object)
        #[arg(long)]
        size: Option<u64>,
    },

    /// List a directory through the redirector
    Ls {
        url: String,
        /// Include size and flags for each entry
        #[arg(long, short = 'l')]
        long: bool,
    },

    /// Show prefix rules and remote storage health
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    let config = load_config(&cli.config)?;
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Resolve { url, create } => cmd_resolve(&config, &url, create),
        Commands::Stat { url } => cmd_stat(&config, &url, timeout).await,
        Commands::Cat { url, offset, size } => cmd_cat(&config, &url, offset, size, timeout).await,
        Commands::Ls { url, long } => cmd_ls(&config, &url, long, timeout).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn load_config(path: &Path) -> Result<PpfxConfig> {
    PpfxConfig::load_or_default(path).with_context(|| format!("loading config: {}", path.display()))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output (`cat` writes raw bytes)
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Remote client from environment credentials ────────────────────────────────

/// Remote client for `[storage]`, with credentials from AWS_ACCESS_KEY_ID and
/// AWS_SECRET_ACCESS_KEY (standard S3 env vars).
fn remote_client(config: &PpfxConfig) -> Result<OpendalClient> {
    let creds = Credentials::from_env()?;
    ppfx_storage::connect(&config.storage, &creds).context("building remote client")
}

fn dispatcher(config: &PpfxConfig, client: OpendalClient) -> Result<Dispatcher> {
    Dispatcher::builder(config.redirect.clone(), Arc::new(client))
        .build()
        .context("building prefix redirector")
}

/// One line describing a routing outcome.
fn describe_route(route: &RouteDecision, remote_url: &str) -> String {
    match route {
        RouteDecision::Local(local) => format!(
            "local  {} (exists: {}, size: {}, writable: {})",
            local.path.display(),
            local.exists,
            local.size,
            local.writable
        ),
        RouteDecision::Remote => format!("remote {remote_url}"),
    }
}

// ── `ppfx resolve` ────────────────────────────────────────────────────────────

fn cmd_resolve(config: &PpfxConfig, url: &str, create: bool) -> Result<()> {
    // Routing only probes the local side; the remote is never contacted.
    let d = dispatcher(config, ppfx_storage::memory_client()?)?;

    let flags = if create { OpenFlags::NEW } else { OpenFlags::READ };
    let (translation, route) = d
        .resolve(url, flags)
        .with_context(|| format!("resolving {url}"))?;

    println!("url:     {}", translation.url);
    println!("path:    {}", translation.remote_path);
    match translation.rule {
        Some(i) => {
            let rule = &d.prefix_table().rules()[i];
            println!("rule:    {} -> {}", rule.remote(), rule.local().display());
        }
        None => println!("rule:    (none)"),
    }
    println!("route:   {}", describe_route(&route, &translation.url));
    Ok(())
}

// ── `ppfx stat` ───────────────────────────────────────────────────────────────

async fn cmd_stat(config: &PpfxConfig, url: &str, timeout: Duration) -> Result<()> {
    let d = dispatcher(config, remote_client(config)?)?;
    let fs = d.create_file_system(url)?;
    let st = fs
        .stat(url, timeout)
        .await
        .with_context(|| format!("stat {url}"))?;

    println!("id:      {}", st.id);
    println!("size:    {}", st.size);
    println!("flags:   {:?}", st.flags);
    println!("mtime:   {}", st.mod_time);
    Ok(())
}

// ── `ppfx cat` ────────────────────────────────────────────────────────────────

async fn cmd_cat(
    config: &PpfxConfig,
    url: &str,
    offset: u64,
    size: Option<u64>,
    timeout: Duration,
) -> Result<()> {
    let d = dispatcher(config, remote_client(config)?)?;
    let file = d.create_file(url)?;
    file.open(url, OpenFlags::READ, Access::NONE, timeout)
        .await
        .with_context(|| format!("opening {url}"))?;

    if let Some(route) = file.route() {
        tracing::info!(route = %describe_route(&route, url), "opened");
    }

    let end = match size {
        Some(n) => offset.saturating_add(n),
        None => file.stat(false, timeout).await?.size,
    };

    let mut stdout = std::io::stdout().lock();
    let mut pos = offset;
    while pos < end {
        let want = (end - pos).min(u64::from(CAT_CHUNK)) as u32;
        let chunk = file
            .read(pos, want, timeout)
            .await
            .with_context(|| format!("reading {url} at {pos}"))?;
        if chunk.length == 0 {
            break;
        }
        stdout.write_all(&chunk.data).context("writing to stdout")?;
        pos += u64::from(chunk.length);
    }
    stdout.flush().context("writing to stdout")?;
    drop(stdout);

    file.close(timeout)
        .await
        .with_context(|| format!("closing {url}"))?;
    Ok(())
}

// ── `ppfx ls` ─────────────────────────────────────────────────────────────────

async fn cmd_ls(config: &PpfxConfig, url: &str, long: bool, timeout: Duration) -> Result<()> {
    let d = dispatcher(config, remote_client(config)?)?;
    let fs = d.create_file_system(url)?;
    let flags = if long {
        DirListFlags::STAT
    } else {
        DirListFlags::NONE
    };
    let listing = fs
        .dir_list(url, flags, timeout)
        .await
        .with_context(|| format!("listing {url}"))?;

    for entry in &listing.entries {
        match (&entry.stat, long) {
            (Some(st), true) => {
                let kind = if st.is_dir() { 'd' } else { '-' };
                println!("{kind} {:>12}  {}", st.size, entry.name);
            }
            _ => println!("{}", entry.name),
        }
    }
    Ok(())
}

// ── `ppfx status` ─────────────────────────────────────────────────────────────

async fn cmd_status(config: &PpfxConfig) -> Result<()> {
    let d = dispatcher(config, ppfx_storage::memory_client()?)?;

    println!("mode:        {:?}", config.redirect.mode);
    println!("probe_error: {:?}", config.redirect.probe_error);
    println!("timeout:     {}s", config.redirect.default_timeout_secs);
    println!("rules:");
    for rule in d.prefix_table().rules() {
        println!("  {} -> {}", rule.remote(), rule.local().display());
    }

    print!("storage:     {} ({}) ", config.storage.endpoint, config.storage.bucket);
    let client = match remote_client(config) {
        Ok(client) => client,
        Err(e) => {
            println!("not checked: {e:#}");
            return Ok(());
        }
    };
    match check_health(client.operator(), &config.redirect.rules).await {
        Ok(report) => {
            println!("ok");
            for missing in report.missing() {
                println!("  warning: nothing stored remotely under {missing}");
            }
        }
        Err(e) => println!("unreachable: {e:#}"),
    }
    Ok(())
}

// ── `ppfx config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &PpfxConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
