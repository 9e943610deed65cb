// # ddnsd - DDNS Daemon
//
// ⚠️ ARCHITECTURAL CONSTRAINTS ⚠️
//
// CRITICAL RULES:
// - This is a THIN integration layer ONLY
// - DO NOT add business logic, DNS logic, or retry logic here
// - All DDNS logic MUST be in ddns-core
//
// The ddnsd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime
// 3. Registering providers and IP sources
// 4. Loading the binding file and handing every binding to the overwatch
// 5. Reloading the binding file on SIGHUP, stopping everything on SIGTERM/SIGINT
//
// ## Configuration
//
// ### Environment
// - `DDNS_CONFIG`: Path of the JSON binding file (default `/etc/ddns/bindings.json`)
// - `DDNS_LOG_LEVEL`: trace, debug, info, warn, error (default info)
// - `DDNS_IP_CACHE_TIMES`: Cycles an unchanged address is skipped (default 5)
// - `DDNS_DNS_SERVER`: DNS server (`host:port`) used instead of the system resolver
//
// ### Binding file
//
// ```json
// {
//   "bindings": [
//     {
//       "name": "home",
//       "delay_secs": 300,
//       "ipv4": {
//         "enable": true,
//         "source": { "type": "http", "url": "https://api.ipify.org, https://ifconfig.me/ip" },
//         "domains": ["www.example.com", "example.com?proxied=true"]
//       },
//       "dns": { "provider": "cloudflare", "secret": "your_token" },
//       "webhook": { "url": "https://hook.example.net/?ip=#{ipv4Addr}&r=#{ipv4Result}" }
//     }
//   ]
// }
// ```
//
// ## Example
//
// ```bash
// export DDNS_CONFIG=/etc/ddns/bindings.json
// export DDNS_LOG_LEVEL=debug
//
// ddnsd
// ```

use anyhow::{Context, Result};
use ddns_core::config::{IP_CACHE_TIMES_ENV, ip_cache_times_from_env};
use ddns_core::net::init_dns_server_from_env;
use ddns_core::{DdnsConfig, Overwatch, ProviderRegistry, ServiceCallback};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Default location of the binding file
const DEFAULT_CONFIG_PATH: &str = "/etc/ddns/bindings.json";

/// Upper bound for stopping every service on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DdnsExitCode> for ExitCode {
    fn from(code: DdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    config_path: PathBuf,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        Self {
            config_path: env::var("DDNS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
            log_level: env::var("DDNS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if !self.config_path.is_file() {
            anyhow::bail!(
                "Binding file {} does not exist. \
                Set its path via: export DDNS_CONFIG=/path/to/bindings.json",
                self.config_path.display()
            );
        }

        if let Ok(times) = env::var(IP_CACHE_TIMES_ENV)
            && times.trim().parse::<u32>().is_err()
        {
            anyhow::bail!(
                "{} must be a non-negative integer. Got: {}",
                IP_CACHE_TIMES_ENV,
                times
            );
        }

        parse_log_level(&self.log_level)?;
        Ok(())
    }
}

/// Map `DDNS_LOG_LEVEL` to a tracing level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "DDNS_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

/// On-disk binding file
#[derive(Debug, Deserialize)]
struct BindingFile {
    #[serde(default)]
    bindings: Vec<DdnsConfig>,
}

/// Read and validate every binding in `path`
fn load_bindings(path: &Path) -> Result<Vec<DdnsConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read binding file {}", path.display()))?;
    let file: BindingFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse binding file {}", path.display()))?;

    let mut names = HashSet::new();
    for binding in &file.bindings {
        binding.validate()?;
        if !names.insert(binding.name.as_str()) {
            anyhow::bail!("Duplicate binding name: {}", binding.name);
        }
    }

    Ok(file.bindings)
}

/// Fill the registration table with every compiled-in adapter and source
fn build_registry() -> ProviderRegistry {
    #[allow(unused_mut)]
    let mut registry = ProviderRegistry::new();

    #[cfg(feature = "cloudflare")]
    {
        info!("Registering Cloudflare provider");
        ddns_provider_cloudflare::register(&mut registry);
    }

    #[cfg(feature = "callback")]
    {
        info!("Registering callback provider");
        ddns_provider_callback::register(&mut registry);
    }

    #[cfg(feature = "http")]
    {
        info!("Registering HTTP IP source");
        ddns_ip_http::register(&mut registry);
    }

    #[cfg(feature = "command")]
    {
        info!("Registering command IP source");
        ddns_ip_command::register(&mut registry);
    }

    #[cfg(feature = "interface")]
    {
        info!("Registering network-interface IP source");
        ddns_ip_interface::register(&mut registry);
    }

    registry
}

/// Bring the overwatch in line with `bindings`.
///
/// Unchanged bindings keep running, changed ones are restarted and bindings
/// no longer listed are stopped. A binding that cannot be built is logged and
/// skipped; returns how many of them there were.
async fn apply_bindings(
    overwatch: &Overwatch,
    registry: &ProviderRegistry,
    bindings: Vec<DdnsConfig>,
) -> usize {
    let wanted: HashSet<String> = bindings.iter().map(|b| b.name.clone()).collect();
    let mut failed = 0;

    for binding in bindings {
        let name = binding.name.clone();
        match registry.create_service(binding) {
            Ok(service) => {
                if overwatch.add(service).await {
                    info!("[{}] DDNS service started", name);
                }
            }
            Err(e) => {
                error!("[{}] Failed to create DDNS service: {}", name, e);
                failed += 1;
            }
        }
    }

    for name in overwatch.names().await {
        if !wanted.contains(&name) {
            overwatch.remove(&name).await;
        }
    }

    failed
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = Config::from_env();

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = parse_log_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    let bindings = match load_bindings(&config.config_path) {
        Ok(bindings) => bindings,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    info!("Starting ddnsd daemon");
    info!("Configuration loaded: {} binding(s)", bindings.len());
    info!("Unchanged addresses are re-sent every {} cycles", ip_cache_times_from_env().saturating_add(1));
    if let Some(server) = init_dns_server_from_env() {
        info!("Using DNS server {}", server);
    }

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DdnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config, bindings).await {
            error!("Daemon error: {:#}", e);
            DdnsExitCode::RuntimeError
        } else {
            DdnsExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config, bindings: Vec<DdnsConfig>) -> Result<()> {
    let registry = build_registry();

    let callback: ServiceCallback = Arc::new(|kind: &str, name: &str, err: Option<&ddns_core::Error>| {
        match err {
            Some(e) => warn!("[{}] {} service exited: {}", name, kind, e),
            None => info!("[{}] {} service exited", name, kind),
        }
    });
    let overwatch = Overwatch::with_callback(callback);

    let failed = apply_bindings(&overwatch, &registry, bindings).await;
    if failed > 0 && overwatch.is_empty().await {
        anyhow::bail!("None of the configured bindings could be started");
    }

    info!("Daemon initialized successfully");

    let signal = wait_for_signals(&config, &overwatch, &registry).await;
    match &signal {
        Ok(name) => info!("Received shutdown signal: {}", name),
        Err(e) => error!("Signal handling error: {}", e),
    }

    info!("Shutting down daemon");
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, overwatch.shutdown())
        .await
        .is_err()
    {
        anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT);
    }

    signal.map(|_| ())
}

/// Reload the binding file, keeping the running set on errors
async fn reload(config: &Config, overwatch: &Overwatch, registry: &ProviderRegistry) {
    info!("Reloading bindings from {}", config.config_path.display());
    match load_bindings(&config.config_path) {
        Ok(bindings) => {
            apply_bindings(overwatch, registry, bindings).await;
            info!("Reload complete: {} binding(s) active", overwatch.len().await);
        }
        Err(e) => error!("Reload failed, keeping current bindings: {:#}", e),
    }
}

/// Serve SIGHUP reloads until SIGTERM or SIGINT arrives
///
/// # Returns
///
/// Returns the name of the terminating signal.
#[cfg(unix)]
async fn wait_for_signals(
    config: &Config,
    overwatch: &Overwatch,
    registry: &ProviderRegistry,
) -> Result<&'static str> {
    // Set up signal handlers for SIGTERM, SIGINT and SIGHUP
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGHUP handler: {}", e))?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => return Ok("SIGTERM"),
            _ = sigint.recv() => return Ok("SIGINT"),
            _ = sighup.recv() => reload(config, overwatch, registry).await,
        }
    }
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms; reloading needs a restart.
#[cfg(not(unix))]
async fn wait_for_signals(
    _config: &Config,
    _overwatch: &Overwatch,
    _registry: &ProviderRegistry,
) -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
