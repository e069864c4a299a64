use anyhow::Context;
use clap::Parser;
use pkg_api::AppState;
use pkg_api::server::start_server;
use pkg_authz::resolver::Resolver;
use pkg_authz::{AllowAll, Authorize};
use pkg_constants::cache::{DEFAULT_DECISION_CAPACITY, DEFAULT_DECISION_TTL_MS};
use pkg_constants::network::DEFAULT_API_PORT;
use pkg_constants::paths::DEFAULT_SERVER_CONFIG;
use pkg_constants::state::{
    DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_SECS,
    DEFAULT_DEGRADED_AFTER_FAILURES,
};
use pkg_controllers::backoff::Backoff;
use pkg_controllers::health::HealthTracker;
use pkg_controllers::ingest::WatchSettings;
use pkg_controllers::kube_source::KubeSource;
use pkg_controllers::supervisor::Supervisor;
use pkg_metrics::ResolverMetrics;
use pkg_state::store::RbacStore;
use pkg_types::config::{AuthMode, LogFormat, ServerConfigFile, load_config_file};
use pkg_types::event::WatchKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fsauthz-server",
    about = "Kubernetes RBAC authorization resolver for the feature store"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// kubernetes or allow-all
    #[arg(long)]
    mode: Option<AuthMode>,

    /// Bearer token callers must present on /api/v1
    #[arg(long)]
    api_token: Option<String>,

    #[arg(long)]
    cache_ttl_ms: Option<u64>,

    #[arg(long)]
    cache_capacity: Option<usize>,

    /// Timeout of a single list, watch or access-review call
    #[arg(long)]
    attempt_timeout_secs: Option<u64>,

    #[arg(long)]
    backoff_base_ms: Option<u64>,

    #[arg(long)]
    backoff_cap_secs: Option<u64>,

    /// Failed re-lists in a row before a kind reports degraded
    #[arg(long)]
    degraded_after_failures: Option<u32>,

    /// Also watch ClusterRoles (needs get/list/watch on clusterroles)
    #[arg(long)]
    watch_cluster_roles: bool,

    /// text or json
    #[arg(long)]
    log_format: Option<LogFormat>,
}

/// Effective settings after merging CLI > config file > defaults.
#[derive(Debug)]
struct Settings {
    port: u16,
    mode: AuthMode,
    api_token: Option<String>,
    cache_ttl: Duration,
    cache_capacity: usize,
    watch: WatchSettings,
    kinds: Vec<WatchKind>,
    log_format: LogFormat,
}

impl Settings {
    fn merge(cli: Cli, file: ServerConfigFile) -> Self {
        let watch_cluster_roles =
            cli.watch_cluster_roles || file.watch_cluster_roles.unwrap_or(false);
        let kinds = if watch_cluster_roles {
            vec![
                WatchKind::Roles,
                WatchKind::ClusterRoles,
                WatchKind::RoleBindings,
                WatchKind::ClusterRoleBindings,
            ]
        } else {
            WatchKind::defaults().to_vec()
        };
        let backoff = Backoff::new(
            Duration::from_millis(
                cli.backoff_base_ms
                    .or(file.backoff_base_ms)
                    .unwrap_or(DEFAULT_BACKOFF_BASE_MS),
            ),
            Duration::from_secs(
                cli.backoff_cap_secs
                    .or(file.backoff_cap_secs)
                    .unwrap_or(DEFAULT_BACKOFF_CAP_SECS),
            ),
        );
        Self {
            port: cli.port.or(file.port).unwrap_or(DEFAULT_API_PORT),
            mode: cli.mode.or(file.mode).unwrap_or_default(),
            api_token: cli.api_token.or(file.api_token).filter(|t| !t.is_empty()),
            cache_ttl: Duration::from_millis(
                cli.cache_ttl_ms
                    .or(file.cache_ttl_ms)
                    .unwrap_or(DEFAULT_DECISION_TTL_MS),
            ),
            cache_capacity: cli
                .cache_capacity
                .or(file.cache_capacity)
                .unwrap_or(DEFAULT_DECISION_CAPACITY),
            watch: WatchSettings {
                attempt_timeout: Duration::from_secs(
                    cli.attempt_timeout_secs
                        .or(file.attempt_timeout_secs)
                        .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT_SECS),
                ),
                backoff,
                degraded_after: cli
                    .degraded_after_failures
                    .or(file.degraded_after_failures)
                    .unwrap_or(DEFAULT_DEGRADED_AFTER_FAILURES)
                    .max(1),
            },
            kinds,
            log_format: cli.log_format.or(file.log_format).unwrap_or_default(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)
        .with_context(|| format!("reading config file {}", cli.config))?;
    let config_path = cli.config.clone();
    let settings = Settings::merge(cli, file_cfg);
    init_tracing(settings.log_format);

    info!("Starting fsauthz-server");
    info!("  Config:    {}", config_path);
    info!("  Port:      {}", settings.port);
    info!("  Mode:      {:?}", settings.mode);
    info!(
        "  Cache:     {} entries, ttl {}ms",
        settings.cache_capacity,
        settings.cache_ttl.as_millis()
    );
    info!(
        "  Token:     {}",
        if settings.api_token.is_some() { "required" } else { "none" }
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let metrics = Arc::new(ResolverMetrics::new());

    let (state, supervisor) = match settings.mode {
        AuthMode::AllowAll => {
            warn!("Authorization disabled: every request is allowed");
            let state = AppState {
                authorizer: Arc::new(AllowAll) as Arc<dyn Authorize>,
                health: HealthTracker::allow_all(),
                metrics,
                deltas: RbacStore::default().deltas().clone(),
                api_token: settings.api_token,
            };
            (state, None)
        }
        AuthMode::Kubernetes => {
            let (store, resolver) =
                Resolver::wire(settings.cache_capacity, settings.cache_ttl, metrics.clone());
            let health = HealthTracker::new(&settings.kinds);
            let source = KubeSource::try_default()
                .await
                .context("building Kubernetes client")?;
            info!(
                "  Watching:  {}",
                settings
                    .kinds
                    .iter()
                    .map(|k| k.plural())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let supervisor = Supervisor::new(
                Arc::new(source),
                store.clone(),
                health.clone(),
                metrics.clone(),
                settings.watch,
                settings.kinds,
            );
            let state = AppState {
                authorizer: resolver as Arc<dyn Authorize>,
                health,
                metrics,
                deltas: store.deltas().clone(),
                api_token: settings.api_token,
            };
            (state, Some(supervisor))
        }
    };

    // Probes answer while the permission check runs; verdicts wait for it.
    let server = tokio::spawn(start_server(addr, state));
    if let Some(supervisor) = supervisor {
        supervisor
            .start()
            .await
            .context("startup permission check failed")?;
    }
    server.await??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_overrides_defaults() {
        let cli = Cli::parse_from(["fsauthz-server", "--port", "9100", "--mode", "allow-all"]);
        let file = ServerConfigFile {
            port: Some(9000),
            cache_ttl_ms: Some(250),
            watch_cluster_roles: Some(true),
            ..Default::default()
        };
        let settings = Settings::merge(cli, file);
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.mode, AuthMode::AllowAll);
        assert_eq!(settings.cache_ttl, Duration::from_millis(250));
        assert_eq!(settings.cache_capacity, DEFAULT_DECISION_CAPACITY);
        assert_eq!(settings.kinds.len(), 4);
        assert!(settings.api_token.is_none());
    }

    #[test]
    fn default_kinds_skip_cluster_roles() {
        let cli = Cli::parse_from(["fsauthz-server"]);
        let settings = Settings::merge(cli, ServerConfigFile::default());
        assert_eq!(settings.kinds, WatchKind::defaults().to_vec());
        assert_eq!(settings.watch.degraded_after, DEFAULT_DEGRADED_AFTER_FAILURES);
        assert_eq!(settings.log_format, LogFormat::Text);
    }
}
