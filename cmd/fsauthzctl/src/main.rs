use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use pkg_constants::network::DEFAULT_API_ADDR;
use pkg_constants::rbac::FEATURE_STORE_RESOURCE_KINDS;
use pkg_types::action::AuthzedAction;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Parser)]
#[command(name = "fsauthzctl", about = "CLI for the feature store authorization resolver")]
struct Cli {
    /// Server API endpoint
    #[arg(long, default_value = DEFAULT_API_ADDR)]
    server: String,

    /// Bearer token for /api/v1
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a subject may perform a verb. Exits 1 on deny.
    CanI {
        verb: String,
        resource: String,
        /// Subject: sa:<ns>:<name>, system:serviceaccount:<ns>:<name>, user:<name>, group:<name>
        #[arg(long = "as")]
        subject: String,
        #[arg(long, short)]
        namespace: Option<String>,
        /// Extra group of the subject (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,
        /// Restrict to one named object
        #[arg(long)]
        name: Option<String>,
    },
    /// Check a set of feature store actions; all must be allowed. Exits 1 on deny.
    Actions {
        resource: String,
        #[arg(long = "as")]
        subject: String,
        #[arg(long, short)]
        namespace: Option<String>,
        #[arg(long = "group")]
        groups: Vec<String>,
        /// e.g. read, query_online, write (repeatable)
        #[arg(long = "action", required = true)]
        actions: Vec<String>,
    },
    /// Show resolver health
    Health,
    /// Stream grant deltas
    Watch {
        /// Replay buffered deltas newer than this generation
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
    /// List the feature store resource kinds rules can name
    Kinds,
}

#[derive(Deserialize)]
struct VerdictResponse {
    allowed: bool,
    synced: bool,
}

#[derive(Deserialize)]
struct HealthReport {
    synced: bool,
    degraded: bool,
    authorized: bool,
    kinds: BTreeMap<String, String>,
}

fn parse_action(raw: &str) -> anyhow::Result<AuthzedAction> {
    serde_json::from_value(json!(raw))
        .map_err(|_| anyhow::anyhow!("unknown action '{}'", raw))
}

struct Client {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl Client {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base, path);
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn verdict(&self, path: &str, body: serde_json::Value) -> anyhow::Result<bool> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("server returned {}: {}", status, text);
        }
        let verdict: VerdictResponse = resp.json().await?;
        if !verdict.synced {
            eprintln!("warning: resolver has not finished its initial sync");
        }
        Ok(verdict.allowed)
    }
}

fn report(allowed: bool) -> ! {
    if allowed {
        println!("yes");
        std::process::exit(0);
    }
    println!("no");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let client = Client {
        http: reqwest::Client::new(),
        base: cli.server.trim_end_matches('/').to_string(),
        token: cli.token,
    };

    match cli.command {
        Commands::CanI {
            verb,
            resource,
            subject,
            namespace,
            groups,
            name,
        } => {
            info!("Checking {} {} for {} against {}", verb, resource, subject, client.base);
            let allowed = client
                .verdict(
                    "/api/v1/authorize",
                    json!({
                        "subject": subject,
                        "groups": groups,
                        "verb": verb,
                        "resource": resource,
                        "namespace": namespace,
                        "resource_name": name,
                    }),
                )
                .await?;
            report(allowed);
        }
        Commands::Actions {
            resource,
            subject,
            namespace,
            groups,
            actions,
        } => {
            let actions = actions
                .iter()
                .map(|a| parse_action(a))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let allowed = client
                .verdict(
                    "/api/v1/authorize/actions",
                    json!({
                        "subject": subject,
                        "groups": groups,
                        "actions": actions,
                        "resource": resource,
                        "namespace": namespace,
                    }),
                )
                .await?;
            report(allowed);
        }
        Commands::Health => {
            let resp = client.request(reqwest::Method::GET, "/healthz").send().await?;
            if !resp.status().is_success() {
                eprintln!("Error: server returned {}", resp.status());
                std::process::exit(1);
            }
            let health: HealthReport = resp.json().await?;
            println!("Authorized:  {}", health.authorized);
            println!("Synced:      {}", health.synced);
            println!("Degraded:    {}", health.degraded);
            println!();
            println!("{:<24} {}", "KIND", "PHASE");
            for (kind, phase) in &health.kinds {
                println!("{:<24} {}", kind, phase);
            }
            if health.kinds.is_empty() {
                println!("(no watches: allow-all mode)");
            }
        }
        Commands::Watch { since } => {
            let resp = client
                .request(
                    reqwest::Method::GET,
                    &format!("/api/v1/watch/grants?since={}", since),
                )
                .send()
                .await?;
            if !resp.status().is_success() {
                eprintln!("Error: server returned {}", resp.status());
                std::process::exit(1);
            }
            let mut stream = resp.bytes_stream();
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                buf.push_str(&String::from_utf8_lossy(&chunk?));
                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    if let Some(data) = line.trim_end().strip_prefix("data:") {
                        println!("{}", data.trim_start());
                    }
                }
            }
        }
        Commands::Kinds => {
            for kind in FEATURE_STORE_RESOURCE_KINDS {
                println!("{}", kind);
            }
        }
    }

    Ok(())
}
