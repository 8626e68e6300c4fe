use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use relist::core::{ListOptions, ResourceScope, Snapshot, VersionMatch};
use relist::{CancellationToken, InconsistencyPolicy, Lister, RelistConfig, Verdict};
use relist_kubehub::KubeTransport;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "relistctl", version, about = "List Kubernetes collections via watch streams")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all namespaces)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Force streaming lists on or off (default: RELIST_WATCHLIST_CLIENT)
    #[arg(long = "watch-list", global = true)]
    watch_list: Option<bool>,

    /// Serve Prometheus metrics on this address while the command runs
    #[arg(long = "metrics-addr", env = "RELIST_METRICS_ADDR", global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum RvMatch { Exact, NotOlderThan }

#[derive(clap::Args, Debug, Clone)]
struct Query {
    /// GVK key, e.g. "v1/Secret" or "apps/v1/Deployment"
    gvk: String,
    /// Label selector
    #[arg(short = 'l', long = "selector")]
    label_selector: Option<String>,
    /// Field selector
    #[arg(long = "field-selector")]
    field_selector: Option<String>,
    /// Resource version to list at
    #[arg(long = "resource-version")]
    resource_version: Option<String>,
    /// How to interpret --resource-version
    #[arg(long = "rv-match", value_enum)]
    rv_match: Option<RvMatch>,
    /// Page size
    #[arg(long = "limit")]
    limit: Option<u32>,
    /// Per-request timeout in seconds
    #[arg(long = "timeout")]
    timeout: Option<u32>,
}

impl Query {
    fn options(&self) -> ListOptions {
        ListOptions {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            resource_version: self.resource_version.clone(),
            version_match: self.rv_match.map(|m| match m {
                RvMatch::Exact => VersionMatch::Exact,
                RvMatch::NotOlderThan => VersionMatch::NotOlderThan,
            }),
            timeout_seconds: self.timeout,
            limit: self.limit,
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a collection and print its items
    List {
        #[command(flatten)]
        query: Query,
        /// Verify the result against an exact-version list (mismatch handling per RELIST_ON_INCONSISTENCY)
        #[arg(long = "check", action = ArgAction::SetTrue)]
        check: bool,
    },
    /// List a collection, then compare it with an exact-version list and report the verdict
    Verify {
        #[command(flatten)]
        query: Query,
    },
}

fn init_tracing() {
    let env = std::env::var("RELIST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

/// Install the Prometheus recorder; failures are logged and the command carries on.
fn init_metrics(addr: Option<SocketAddr>) {
    let Some(addr) = addr else { return };
    let installed = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("binding metrics listener on {}", addr));
    match installed {
        Ok(()) => info!(%addr, "serving relist_* metrics"),
        Err(e) => warn!(error = %format!("{:#}", e), "metrics disabled"),
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; cancelling in-flight request");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    init_metrics(cli.metrics_addr);

    let mut config = RelistConfig::from_env();
    if let Some(on) = cli.watch_list {
        config.watch_list_client = on;
    }
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match cli.command {
        Commands::List { query, check } => {
            if check {
                config.watch_list_consistency_check = true;
                config.list_from_cache_consistency_check = true;
            }
            let scope = ResourceScope::parse(&query.gvk, cli.namespace.as_deref())?;
            let opts = query.options();
            info!(gvk = %query.gvk, ns = ?cli.namespace, query = %opts.to_query(), "list invoked");
            let lister = Lister::new(KubeTransport::try_default().await?, config);
            let snap = lister.list_with_cancel(&scope, &opts, &cancel).await.context("list failed")?;
            match cli.output {
                Output::Human => print_table(&snap),
                Output::Json => println!("{}", serde_json::to_string_pretty(&snap)?),
            }
            let s = lister.stats().snapshot();
            info!(watch_lists = s.watch_lists, fallbacks = s.fallbacks, plain_lists = s.plain_lists, inconsistencies = s.inconsistencies, "list done");
        }
        Commands::Verify { query } => {
            config.on_inconsistency = InconsistencyPolicy::Alert;
            let scope = ResourceScope::parse(&query.gvk, cli.namespace.as_deref())?;
            let opts = query.options();
            info!(gvk = %query.gvk, ns = ?cli.namespace, "verify invoked");
            let lister = Lister::new(KubeTransport::try_default().await?, config);
            let snap = lister.list_with_cancel(&scope, &opts, &cancel).await.context("list failed")?;
            let verdict = lister.verify_snapshot(&scope, &opts, &snap, &cancel).await.context("verify failed")?;
            match cli.output {
                Output::Human => match &verdict {
                    Verdict::Skipped => println!("skipped (rv={:?}, nothing to pin)", snap.resource_version.as_str()),
                    Verdict::Consistent => println!("consistent: {} items at rv {}", snap.len(), snap.resource_version),
                    Verdict::Unverified(reason) => println!("unverified: {}", reason),
                    Verdict::Inconsistent(r) => println!("INCONSISTENT: {}", r.summary()),
                },
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Row<'a> { verdict: &'a str, items: usize, resource_version: &'a str, report: Option<&'a relist::InconsistencyReport>, reason: Option<&'a str> }
                    let (name, report, reason) = match &verdict {
                        Verdict::Skipped => ("skipped", None, None),
                        Verdict::Consistent => ("consistent", None, None),
                        Verdict::Unverified(r) => ("unverified", None, Some(r.as_str())),
                        Verdict::Inconsistent(r) => ("inconsistent", Some(r), None),
                    };
                    let row = Row { verdict: name, items: snap.len(), resource_version: snap.resource_version.as_str(), report, reason };
                    println!("{}", serde_json::to_string_pretty(&row)?);
                }
            }
            if matches!(verdict, Verdict::Inconsistent(_)) {
                warn!("verify found an inconsistency");
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

fn print_table(snap: &Snapshot) {
    println!("NAMESPACE   NAME                 AGE");
    for item in snap.items.iter() {
        let key = item.key();
        let ns_col = key.namespace.clone().unwrap_or_else(|| "-".to_string());
        let created = item
            .raw()
            .get("metadata")
            .and_then(|m| m.get("creationTimestamp"))
            .and_then(|v| v.as_str());
        println!("{:<11} {:<20} {}", ns_col, key.name, render_age(created));
    }
    println!("RESOURCE VERSION: {}", snap.resource_version);
}

fn render_age(created: Option<&str>) -> String {
    let Some(ts) = created.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) else {
        return "-".to_string();
    };
    let mut secs = (chrono::Utc::now().timestamp() - ts.timestamp()).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}
