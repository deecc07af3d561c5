use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use mirador_client::{KubeListWatch, ListWatch, TransportError};
use mirador_core::{LabelSelector, ObjectState};
use mirador_informer::{Handler, Informer, InformerConfig};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "miradorctl", version, about = "Label-filtered cluster resource mirror")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all namespaces)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Equality label selector, e.g. "runtime=wasm,type=faas-wasm"
    #[arg(short = 'l', long = "selector", global = true)]
    selector: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List matching objects once
    Ls {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        #[arg(default_value = "v1/ConfigMap")]
        gvk: String,
    },
    /// Mirror matching objects and print +/~/- change lines
    Watch {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        #[arg(default_value = "v1/ConfigMap")]
        gvk: String,

        /// Resync cadence in seconds; 0 disables
        #[arg(long = "resync", env = "MIRADOR_RESYNC_SECS", default_value_t = 30)]
        resync: i64,

        /// Dispatcher queue capacity
        #[arg(long = "queue-cap", env = "MIRADOR_QUEUE_CAP", default_value_t = 1024)]
        queue_cap: usize,
    },
}

fn init_tracing() {
    let env = std::env::var("MIRADOR_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MIRADOR_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid MIRADOR_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let selector = match cli.selector.as_deref().map(LabelSelector::parse).transpose() {
        Ok(sel) => sel.unwrap_or_default(),
        Err(e) => {
            eprintln!("selector error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Ls { gvk } => {
            let transport = connect(&gvk, cli.namespace.as_deref(), &selector).await;
            match transport.list().await {
                Ok(snapshot) => print_list(&snapshot.objects, cli.output),
                Err(err) => exit_transport(err),
            }
        }
        Commands::Watch { gvk, resync, queue_cap } => {
            let transport = connect(&gvk, cli.namespace.as_deref(), &selector).await;
            let config = InformerConfig {
                selector,
                queue_capacity: queue_cap,
                resync_interval: if resync > 0 {
                    Some(Duration::from_secs(resync as u64))
                } else {
                    None
                },
                ..InformerConfig::default()
            };
            info!(gvk = %gvk, ns = ?cli.namespace, resync, "starting informer");

            let informer = Informer::new(transport, config);
            informer.subscribe(Arc::new(PrintHandler));

            let token = CancellationToken::new();
            spawn_signal_handler(token.clone());

            match informer.run(token).await {
                Ok(()) => info!("shutdown complete"),
                Err(err) => exit_transport(err),
            }
        }
    }
}

async fn connect(gvk: &str, namespace: Option<&str>, selector: &LabelSelector) -> KubeListWatch {
    match KubeListWatch::connect(gvk, namespace, selector).await {
        Ok(transport) => transport,
        Err(err) => {
            error!(error = ?err, "transport setup failed");
            eprintln!("setup error: {:#}", err);
            std::process::exit(1);
        }
    }
}

fn exit_transport(err: TransportError) -> ! {
    match err {
        TransportError::Auth(reason) => {
            error!(reason = %reason, "authentication failed");
            eprintln!("authentication error: {}", reason);
            std::process::exit(2);
        }
        other => {
            error!(error = %other, "transport failed");
            eprintln!("transport error: {}", other);
            std::process::exit(1);
        }
    }
}

/// Prints one line per change, generalizing the uid+name add lines to
/// updates and deletes.
struct PrintHandler;

impl Handler for PrintHandler {
    fn on_add(&self, new: &ObjectState) {
        println!("+ {}\t{}", uid_or_dash(new), new.id);
    }

    fn on_update(&self, _old: &ObjectState, new: &ObjectState) {
        println!("~ {}\t{}", uid_or_dash(new), new.id);
    }

    fn on_delete(&self, last: &ObjectState) {
        println!("- {}\t{}", uid_or_dash(last), last.id);
    }
}

fn uid_or_dash(o: &ObjectState) -> &str {
    o.uid.as_deref().unwrap_or("-")
}

fn print_list(objects: &[ObjectState], output: Output) {
    match output {
        Output::Human => {
            println!("NAMESPACE   NAME                 AGE");
            for obj in objects {
                let ns = obj.id.namespace.clone().unwrap_or_else(|| "-".to_string());
                println!("{:<11} {:<20} {}", ns, obj.id.name, render_age(obj.creation_ts));
            }
        }
        Output::Json => {
            let raw: Vec<_> = objects.iter().map(|o| &o.raw).collect();
            match serde_json::to_string_pretty(&raw) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("encode error: {}", e),
            }
        }
    }
}

/// First signal cancels and lets the informer drain; a second one exits
/// immediately.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        warn!("signal received; shutting down");
        token.cancel();

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        error!("second signal; exiting immediately");
        std::process::exit(1);
    });
}

fn render_age(creation_ts: i64) -> String {
    if creation_ts <= 0 {
        return "-".to_string();
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let mut secs = (now - creation_ts).max(0) as u64;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}
