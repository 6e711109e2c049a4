use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use waypost_core::{EndpointIngress, ProviderSettings};
use waypost_kubehub::ResourceClient;
use waypost_provider::Provider;
use waypost_translate::Translator;

#[derive(Parser, Debug)]
#[command(name = "waypost", version, about = "Kubernetes Ingress configuration provider")]
struct Cli {
    /// YAML settings file; flags override its values
    #[arg(long = "config", env = "WAYPOST_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Json)]
    output: Output,

    #[command(flatten)]
    flags: SettingsFlags,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the provider until Ctrl-C and print every published configuration
    Run,
    /// Print the configuration computed from the current cluster state once
    Render,
    /// Validate the effective settings and print them
    CheckConfig,
}

#[derive(Args, Debug, Default)]
struct SettingsFlags {
    /// Kubernetes API endpoint (external cluster client)
    #[arg(long, env = "WAYPOST_ENDPOINT", global = true)]
    endpoint: Option<String>,
    /// Bearer token (external cluster client)
    #[arg(long, env = "WAYPOST_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,
    /// Certificate authority file (external cluster client)
    #[arg(long = "cert-auth-file", env = "WAYPOST_CERT_AUTH_FILE", global = true)]
    cert_auth_file: Option<String>,
    /// Namespace to watch; repeat or comma separate. Default: all
    #[arg(long = "namespace", env = "WAYPOST_NAMESPACES", value_delimiter = ',', global = true)]
    namespaces: Vec<String>,
    /// Label selector for Ingress objects
    #[arg(long = "label-selector", env = "WAYPOST_LABEL_SELECTOR", global = true)]
    label_selector: Option<String>,
    /// Only process Ingresses of this class
    #[arg(long = "ingress-class", env = "WAYPOST_INGRESS_CLASS", global = true)]
    ingress_class: Option<String>,
    /// IP written to Ingress status
    #[arg(long = "endpoint-ip", env = "WAYPOST_ENDPOINT_IP", global = true)]
    endpoint_ip: Option<String>,
    /// Hostname written to Ingress status
    #[arg(long = "endpoint-hostname", env = "WAYPOST_ENDPOINT_HOSTNAME", global = true)]
    endpoint_hostname: Option<String>,
    /// namespace/name of the Service whose load-balancer address is mirrored
    #[arg(long = "published-service", env = "WAYPOST_PUBLISHED_SERVICE", global = true)]
    published_service: Option<String>,
    #[arg(long = "disable-pass-host-headers", env = "WAYPOST_DISABLE_PASS_HOST_HEADERS", action = ArgAction::SetTrue, global = true)]
    disable_pass_host_headers: bool,
}

impl SettingsFlags {
    fn apply(self, mut s: ProviderSettings) -> ProviderSettings {
        if self.endpoint.is_some() {
            s.endpoint = self.endpoint;
        }
        if self.token.is_some() {
            s.token = self.token;
        }
        if self.cert_auth_file.is_some() {
            s.cert_auth_file_path = self.cert_auth_file;
        }
        if !self.namespaces.is_empty() {
            s.namespaces = self.namespaces;
        }
        if self.label_selector.is_some() {
            s.label_selector = self.label_selector;
        }
        if self.ingress_class.is_some() {
            s.ingress_class = self.ingress_class;
        }
        if self.disable_pass_host_headers {
            s.disable_pass_host_headers = true;
        }
        if self.endpoint_ip.is_some() || self.endpoint_hostname.is_some() || self.published_service.is_some() {
            let ep = s.ingress_endpoint.get_or_insert_with(EndpointIngress::default);
            if self.endpoint_ip.is_some() {
                ep.ip = self.endpoint_ip;
            }
            if self.endpoint_hostname.is_some() {
                ep.hostname = self.endpoint_hostname;
            }
            if self.published_service.is_some() {
                ep.published_service = self.published_service;
            }
        }
        s
    }
}

fn init_tracing() {
    let env = std::env::var("WAYPOST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries configurations
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("WAYPOST_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid WAYPOST_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<ProviderSettings> {
    let Some(path) = path else { return Ok(ProviderSettings::default()) };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml => print!("---\n{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn stop_on_ctrl_c() -> CancellationToken {
    let stop = CancellationToken::new();
    let token = stop.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received, stopping");
        token.cancel();
    });
    stop
}

async fn run(settings: ProviderSettings, output: Output) -> Result<()> {
    let client = waypost_kubehub::connect(&settings).await?;
    let (tx, mut rx) = mpsc::channel(16);
    let stop = stop_on_ctrl_c();
    let provider = Provider::new(client, settings);
    let task = tokio::spawn(provider.provide(tx, stop.clone()));

    while let Some(msg) = rx.recv().await {
        if let Err(e) = print(output, &msg) {
            error!(error = %e, "cannot print configuration");
        }
    }
    task.await.context("provider task panicked")?
}

async fn render(mut settings: ProviderSettings, output: Output) -> Result<()> {
    // rendering never writes Ingress status
    settings.ingress_endpoint = None;
    let client = waypost_kubehub::connect(&settings).await?;
    let stop = CancellationToken::new();
    let _guard = stop.clone().drop_guard();
    // returns once every cache has listed
    let _events = client.watch_all(&settings.namespaces, stop.child_token()).await?;
    let conf = Translator::new(&client, &settings).translate().await;
    print(output, &conf)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let settings = cli.flags.apply(load_settings(cli.config.as_deref())?);
    match cli.command {
        Commands::Run => {
            info!(namespaces = ?settings.namespaces, class = ?settings.ingress_class(), "starting provider");
            run(settings, cli.output).await
        }
        Commands::Render => render(settings, cli.output).await,
        Commands::CheckConfig => {
            settings.validate()?;
            if let Some(Err(e)) = settings.ingress_endpoint.as_ref().and_then(|e| e.published_service_ref()) {
                return Err(e.into());
            }
            print(cli.output, &settings)
        }
    }
}
