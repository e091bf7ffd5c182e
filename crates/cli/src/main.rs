use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use odg_chart::RegistryClient;
use odg_kubehub::crds::owned_crds;
use odg_kubehub::{consume, ApiSource, EventHandler, InstallationTarget, Odg, OdgExtension, WatchSource};
use odg_operator::config::{DEFAULT_COMPONENT_NAME, DEFAULT_OCM_REPOSITORY};
use odg_operator::{ComponentSettings, Installer, InstallerSettings, Orchestrator, RenderSettings, Renderer};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "odgctl", version, about = "Open Delivery Gear operator")]
struct Cli {
    /// Kubeconfig of the operator's own cluster (default: in-cluster or KUBECONFIG)
    #[arg(long = "kubeconfig", env = "ODG_KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Yaml,
    Json,
}

#[derive(Args, Debug, Clone)]
struct ComponentArgs {
    /// OCM repository holding the platform component (host[/path])
    #[arg(long = "ocm-repository", env = "ODG_OCM_REPOSITORY", default_value = DEFAULT_OCM_REPOSITORY)]
    ocm_repository: String,
    /// Name of the platform component
    #[arg(long = "component", env = "ODG_COMPONENT_NAME", default_value = DEFAULT_COMPONENT_NAME)]
    component_name: String,
    /// Registries (host[:port]) to reach over plain HTTP
    #[arg(long = "plain-http", env = "ODG_PLAIN_HTTP_REGISTRIES", value_delimiter = ',')]
    plain_http: Vec<String>,
}

impl From<ComponentArgs> for ComponentSettings {
    fn from(a: ComponentArgs) -> Self {
        Self { ocm_repository: a.ocm_repository, component_name: a.component_name, plain_http: a.plain_http }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch ODG resources and derive one ODGE secret per extension
    Orchestrate {
        #[command(flatten)]
        component: ComponentArgs,
    },
    /// Watch ODGE resources and render their charts
    Render {
        /// helm binary used for templating
        #[arg(long = "helm", env = "ODG_HELM_BIN", default_value = "helm")]
        helm: PathBuf,
        /// Registries (host[:port]) to reach over plain HTTP
        #[arg(long = "plain-http", env = "ODG_PLAIN_HTTP_REGISTRIES", value_delimiter = ',')]
        plain_http: Vec<String>,
    },
    /// Watch Installation resources and run the platform installer against their clusters
    Install {
        /// Only watch this namespace (default: all)
        #[arg(long = "ns", env = "ODG_INSTALL_NAMESPACE")]
        namespace: Option<String>,
        /// Namespace of the platform config map
        #[arg(long = "config-namespace", env = "ODG_CONFIG_NAMESPACE", default_value = "odg")]
        config_namespace: String,
        /// Name of the platform config map
        #[arg(long = "config-name", env = "ODG_CONFIG_NAME", default_value = "odg-cfg")]
        config_name: String,
        #[command(flatten)]
        component: ComponentArgs,
    },
    /// Print the custom resource definitions this operator owns
    Crds {
        #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Yaml)]
        output: Output,
    },
}

fn init_tracing() {
    let env = std::env::var("ODG_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ODG_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid ODG_METRICS_ADDR; expected host:port");
        }
    }
}

/// Run one controller until its watch fails fatally or Ctrl-C.
async fn run<K, S, H>(source: S, mut handler: H) -> Result<()>
where
    K: kube::Resource + Send + 'static,
    S: WatchSource<K>,
    H: EventHandler<K>,
{
    tokio::select! {
        res = consume(&source, &mut handler) => res,
        _ = signal::ctrl_c() => {
            warn!("Ctrl-C received; stopping controller");
            Ok(())
        }
    }
}

fn print_crds(output: Output) -> Result<()> {
    let crds = owned_crds();
    match output {
        Output::Yaml => {
            for crd in &crds {
                print!("---\n{}", serde_yaml::to_string(crd)?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&crds)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Crds { output } => print_crds(output),
        Commands::Orchestrate { component } => {
            let settings = ComponentSettings::from(component);
            info!(repo = %settings.ocm_repository, component = %settings.component_name, "orchestrator starting");
            let client = odg_kubehub::client(cli.kubeconfig.as_deref()).await?;
            let repository = settings.repository(settings.registry().context("building registry client")?);
            let orchestrator = Orchestrator::new(client.clone(), settings.resolver(repository));
            run(ApiSource::<Odg>::new(client, None), orchestrator).await
        }
        Commands::Render { helm, plain_http } => {
            let render = RenderSettings { helm_bin: helm };
            info!(helm = %render.helm_bin.display(), "renderer starting");
            let client = odg_kubehub::client(cli.kubeconfig.as_deref()).await?;
            let fetcher = RegistryClient::new(plain_http).context("building registry client")?;
            let renderer = Renderer::new(client.clone(), fetcher, render.templater());
            run(ApiSource::<OdgExtension>::new(client, None), renderer).await
        }
        Commands::Install { namespace, config_namespace, config_name, component } => {
            let settings = ComponentSettings::from(component);
            let installer_settings = InstallerSettings { config_namespace, config_name, ..InstallerSettings::default() };
            info!(
                ns = ?namespace,
                config = %format!("{}/{}", installer_settings.config_namespace, installer_settings.config_name),
                "installer starting"
            );
            let client = odg_kubehub::client(cli.kubeconfig.as_deref()).await?;
            let repository = settings.repository(settings.registry().context("building registry client")?);
            let installer = Installer::new(client.clone(), repository, settings.component_name.clone(), installer_settings);
            run(ApiSource::<InstallationTarget>::new(client, namespace.as_deref()), installer).await
        }
    }
}
