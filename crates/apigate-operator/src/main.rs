//! apigate operator - exposes services through APIRules

mod convert;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use apigate_common::crd::APIRule;
use apigate_common::telemetry::{init_telemetry, TelemetryConfig};
use apigate_common::CrdRegistry;
use apigate_controller::config::{
    parse_labels, CorsDefaults, CONFIG_MAP_NAME, CONFIG_MAP_NAMESPACE, DEFAULT_OATHKEEPER_PORT,
    DEFAULT_OATHKEEPER_SVC,
};
use apigate_controller::{error_policy, reconcile, Context, ReconcileConfig};

use convert::{convert_manifest, Version};

/// Watcher timeout (seconds), below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// apigate - reconciles APIRules into Istio and Oathkeeper resources
#[derive(Parser, Debug)]
#[command(name = "apigate", version, about, long_about = None)]
struct Cli {
    /// Print the APIRule CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the APIRule controller (default mode)
    Controller(ControllerArgs),

    /// Convert an APIRule manifest between schema versions and print it
    Convert {
        /// Manifest file (YAML or JSON)
        #[arg(long)]
        file: PathBuf,
        /// Target version
        #[arg(long, value_enum, default_value = "v2alpha1")]
        to: Version,
    },
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// Oathkeeper proxy service host
    #[arg(long, env = "OATHKEEPER_SVC", default_value = DEFAULT_OATHKEEPER_SVC)]
    oathkeeper_svc: String,

    /// Oathkeeper proxy service port
    #[arg(long, env = "OATHKEEPER_SVC_PORT", default_value_t = DEFAULT_OATHKEEPER_PORT)]
    oathkeeper_svc_port: u32,

    /// Seconds between passes over a healthy APIRule
    #[arg(long, env = "DEFAULT_RECONCILIATION_PERIOD", default_value_t = 1800)]
    default_reconciliation_period: u64,

    /// Seconds before retrying a failed APIRule
    #[arg(long, env = "ERROR_RECONCILIATION_PERIOD", default_value_t = 60)]
    error_reconciliation_period: u64,

    /// Seconds between passes over an APIRule being migrated
    #[arg(long, env = "MIGRATION_RECONCILIATION_PERIOD", default_value_t = 60)]
    migration_reconciliation_period: u64,

    /// Default CORS origins, e.g. `regex:.*,exact:https://a.example`
    #[arg(long, env = "CORS_ALLOW_ORIGINS")]
    cors_allow_origins: Option<String>,

    /// Default CORS methods, comma separated
    #[arg(long, env = "CORS_ALLOW_METHODS", value_delimiter = ',')]
    cors_allow_methods: Option<Vec<String>>,

    /// Default CORS headers, comma separated
    #[arg(long, env = "CORS_ALLOW_HEADERS", value_delimiter = ',')]
    cors_allow_headers: Option<Vec<String>>,

    /// Domain appended to hosts without one
    #[arg(long, env = "DEFAULT_DOMAIN")]
    default_domain: Option<String>,

    /// Labels added to every generated object, `k=v,k2=v2`
    #[arg(long, env = "GENERATED_OBJECTS_LABELS", default_value = "")]
    generated_objects_labels: String,
}

impl ControllerArgs {
    /// Flags as if `controller` was given without arguments; env fallbacks apply
    fn parse_defaults() -> anyhow::Result<Self> {
        #[derive(Parser)]
        struct Defaults {
            #[command(flatten)]
            args: ControllerArgs,
        }
        Ok(Defaults::try_parse_from(["apigate"])?.args)
    }

    fn reconcile_config(&self) -> anyhow::Result<ReconcileConfig> {
        let mut cors = CorsDefaults::default();
        if let Some(origins) = &self.cors_allow_origins {
            cors.allow_origins = CorsDefaults::parse_origins(origins)?;
        }
        if let Some(methods) = &self.cors_allow_methods {
            cors.allow_methods = methods.clone();
        }
        if let Some(headers) = &self.cors_allow_headers {
            cors.allow_headers = headers.clone();
        }

        Ok(ReconcileConfig {
            oathkeeper_svc: self.oathkeeper_svc.clone(),
            oathkeeper_port: self.oathkeeper_svc_port,
            cors,
            default_domain: self.default_domain.clone().filter(|d| !d.is_empty()),
            default_period: Duration::from_secs(self.default_reconciliation_period),
            error_period: Duration::from_secs(self.error_reconciliation_period),
            migration_period: Duration::from_secs(self.migration_reconciliation_period),
            extra_labels: parse_labels(&self.generated_objects_labels)?,
            ..ReconcileConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&APIRule::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Convert { file, to }) => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let converted = convert_manifest(&raw, to)?;
            print!("{}", serde_yaml::to_string(&converted)?);
            Ok(())
        }
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::parse_defaults()?).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::default())?;

    let config = args.reconcile_config()?;
    tracing::info!(
        oathkeeper = %format!("{}:{}", config.oathkeeper_svc, config.oathkeeper_port),
        default_domain = ?config.default_domain,
        "Starting APIRule controller"
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let registry = Arc::new(CrdRegistry::discover(client.clone()).await);
    let ctx = Arc::new(Context::new(client.clone(), registry, config));

    let api_rules: Api<APIRule> = Api::all(client.clone());
    let config_maps: Api<ConfigMap> = Api::namespaced(client, CONFIG_MAP_NAMESPACE);

    let controller = Controller::new(
        api_rules,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let known = controller.store();

    // A handler switch in the gateway ConfigMap affects every APIRule
    controller
        .watches(
            config_maps,
            WatcherConfig::default()
                .fields(&format!("metadata.name={CONFIG_MAP_NAME}"))
                .timeout(WATCH_TIMEOUT_SECS),
            move |_| {
                known
                    .state()
                    .iter()
                    .map(|rule| ObjectRef::from_obj(rule.as_ref()))
                    .collect::<Vec<_>>()
            },
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok(action) => tracing::debug!(?action, "APIRule reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "APIRule reconciliation error"),
            }
            std::future::ready(())
        })
        .await;

    tracing::info!("APIRule controller stopped");
    Ok(())
}
