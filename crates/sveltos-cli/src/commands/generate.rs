//! `generate kubeconfig`: bootstrap a ServiceAccount on the cluster the
//! current kubeconfig points at and emit a kubeconfig for it.
//!
//! ```text
//! sveltosctl generate kubeconfig --create --expiration-seconds 3600 > managed.yaml
//! sveltosctl generate kubeconfig --service-account-token --timeout 2m -o managed.yaml
//! ```

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sveltos_common::retry::Cancellation;
use sveltos_common::{BootstrapOptions, Bootstrapper, KubeRemoteClient, PROJECTSVELTOS};

use super::parse_duration;
use crate::{CtlConfig, Result};

/// Generate command arguments
#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(subcommand)]
    pub command: GenerateCommands,
}

#[derive(Subcommand, Debug)]
pub enum GenerateCommands {
    /// Generate a kubeconfig Sveltos can use to manage a cluster
    Kubeconfig(KubeconfigArgs),
}

/// `generate kubeconfig` arguments
#[derive(Args, Debug, Clone)]
pub struct KubeconfigArgs {
    /// Namespace of the ServiceAccount
    #[arg(long, default_value = PROJECTSVELTOS)]
    pub namespace: String,

    /// ServiceAccount the kubeconfig authenticates as
    #[arg(long, default_value = PROJECTSVELTOS)]
    pub service_account: String,

    /// Create the namespace, ServiceAccount, ClusterRole and
    /// ClusterRoleBinding instead of requiring them to exist
    #[arg(long)]
    pub create: bool,

    /// Requested token lifetime in seconds (0 = cluster default)
    #[arg(long, default_value_t = 0)]
    pub expiration_seconds: i64,

    /// Use a long-lived token stored in a Secret instead of a TokenRequest
    #[arg(long)]
    pub service_account_token: bool,

    /// Kubeconfig for the cluster to bootstrap (default: KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "SVELTOSCTL_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context (default: current context)
    #[arg(long, env = "SVELTOSCTL_CONTEXT")]
    pub context: Option<String>,

    /// Abandon the bootstrap after this long (e.g. 30s, 5m)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Write the kubeconfig to a file instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

impl KubeconfigArgs {
    /// Bootstrap options for these flags
    pub fn options(&self) -> BootstrapOptions {
        BootstrapOptions {
            namespace: self.namespace.clone(),
            service_account: self.service_account.clone(),
            create: self.create,
            persistent_token: self.service_account_token,
            expiration_seconds: self.expiration_seconds,
            display: self.output.is_none(),
        }
    }

    /// Kubeconfig path and context, falling back to the config file
    pub fn target(&self, config: &CtlConfig) -> (Option<PathBuf>, Option<String>) {
        (
            self.kubeconfig.clone().or_else(|| config.kubeconfig.clone()),
            self.context.clone().or_else(|| config.context.clone()),
        )
    }
}

/// Run the generate command
pub async fn run(args: GenerateArgs, config: &CtlConfig) -> Result<()> {
    match args.command {
        GenerateCommands::Kubeconfig(args) => generate_kubeconfig(args, config).await,
    }
}

async fn generate_kubeconfig(args: KubeconfigArgs, config: &CtlConfig) -> Result<()> {
    let options = args.options();
    options.validate()?;

    let deadline = args
        .timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|timeout| Instant::now() + timeout);

    let (kubeconfig, context) = args.target(config);
    let (client, endpoint) =
        KubeRemoteClient::from_kubeconfig(kubeconfig.as_deref(), context.as_deref()).await?;
    info!(server = %endpoint.server, "bootstrapping service account");

    let token = CancellationToken::new();
    let interrupt = tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                token.cancel();
            }
        }
    });

    let bootstrapper =
        Bootstrapper::new(client, endpoint).with_cancellation(Cancellation::new(token, deadline));

    let result: Result<()> = match &args.output {
        Some(path) => {
            let generated = bootstrapper.run(&options, None).await;
            match generated {
                Ok(kubeconfig) => std::fs::write(path, format!("{}\n", kubeconfig))
                    .map(|_| info!(path = %path.display(), "kubeconfig written"))
                    .map_err(Into::into),
                Err(e) => Err(e.into()),
            }
        }
        None => {
            let mut stdout = std::io::stdout();
            bootstrapper
                .run(&options, Some(&mut stdout))
                .await
                .map(|_| ())
                .map_err(Into::into)
        }
    };

    interrupt.abort();
    result
}
