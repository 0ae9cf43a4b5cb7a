use std::sync::Arc;

use anyhow::Result;
use api_types::WorkerPool;
use clap::Parser;
use kube::CustomResourceExt;
use tokio_util::sync::CancellationToken;
use utils::logging;
use utils::version;
use workerpool_operator::app::controller;
use workerpool_operator::app::controller::Context;
use workerpool_operator::config::Cli;
use workerpool_operator::config::Commands;
use workerpool_operator::config::ControllerArgs;
use workerpool_operator::domain::manifest::verify_templates;
use workerpool_operator::domain::manifest::TemplateStore;
use workerpool_operator::domain::reconciler::Reconciler;
use workerpool_operator::domain::traits::ClusterStore;
use workerpool_operator::infrastructure::kube_store::KubeStore;
use workerpool_operator::infrastructure::memory_store::MemoryStore;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_controller(*args).await,
        Commands::Crd => print_crd(),
    }
}

fn print_crd() -> Result<()> {
    print!("{}", serde_yaml::to_string(&WorkerPool::crd())?);
    Ok(())
}

async fn run_controller(args: ControllerArgs) -> Result<()> {
    logging::init(args.log_json);

    tracing::info!("Starting workerpool operator {}", &**version::VERSION);

    let templates = match &args.templates_dir {
        Some(dir) => TemplateStore::from_dir(dir),
        None => TemplateStore::builtin(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to load templates: {e:?}"))?;
    verify_templates(&templates)
        .map_err(|e| anyhow::anyhow!("Templates do not render: {e:?}"))?;
    let templates = Arc::new(templates);

    let kube_store = KubeStore::connect(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e:?}"))?;
    let client = kube_store.client();

    if args.dry_run {
        tracing::warn!("Dry run: child resources and statuses are kept in memory only");
        let store = Arc::new(MemoryStore::dry_run());
        watch(client, &args, store, templates).await
    } else {
        watch(client, &args, Arc::new(kube_store), templates).await
    }
}

async fn watch<S: ClusterStore + 'static>(
    client: kube::Client,
    args: &ControllerArgs,
    store: Arc<S>,
    templates: Arc<TemplateStore>,
) -> Result<()> {
    let ctx = Arc::new(Context {
        reconciler: Reconciler::new(store, templates),
        retry_after: args.retry_after(),
    });

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone())?;

    controller::run(client, args.namespace.clone(), ctx, token)
        .await
        .map_err(|e| anyhow::anyhow!("Worker pool controller failed: {e:?}"))?;

    tracing::info!("Workerpool operator stopped");
    Ok(())
}

fn spawn_signal_handler(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
            }
            token.cancel();
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            token.cancel();
        });
    }
    Ok(())
}
