use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct ControllerArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "WATCH_NAMESPACE",
        help = "Namespace to watch for WorkerPools (empty for all namespaces)"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        env = "TEMPLATES_DIR",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory with deployment.yml, prometheus-rule.yml and scaledobject.yml, e.g. /templates (defaults to the built-in templates)"
    )]
    pub templates_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "ERROR_REQUEUE_SECS",
        default_value = "300",
        help = "Seconds to wait before a failed reconciliation is attempted again"
    )]
    pub error_requeue_secs: u64,

    #[arg(
        long,
        env = "DRY_RUN",
        help = "Keep child resources and statuses in memory and log every write with its full document instead of sending it to the cluster",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub dry_run: bool,

    #[arg(
        long,
        env = "LOG_JSON",
        help = "Emit logs as JSON lines",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub log_json: bool,
}

impl ControllerArgs {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::config::cli::{Cli, Commands};

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "workerpool-operator",
            "run",
            "--namespace",
            "ns1",
            "--templates-dir",
            "/templates",
            "--error-requeue-secs",
            "0",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.namespace.as_deref(), Some("ns1"));
        assert_eq!(args.templates_dir, Some(PathBuf::from("/templates")));
        assert_eq!(args.retry_after(), Duration::from_secs(1));
        assert!(!args.dry_run);
    }

    #[test]
    fn parses_dry_run_switch() {
        let cli = Cli::try_parse_from(["workerpool-operator", "run", "--dry-run", "true"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert!(args.dry_run);
    }
}
