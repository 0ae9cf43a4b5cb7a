use clap::{Parser, Subcommand};
use utils::version;

use crate::config::controller::ControllerArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the WorkerPool controller
    Run(Box<ControllerArgs>),
    /// Print the WorkerPool CustomResourceDefinition as YAML
    Crd,
}
