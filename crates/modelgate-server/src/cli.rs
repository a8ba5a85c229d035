use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "modelgated", version, about = "modelgate inference daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the inference server
    Serve {
        /// Model repository directory
        #[arg(long, default_value = "models")]
        repository: String,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,

        /// Skip loading models already present in the repository
        #[arg(long)]
        no_load_existing: bool,

        /// Poll the repository for descriptor changes
        #[arg(long)]
        monitor: bool,

        /// Repository poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        monitor_interval_ms: u64,
    },
}
