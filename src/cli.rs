use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Product search service with embedding backfill", long_about = None)]
pub struct Args {
    /// Directory holding config.yaml
    #[clap(long, env = "SHELF_HOME", default_value = ".")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the search and backfill endpoints
    Serve {
        /// Address to bind (host:port), overrides server.bind
        #[clap(long)]
        bind: Option<String>,
    },

    /// Run one search in-process and print the results as JSON
    Search {
        query: String,

        #[clap(short, long)]
        limit: Option<i64>,
    },

    /// Embed one batch of products that have no embedding yet
    Backfill {
        /// Records to process, 1-200
        #[clap(short, long)]
        batch_size: Option<i64>,
    },

    /// Interactive debounced search against a running daemon
    Client {
        /// Search endpoint, overrides client.endpoint
        #[clap(long)]
        endpoint: Option<String>,
    },
}
