//! Available commands.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Start the gateway and serve until Ctrl-C
    Serve,

    /// Run one discovery cycle and list the model pool
    Models {
        /// Print the pool as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the upstream backend is reachable and offers models
    Check,
}
