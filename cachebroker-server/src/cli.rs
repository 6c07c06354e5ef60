use clap::{Parser, Subcommand};

/// Cachebroker - managed cache replication groups as a service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Run the broker API server
    Serve {
        /// API port (overrides BROKER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Provision a new cache instance
    Provision {
        /// Instance identifier
        id: String,

        /// Node type
        #[arg(long, default_value = "cache.t3.micro")]
        node_type: String,

        /// Replicas per node group
        #[arg(long, default_value = "1")]
        replicas: u32,

        /// Disable TLS (transit encryption)
        #[arg(long)]
        no_tls: bool,

        /// Parameter override as key=value (repeatable)
        #[arg(long = "parameter", value_name = "KEY=VALUE")]
        parameters: Vec<String>,
    },

    /// Deprovision a cache instance
    Deprovision {
        /// Instance identifier
        id: String,

        /// Take a final snapshot with this name before deleting
        #[arg(long)]
        final_snapshot: Option<String>,
    },

    /// Show the progress of the last operation on an instance
    Status {
        /// Instance identifier
        id: String,

        /// Operation being polled (provision, update, deprovision, failover-test)
        #[arg(long, default_value = "provision")]
        operation: String,

        /// Previous primary node, for failover-test polls
        #[arg(long)]
        previous_primary: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Create a binding and print its credentials
    Bind {
        /// Instance identifier
        id: String,

        /// Binding identifier (generated when omitted)
        #[arg(long)]
        binding_id: Option<String>,
    },

    /// Start a failover test and poll it to completion
    FailoverTest {
        /// Instance identifier
        id: String,

        /// Seconds between polls
        #[arg(long, default_value = "10")]
        interval: u64,
    },
}
