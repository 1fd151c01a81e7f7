use crate::config::AppConfig;
use crate::domain::model::ProviderId;
use crate::utils::error::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "order-relay")]
#[command(about = "Parses storefront orders and relays paid lines to fulfillment panels")]
#[command(version)]
pub struct Cli {
    /// TOML configuration; the environment is used when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse one order line (or a `;`-joined order string with --raw)
    Parse {
        text: String,
        #[arg(long)]
        quantity: Option<Decimal>,
        #[arg(long)]
        paid: Option<Decimal>,
        #[arg(long)]
        raw: bool,
    },

    /// Rebuild the service index from a CSV of name,service_id,provider rows
    ImportIndex { csv: String },

    /// Show which provider and service id a service name resolves to
    Resolve { service_name: String },

    /// Process a webhook payload file ("-" reads stdin)
    Process { payload: String },

    /// Print the stored report of an order
    Report { order_id: String },

    /// Query a provider's account balance
    Balance { provider: ProviderId },

    /// Query the status of provider orders
    Status {
        provider: ProviderId,
        #[arg(required = true)]
        order_ids: Vec<String>,
    },
}

impl Cli {
    pub fn load_config(&self) -> Result<AppConfig> {
        match &self.config {
            Some(path) => AppConfig::from_file(path),
            None => AppConfig::from_env(),
        }
    }
}
