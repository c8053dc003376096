use clap::{Parser, Subcommand};

use estate_notify::UserType;

/// estate-notify: live notification feed for dashboard users
#[derive(Parser)]
#[command(name = "estate-notify", version, about)]
pub struct Cli {
    /// Push server base URL (overrides ESTATE_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and print notifications as they arrive
    Watch {
        #[arg(long)]
        user_id: String,
        #[arg(long, value_enum, default_value = "agent")]
        user_type: UserType,
        /// Mark every notification read as soon as it is printed
        #[arg(long)]
        auto_read: bool,
    },

    /// Print the resolved configuration
    Config,
}
