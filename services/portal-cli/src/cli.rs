//! Command-line arguments

use clap::{Parser, Subcommand};

/// Authorize an application against a portal and keep its tokens current.
#[derive(Parser, Debug)]
#[command(name = "portal-oauth", version)]
pub struct Args {
    /// Config file (falls back to CONFIG_PATH, then portal-oauth.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the client-authorization URL
    AuthorizeUrl,
    /// Wait for the portal redirect and exchange the code
    Listen,
    /// Exchange an authorization code obtained elsewhere
    Exchange {
        #[arg(long)]
        code: String,
    },
    /// Renew the access token with the stored refresh token
    Refresh,
    /// Report which credential fields are missing
    Status,
}
