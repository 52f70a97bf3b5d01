use crate::login::PasswordScheme;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command line / environment configuration of the web server
///
/// Every flag can also be set through the environment (a `.env` file in the
/// working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Wolfzy sales dashboard with login")]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "WOLFZY_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// JSON file holding the user collection
    #[arg(long, env = "WOLFZY_USERS_DB", default_value = "database/users.json")]
    pub users_db: PathBuf,

    /// CSV file with the sales data
    #[arg(long, env = "WOLFZY_SALES_CSV", default_value = "data/comp.csv")]
    pub sales_csv: PathBuf,

    /// Store new passwords as unsalted SHA-256 digests
    #[arg(long, env = "WOLFZY_LEGACY_HASH")]
    pub legacy_hash: bool,

    /// Keep users in memory only
    #[arg(long)]
    pub ephemeral: bool,

    /// Width of rendered charts in pixels
    #[arg(long, env = "WOLFZY_CHART_WIDTH", default_value_t = 900)]
    pub chart_width: u32,

    /// Height of rendered charts in pixels
    #[arg(long, env = "WOLFZY_CHART_HEIGHT", default_value_t = 550)]
    pub chart_height: u32,
}

impl Config {
    /// Load `.env` if present, then parse flags and environment
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("ignoring unreadable .env file: {e}"),
        }
        Self::parse()
    }

    pub fn password_scheme(&self) -> PasswordScheme {
        if self.legacy_hash {
            PasswordScheme::LegacySha256
        } else {
            PasswordScheme::Argon2
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            users_db: PathBuf::from("database/users.json"),
            sales_csv: PathBuf::from("data/comp.csv"),
            legacy_hash: false,
            ephemeral: false,
            chart_width: 900,
            chart_height: 550,
        }
    }
}
