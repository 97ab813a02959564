//! CLI arguments and server configuration defaults.

use clap::{Parser, ValueEnum};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017/imageUploadDB";
pub const DEFAULT_DATABASE: &str = "imageUploadDB";
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";
pub const PUBLIC_UPLOAD_PREFIX: &str = "/uploads";
pub const DEFAULT_UPLOAD_MAX_SIZE: usize = 20 * 1024 * 1024;
pub const DEFAULT_STAGED_TTL_SECS: u64 = 60 * 60;
pub const STAGED_CLEAN_INTERVAL_SECS: u64 = 900;
pub const UPLOAD_TOKEN_RANGE: u32 = 1_000_000_000;
pub const MAX_USERNAME_LEN: usize = 64;

/// Which record store backend to run against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "daily-upload",
    version,
    about = "Daily front/back image upload service"
)]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "DAILY_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "MONGO_URI",
        default_value = DEFAULT_MONGO_URI,
        help = "MongoDB connection string"
    )]
    pub mongo_uri: String,
    #[arg(
        long,
        env = "DAILY_STORE",
        value_enum,
        default_value_t = StoreBackend::Mongo,
        help = "Record store backend"
    )]
    pub store: StoreBackend,
    #[arg(
        short = 'u',
        long,
        env = "DAILY_UPLOAD_DIR",
        default_value = DEFAULT_UPLOAD_DIR,
        help = "Directory holding per-user uploads"
    )]
    pub upload_dir: String,
    #[arg(
        long,
        env = "DAILY_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max multipart body size in bytes"
    )]
    pub upload_max_size: usize,
    #[arg(
        long,
        env = "DAILY_STAGED_TTL_SECS",
        default_value_t = DEFAULT_STAGED_TTL_SECS,
        help = "Age after which leftover staged files are removed (0 to disable)"
    )]
    pub staged_ttl_secs: u64,
    #[arg(
        long,
        env = "DAILY_CORS_ORIGINS",
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_parses_from_flag() {
        let args = Args::try_parse_from(["daily-upload", "--store", "memory", "-p", "8080"])
            .expect("parse flags");
        assert_eq!(args.store, StoreBackend::Memory);
        assert_eq!(args.port, 8080);
    }
}
