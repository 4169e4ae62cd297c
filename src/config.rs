// src/config.rs
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];
pub const MAX_CONTENT_LENGTH: usize = 5 * 1024 * 1024;
pub const MAX_COMMENT_CHARS: usize = 100;
pub const IMAGE_LIFETIME_SECONDS: u64 = 5;
pub const FADEOUT_SECONDS: u64 = 10;
pub const MAX_IMAGES: usize = 10;
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Command line and environment options.
#[derive(Parser, Debug)]
#[command(name = "snappic", version, about = "Ephemeral photo sharing server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "SNAPPIC_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub bind: String,
    #[arg(
        short = 'p',
        long,
        env = "SNAPPIC_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "SNAPPIC_UPLOAD_DIR",
        default_value = "uploads",
        help = "Directory holding uploaded images"
    )]
    pub upload_dir: PathBuf,
    #[arg(
        long,
        env = "SNAPPIC_DATA_FILE",
        default_value = "data.json",
        help = "Metadata store file"
    )]
    pub data_file: PathBuf,
}

impl Args {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Start-time settings shared by the HTTP handlers and the sweeper.
#[derive(Clone, Debug)]
pub struct Config {
    pub upload_dir: PathBuf,
    pub data_file: PathBuf,
    pub max_upload_bytes: usize,
    pub max_images: usize,
    pub image_lifetime: Duration,
    pub fadeout: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    /// Paths from the caller, limits from the compile-time constants.
    pub fn new(upload_dir: impl Into<PathBuf>, data_file: impl Into<PathBuf>) -> Self {
        Config {
            upload_dir: upload_dir.into(),
            data_file: data_file.into(),
            max_upload_bytes: MAX_CONTENT_LENGTH,
            max_images: MAX_IMAGES,
            image_lifetime: Duration::from_secs(IMAGE_LIFETIME_SECONDS),
            fadeout: Duration::from_secs(FADEOUT_SECONDS),
            sweep_interval: SWEEP_INTERVAL,
        }
    }

    /// Age past which a record is expired.
    pub fn total_lifetime(&self) -> Duration {
        self.image_lifetime + self.fadeout
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Config::new(args.upload_dir.clone(), args.data_file.clone())
    }
}
