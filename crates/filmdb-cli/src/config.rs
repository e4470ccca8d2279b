use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf};

use crate::commands::{attach::AttachCmd, cleanup::CleanupCmd, films::FilmsCmd};

#[derive(Parser)]
#[command(
    version,
    about,
    long_about = "CLI for filmdb - manages the film catalogue, its genres and file attachments."
)]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Films(FilmsCmd),
    Attach(AttachCmd),
    Cleanup(CleanupCmd),
}

impl crate::commands::Executor for Command {
    async fn run(self) -> anyhow::Result<()> {
        match self {
            Command::Films(cmd) => cmd.run().await,
            Command::Attach(cmd) => cmd.run().await,
            Command::Cleanup(cmd) => cmd.run().await,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct BackendConfig {
    #[arg(
        long,
        env = "FILMDB_DATABASE_URL",
        help = "Database URL e.g. sqlite://file.db or similar, default is sqlite://[data-dir]/filmdb.db, where data-dir is set by --data-dir"
    )]
    database_url: Option<String>,

    #[arg(
        long,
        env = "FILMDB_DATA_DIR",
        help = "Data directory (database, configs etc.), default is system default like ~/.local/share/filmdb",
        default_value_t = default_data_dir()
    )]
    data_dir: String,

    #[arg(
        long,
        env = "FILMDB_MEDIA_DIR",
        help = "Directory for uploaded attachment files, default data_dir/media"
    )]
    media_dir: Option<PathBuf>,
}

fn default_data_dir() -> String {
    let dir = dirs::data_dir()
        .map(|p| p.join("filmdb"))
        .unwrap_or_else(|| PathBuf::from("filmdb"));

    if !fs::exists(&dir).expect("Failed to check if data directory exists") {
        fs::create_dir_all(&dir).expect("Failed to create data directory");
    } else if !dir.is_dir() {
        panic!("Data directory is not a directory",)
    }

    dir.to_string_lossy().to_string()
}

impl BackendConfig {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn media_dir(&self) -> PathBuf {
        self.media_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("media"))
    }

    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}/filmdb.db", self.data_dir))
    }
}
