use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use filmdb_dal::{ListingParams, attachment::AttachmentRepository};
use filmdb_store::ATTACHMENTS_PATH_PREFIX;
use tokio::fs;
use tracing::debug;

use crate::{commands::Executor, config::BackendConfig};

/// Attachment records deleted outside the store can leave their files
/// behind; this sweeps the media directory for such orphans.
#[derive(Parser, Debug)]
pub struct CleanupCmd {
    #[command(flatten)]
    backend: BackendConfig,

    #[arg(long, help = "Only report orphaned files, do not delete them")]
    dry_run: bool,
}

impl Executor for CleanupCmd {
    async fn run(self) -> anyhow::Result<()> {
        let pool = super::open_pool(&self.backend).await?;
        let repo = AttachmentRepository::new(pool);
        let known: HashSet<PathBuf> = repo
            .list(ListingParams::default())
            .await?
            .into_iter()
            .filter_map(|a| a.file_path)
            .map(PathBuf::from)
            .collect();
        debug!("{} attachment files on record", known.len());

        let media_dir = self.backend.media_dir();
        let attachments_dir = media_dir.join(ATTACHMENTS_PATH_PREFIX);
        let mut orphans = Vec::new();
        let mut dirs = match fs::read_dir(&attachments_dir).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.metadata().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let rel = file.path().strip_prefix(&media_dir)?.to_path_buf();
                if !known.contains(&rel) {
                    orphans.push(file.path());
                }
            }
        }

        for path in orphans {
            if self.dry_run {
                println!("Orphaned {:?}", path);
            } else {
                fs::remove_file(&path).await?;
                println!("Deleted {:?}", path);
            }
        }

        Ok(())
    }
}
