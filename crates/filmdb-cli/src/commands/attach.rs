use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use filmdb_dal::attachment::{AttachmentRepository, AttachmentType, CreateAttachment};
use filmdb_store::{FileStore, Store as _, attachment_path};

use crate::{commands::Executor, config::BackendConfig};

#[derive(Parser, Debug)]
pub struct AttachCmd {
    #[arg(short, long, help = "Path to the file to attach")]
    file: PathBuf,

    #[arg(long, help = "Id of the film owning the attachment")]
    film_id: i64,

    #[arg(long, help = "Attachment title, defaults to the file name")]
    title: Option<String>,

    #[arg(
        long = "type",
        help = "Attachment type: audio, image, text, video or other; defaults to image"
    )]
    kind: Option<AttachmentType>,

    #[arg(long, help = "Move the file into the media store instead of copying")]
    r#move: bool,

    #[command(flatten)]
    backend: BackendConfig,
}

impl Executor for AttachCmd {
    async fn run(self) -> anyhow::Result<()> {
        let pool = super::open_pool(&self.backend).await?;
        let store = FileStore::new(self.backend.media_dir());

        let filename = self
            .file
            .file_name()
            .and_then(|n| n.to_str())
            .context("File name is not valid UTF-8")?;
        let dest = attachment_path(self.film_id, filename)?;
        let stored = store.import_file(&self.file, &dest, self.r#move).await?;

        let repo = AttachmentRepository::new(pool);
        let payload = CreateAttachment {
            title: self.title.unwrap_or_else(|| filename.to_string()),
            film_id: self.film_id,
            kind: self.kind,
            file_path: Some(stored.clone().into()),
        };
        let attachment = match repo.create(payload).await {
            Ok(attachment) => attachment,
            Err(e) => {
                // do not leave a blob behind without its record
                store.remove(&stored).await.ok();
                return Err(e.into());
            }
        };
        println!("Attached {attachment} to film {}", self.film_id);
        Ok(())
    }
}
