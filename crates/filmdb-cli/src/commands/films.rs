use clap::Parser;
use filmdb_dal::{ListingParams, film::FilmRepository};

use crate::{commands::Executor, config::BackendConfig};

#[derive(Parser, Debug)]
pub struct FilmsCmd {
    #[command(flatten)]
    backend: BackendConfig,
}

impl Executor for FilmsCmd {
    async fn run(self) -> anyhow::Result<()> {
        let pool = super::open_pool(&self.backend).await?;
        let repo = FilmRepository::new(pool);
        for film in repo.list(ListingParams::default()).await? {
            println!("{film}");
        }
        Ok(())
    }
}
