pub mod attach;
pub mod cleanup;
pub mod films;

use crate::config::BackendConfig;

#[allow(async_fn_in_trait)]
pub trait Executor {
    async fn run(self) -> anyhow::Result<()>;
}

pub(crate) async fn open_pool(backend: &BackendConfig) -> anyhow::Result<filmdb_dal::Pool> {
    let pool = filmdb_dal::new_pool(&backend.database_url()).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    Ok(pool)
}
