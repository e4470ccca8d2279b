use std::{
    fmt::Display,
    path::{Path, PathBuf, StripPrefixError},
    sync::Arc,
};

use bytes::Bytes;
use futures::{Stream, StreamExt as _, TryFutureExt as _, TryStreamExt as _, pin_mut};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::{fs, io, io::AsyncWriteExt as _, task::spawn_blocking};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use super::{
    Store, StoreInfo, ValidPath,
    error::{StoreError, StoreResult},
};

#[inline]
fn hex(bytes: &[u8]) -> String {
    base16ct::lower::encode_string(bytes)
}

async fn tmp_path(root: &Path, path: &Path) -> StoreResult<PathBuf> {
    let id = uuid::Uuid::new_v4().to_string();
    let tmp_ext = format!("{id}.tmp");
    let tmp_path = path.with_extension(&tmp_ext);
    let tmp_path = root.join(tmp_path);
    if let Some(parent) = tmp_path.parent() {
        let meta = fs::metadata(parent).await;
        match meta {
            Ok(meta) => {
                if !meta.is_dir() {
                    error!("Parent is not a directory: {parent:?}");
                    return Err(StoreError::InvalidPath);
                }
            }
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    fs::create_dir_all(parent).await?;
                } else {
                    error!("Failed to stat parent: {parent:?}: {e}");
                    return Err(e.into());
                }
            }
        }
    }
    Ok(tmp_path)
}

/// Resolves the full path for a write. The path may point at an existing
/// file (it will be replaced), never at a directory.
async fn final_path_for(root: &Path, path: &ValidPath) -> StoreResult<PathBuf> {
    let final_path = root.join(path.as_ref());
    if let Ok(meta) = fs::metadata(&final_path).await {
        if meta.is_dir() {
            error!("Path is a directory: {final_path:?}");
            return Err(StoreError::InvalidPath);
        }
    }
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(final_path)
}

async fn cleanup<E: Display>(path: &Path, error: E) -> Result<(), E> {
    error!("Failed to store file to path {path:?}: {error}");
    if path.exists() {
        fs::remove_file(path)
            .await
            .map_err(|e| error!("Failed to remove file {path:?}: {e}"))
            .ok();
    }
    Err(error)
}

struct FileStoreInner {
    root: PathBuf,
}

#[derive(Clone)]
pub struct FileStore {
    inner: Arc<FileStoreInner>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(FileStoreInner { root: root.into() }),
        }
    }

    fn relative_path(&self, path: &impl AsRef<Path>) -> Result<ValidPath, StripPrefixError> {
        let relative_path = path.as_ref().strip_prefix(&self.inner.root)?; // this is safe as we used root to create path
        let final_path = relative_path.to_str().unwrap().to_string(); // this is safe as we assume utf-8 fs and path was created from string
        Ok(ValidPath(final_path)) // as input was ValidPath we expect ValidPath
    }

    async fn copy_file(
        &self,
        src: &Path,
        to_path: &ValidPath,
        remove_src: bool,
    ) -> StoreResult<PathBuf> {
        let dst_dir = self.inner.root.clone();
        let tmp = spawn_blocking(move || NamedTempFile::new_in(dst_dir)).await??; // propagate join errors

        // copy bytes
        let mut in_f = fs::File::open(src).await?;
        // reopen the temp path with tokio so we can write async
        let tmp_path = tmp.path();
        let mut out_f = fs::OpenOptions::new().write(true).open(tmp_path).await?;
        io::copy(&mut in_f, &mut out_f).await?;
        out_f.sync_all().await?;

        // persist atomically (blocking; wrap again), replacing any previous file
        let final_path = final_path_for(&self.inner.root, to_path).await?;
        spawn_blocking({
            let tmp = tmp;
            let dst = final_path.clone();
            move || tmp.persist(dst).map(|_| ())
        })
        .await?
        .map_err(|e| io::Error::other(e.error))?;

        if remove_src {
            fs::remove_file(src).await?
        };

        Ok(final_path)
    }
}

impl Store for FileStore {
    async fn store_data(&self, path: &ValidPath, data: &[u8]) -> StoreResult<StoreInfo> {
        let final_path = final_path_for(&self.inner.root, path).await?;
        let tmp_path = tmp_path(&self.inner.root, Path::new(path.as_ref())).await?;
        let mut new_file = fs::File::create(&tmp_path).await?;
        new_file
            .write_all(data)
            .or_else(|e| cleanup(&tmp_path, e))
            .await?;
        new_file.flush().await?;
        fs::rename(&tmp_path, &final_path).await?;
        let digest = Sha256::digest(data);
        let final_path = self.relative_path(&final_path).unwrap(); // this is safe as we used root to create final_path
        let size = data.len() as u64;
        Ok(StoreInfo {
            final_path,
            size,
            hash: hex(&digest),
        })
    }

    async fn store_stream<S, E>(&self, path: &ValidPath, stream: S) -> StoreResult<StoreInfo>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<StoreError>,
    {
        let tmp_path = tmp_path(&self.inner.root, Path::new(path.as_ref())).await?;
        let mut file = fs::File::create(&tmp_path)
            .await
            .inspect_err(|e| error!("Failed to tmp file {tmp_path:?}: {e}"))?;
        let mut size = 0;
        pin_mut!(stream);
        let mut digester = Sha256::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| e.into()) {
                Ok(chunk) => {
                    file.write_all(&chunk)
                        .or_else(|e| cleanup(&tmp_path, e))
                        .await?;
                    size = size + chunk.len() as u64;
                    digester.update(&chunk);
                }
                Err(e) => {
                    cleanup(&tmp_path, e).await?;
                    unreachable!()
                }
            }
        }
        file.flush().await?;
        let final_path = final_path_for(&self.inner.root, path).await?;
        fs::rename(&tmp_path, &final_path).await?;
        debug!("Stored {size} bytes to {final_path:?}");
        let digest = digester.finalize();
        let final_path = self.relative_path(&final_path).unwrap();
        Ok(StoreInfo {
            final_path,
            size,
            hash: hex(&digest),
        })
    }

    async fn load_data(
        &self,
        path: &ValidPath,
    ) -> Result<impl Stream<Item = StoreResult<Bytes>> + 'static, StoreError> {
        let final_path = self.inner.root.join(path.as_ref());
        let file = fs::File::open(&final_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.as_ref().to_string())
            } else {
                e.into()
            }
        })?;
        let stream = ReaderStream::new(file).map_err(StoreError::from);
        Ok(stream)
    }

    async fn size(&self, path: &ValidPath) -> StoreResult<u64> {
        let final_path = self.inner.root.join(path.as_ref());
        let meta = fs::metadata(&final_path).await?;
        Ok(meta.len())
    }

    async fn remove(&self, path: &ValidPath) -> StoreResult<()> {
        let final_path = self.inner.root.join(path.as_ref());
        fs::remove_file(&final_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.as_ref().to_string())
            } else {
                e.into()
            }
        })
    }

    async fn import_file(
        &self,
        path: &std::path::Path,
        to_path: &ValidPath,
        move_file: bool,
    ) -> StoreResult<ValidPath> {
        let mut final_path = None;
        if move_file {
            let dest_path = final_path_for(&self.inner.root, to_path).await?;
            match fs::rename(path, &dest_path).await {
                Ok(()) => {
                    debug!("Moved file to {dest_path:?}");
                    final_path = Some(dest_path)
                }
                Err(e) => {
                    let is_exdev = e.raw_os_error() == Some(libc::EXDEV);
                    if !is_exdev {
                        return Err(e.into());
                    } else {
                        debug!("destination is on different mount, copying file");
                    }
                }
            }
        }

        if !move_file || final_path.is_none() {
            final_path = Some(self.copy_file(path, to_path, move_file).await?);
        }

        if let Some(final_path) = final_path {
            let final_path = self.relative_path(&final_path).unwrap(); // this is safe as we used root to create final_path
            Ok(final_path)
        } else {
            unreachable!("Should have path or return earlier")
        }
    }

    fn local_path(&self, path: &ValidPath) -> Option<std::path::PathBuf> {
        Some(self.inner.root.join(path.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::try_unfold;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_store() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let content = b"neco tady je";
        let store = FileStore::new(tmp_dir.path());
        let store2 = store.clone();
        // test to move store to other thread
        let validated_path = ValidPath::new("usarna/kulisatna.txt").unwrap();
        let validated_path2 = validated_path.clone();
        let handle =
            tokio::spawn(async move { store2.store_data(&validated_path2, content).await });
        let res = handle.await.unwrap().unwrap();
        assert_eq!(res.size, 12);
        assert_eq!(res.final_path.as_ref(), "usarna/kulisatna.txt");
        assert_eq!(res.hash.len(), 64);
        let res_path = store.inner.root.join("usarna/kulisatna.txt");
        assert!(res_path.exists());
        assert_eq!(fs::read(&res_path).await.unwrap(), content);

        // same path replaces the file, no alternate name is invented
        let content2 = b"a ted neco jineho";
        let res2 = store.store_data(&validated_path, content2).await.unwrap();
        assert_eq!(res2.final_path.as_ref(), "usarna/kulisatna.txt");
        assert_eq!(fs::read(&res_path).await.unwrap(), content2);
    }

    fn data_generator(size_kb: u8) -> impl Stream<Item = StoreResult<Bytes>> {
        try_unfold(size_kb, |mut count| async move {
            if count == 0 {
                Ok::<_, StoreError>(None)
            } else {
                let data = rand::random::<[u8; 1024]>();
                let data = data.to_vec();
                count -= 1;

                Ok(Some((Bytes::from(data), count)))
            }
        })
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_stream() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let chunks = data_generator(10);

        let store = FileStore::new(tmp_dir.path());
        let validated_path = ValidPath::new("binarni/data").unwrap();
        let res = store.store_stream(&validated_path, chunks).await.unwrap();
        assert_eq!(res.final_path.as_ref(), "binarni/data");
        assert_eq!(res.size, 10240);
        let file_path = store.inner.root.join("binarni/data");
        assert!(file_path.exists());
        let meta = file_path.metadata().unwrap();
        assert_eq!(meta.len(), 10240);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_load() {
        let size_kb: u8 = 100;
        let size = size_kb as usize * 1024;
        let tmp_dir = tempfile::tempdir().unwrap();
        let chunks = data_generator(size_kb);
        let validated_path = ValidPath::new("binarni/data").unwrap();
        let store = FileStore::new(tmp_dir.path());
        let _res = store.store_stream(&validated_path, chunks).await.unwrap();
        let mut stream = store.load_data(&validated_path).await.unwrap();
        let mut data = Vec::with_capacity(size);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            data.extend_from_slice(&chunk);
        }
        assert_eq!(data.len(), size);
        let original = fs::read(tmp_dir.path().join("binarni/data")).await.unwrap();
        assert_eq!(data, original);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_remove() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp_dir.path());
        let validated_path = ValidPath::new("mazani/data.bin").unwrap();
        store.store_data(&validated_path, b"data").await.unwrap();

        store.remove(&validated_path).await.unwrap();
        assert!(!tmp_dir.path().join("mazani/data.bin").exists());

        let res = store.remove(&validated_path).await;
        assert!(matches!(res, Err(StoreError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_import() {
        let size_kb: u8 = 5;
        let size = size_kb as usize * 1024;
        let tmp_dir = tempfile::tempdir().unwrap();
        let chunks = data_generator(size_kb);
        tokio::pin! {
        let reader = tokio_util::io::StreamReader::new(
            chunks.map_err(io::Error::other),
        );
        }
        let tmp_dir2 = tempfile::tempdir().unwrap();
        let external_file = tmp_dir.path().join("test_data");

        let mut f = fs::File::create(&external_file).await.unwrap();
        io::copy(&mut reader, &mut f).await.unwrap();

        let store = FileStore::new(tmp_dir2.path());
        let to_path = ValidPath::new("attachments/1/data.bin").unwrap();
        let name = store
            .import_file(&external_file, &to_path, false)
            .await
            .unwrap();
        assert_eq!("attachments/1/data.bin", name.as_ref());

        async fn load_data(store: &FileStore, to_path: &ValidPath) -> Vec<u8> {
            let mut stream = store.load_data(to_path).await.unwrap();

            let mut data: Vec<u8> = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.unwrap();
                data.extend_from_slice(&chunk);
            }

            data
        }

        let data = load_data(&store, &to_path).await;

        assert_eq!(data.len(), size);
        let original = fs::read(tmp_dir.path().join("test_data")).await.unwrap();
        assert_eq!(data, original);

        // importing to the same path again replaces the stored file and
        // consumes the source when moving
        let name = store
            .import_file(&external_file, &to_path, true)
            .await
            .unwrap();
        assert_eq!("attachments/1/data.bin", name.as_ref());
        assert!(!external_file.exists());

        let data = load_data(&store, &to_path).await;
        assert_eq!(data.len(), size);
        assert_eq!(data, original);
    }
}
