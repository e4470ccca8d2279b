#![allow(async_fn_in_trait)]
use std::str::FromStr;

use bytes::Bytes;
use error::{StoreError, StoreResult};
use futures::Stream;

pub mod error;
pub mod file_store;
pub use file_store::FileStore;
use tracing::debug;

pub const ATTACHMENTS_PATH_PREFIX: &str = "attachments";

const MAX_PATH_LEN: usize = 4095;
const MAX_SEGMENT_LEN: usize = 255;
const MAX_PATH_DEPTH: usize = 10;
const PATH_INVALID_CHARS: &str = r#"/\:"#;

fn is_segment_invalid(s: &str) -> bool {
    s.is_empty()
        || s.starts_with(".")
        || s.len() > MAX_SEGMENT_LEN
        || s.chars()
            .any(|c| PATH_INVALID_CHARS.contains(c) || c.is_ascii_control())
}

fn validate_path(path: &str) -> StoreResult<()> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath);
    }
    if path.starts_with("/") || path.ends_with("/") {
        return Err(StoreError::InvalidPath);
    }
    if path.len() > MAX_PATH_LEN {
        return Err(StoreError::InvalidPath);
    }
    let segments = path.split('/').collect::<Vec<_>>();
    if segments.len() > MAX_PATH_DEPTH {
        return Err(StoreError::InvalidPath);
    }
    let invalid_path = segments.into_iter().any(is_segment_invalid);
    if invalid_path {
        Err(StoreError::InvalidPath)
    } else {
        Ok(())
    }
}

/// Storage path for an attachment file, derived only from the owning film
/// and the original file name: `attachments/<film_id>/<file name>`. Same
/// inputs always yield the same path; storing to a path that already holds
/// a file overwrites it.
pub fn attachment_path(film_id: i64, filename: &str) -> StoreResult<ValidPath> {
    // the file name is a single segment, a slash must not nest further
    if is_segment_invalid(filename) {
        return Err(StoreError::InvalidPath);
    }
    ValidPath::new(format!("{ATTACHMENTS_PATH_PREFIX}/{film_id}/{filename}"))
}

/// relative path, utf8, validated not to escape root and use . segments and some special chars
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPath(String);

impl ValidPath {
    pub fn new(path: impl Into<String>) -> StoreResult<Self> {
        let path = path.into();
        validate_path(path.as_str()).inspect_err(|_| debug!("Invalid path: {path}"))?;
        Ok(ValidPath(path))
    }
}

impl FromStr for ValidPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValidPath::new(s)
    }
}

impl AsRef<str> for ValidPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ValidPath> for String {
    fn from(path: ValidPath) -> Self {
        path.0
    }
}

#[derive(Debug)]
pub struct StoreInfo {
    /// final path where the file is stored, relative to the store root
    pub final_path: ValidPath,
    pub size: u64,
    /// SHA256 hash
    pub hash: String,
}

pub trait Store {
    /// Stores the data at the given path, replacing any file already there.
    async fn store_data(&self, path: &ValidPath, data: &[u8]) -> StoreResult<StoreInfo>;
    async fn store_stream<S, E>(&self, path: &ValidPath, stream: S) -> StoreResult<StoreInfo>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<StoreError>;
    async fn import_file(
        &self,
        path: &std::path::Path,
        final_path: &ValidPath,
        move_file: bool,
    ) -> StoreResult<ValidPath>;
    async fn load_data(
        &self,
        path: &ValidPath,
    ) -> Result<impl Stream<Item = StoreResult<Bytes>> + 'static, StoreError>;
    async fn size(&self, path: &ValidPath) -> StoreResult<u64>;
    async fn remove(&self, path: &ValidPath) -> StoreResult<()>;
    fn local_path(&self, path: &ValidPath) -> Option<std::path::PathBuf>;
}
