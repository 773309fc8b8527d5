use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::FormatError;
use crate::transport::TransportError;
use crate::types::MediaFormat;

/// Sibling `.part` path used while a file is being written.
pub fn part_path(download_path: &Path) -> PathBuf {
    let mut name = download_path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    download_path.with_file_name(name)
}

/// Stream `body` to `download_path` through a `.part` file and return the
/// number of bytes written.
///
/// The final path only ever appears fully written: chunks go to the temp
/// file, which is renamed into place once the body ends cleanly. A body that
/// breaks off is a [`FormatError::Transport`] and leaves nothing behind.
pub async fn write_stream<S>(
    download_path: &Path,
    format: MediaFormat,
    mut body: S,
) -> Result<u64, FormatError>
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    let disk = move |source| FormatError::Disk { format, source };
    if let Some(parent) = download_path.parent() {
        fs::create_dir_all(parent).await.map_err(disk)?;
    }

    let part = part_path(download_path);
    let result = async {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&part)
            .await
            .map_err(disk)?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| FormatError::Transport { format, source })?;
            file.write_all(&chunk).await.map_err(disk)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(disk)?;
        file.sync_all().await.map_err(disk)?;
        drop(file);
        fs::rename(&part, download_path).await.map_err(disk)?;
        Ok::<_, FormatError>(written)
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&part).await;
    }
    result
}

/// True when every path exists. I/O errors count as missing.
pub async fn all_exist(paths: &[PathBuf]) -> bool {
    for path in paths {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return false;
        }
    }
    true
}
