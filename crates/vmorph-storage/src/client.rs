//! Local filesystem storage client.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use vmorph_models::encoding::OUTPUT_EXTENSION;
use vmorph_models::{is_id_char, AssetId};

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

/// Extension used when the uploaded filename has no usable one.
const FALLBACK_EXTENSION: &str = "mp4";

/// Longest extension kept from an uploaded filename.
const MAX_EXTENSION_LEN: usize = 8;

/// An uploaded asset that has been fully written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub id: AssetId,
    pub path: PathBuf,
    pub original_filename: String,
    pub size_bytes: u64,
}

impl StoredAsset {
    /// Size in megabytes with two decimals, e.g. `"12.34"`.
    pub fn size_mb(&self) -> String {
        format!("{:.2}", self.size_bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Filesystem-backed storage for inputs and outputs.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    uploads_dir: PathBuf,
    outputs_dir: PathBuf,
}

impl LocalStorage {
    /// Create the storage, making sure both directories exist.
    pub async fn init(config: StorageConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.uploads_dir).await?;
        fs::create_dir_all(&config.outputs_dir).await?;

        info!(
            "Storage ready: uploads={}, outputs={}",
            config.uploads_dir.display(),
            config.outputs_dir.display()
        );

        Ok(Self {
            uploads_dir: config.uploads_dir,
            outputs_dir: config.outputs_dir,
        })
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Start writing a new upload under a freshly generated asset id.
    ///
    /// The file is stored as `{id}.{ext}` where `ext` comes from the
    /// original filename.
    pub async fn begin_upload(
        &self,
        original_filename: &str,
        limit_bytes: u64,
    ) -> StorageResult<UploadWriter> {
        let id = AssetId::generate();
        let path = self
            .uploads_dir
            .join(format!("{}.{}", id, upload_extension(original_filename)));

        let file = File::create(&path).await?;
        debug!("Receiving upload {} into {}", id, path.display());

        Ok(UploadWriter {
            file,
            asset: StoredAsset {
                id,
                path,
                original_filename: original_filename.to_string(),
                size_bytes: 0,
            },
            limit_bytes,
        })
    }

    /// Find the stored file for an asset id.
    ///
    /// Only a file whose stem equals the id matches; more than one match is
    /// reported as ambiguous rather than picking one.
    pub async fn resolve_asset(&self, id: &AssetId) -> StorageResult<PathBuf> {
        let mut entries = match fs::read_dir(&self.uploads_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found(id.as_str()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(id.as_str());
            if stem_matches && entry.file_type().await?.is_file() {
                matches.push(path);
            }
        }

        match matches.len() {
            0 => Err(StorageError::not_found(id.as_str())),
            1 => Ok(matches.remove(0)),
            count => Err(StorageError::Ambiguous {
                id: id.to_string(),
                count,
            }),
        }
    }

    /// Path a variation with the given id is written to.
    pub fn output_path(&self, variation_id: &str) -> PathBuf {
        self.outputs_dir
            .join(format!("{}.{}", variation_id, OUTPUT_EXTENSION))
    }

    /// Open a produced variation for reading, returning the file and its size.
    pub async fn open_output(&self, variation_id: &str) -> StorageResult<(File, u64)> {
        if variation_id.is_empty() || !variation_id.chars().all(is_id_char) {
            return Err(StorageError::invalid_key(variation_id));
        }

        let path = self.output_path(variation_id);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found(variation_id))
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StorageError::not_found(variation_id));
        }

        Ok((file, metadata.len()))
    }
}

/// In-progress upload. Dropping it without [`UploadWriter::finish`] leaves a
/// partial file behind; call [`UploadWriter::abort`] on failure.
#[derive(Debug)]
pub struct UploadWriter {
    file: File,
    asset: StoredAsset,
    limit_bytes: u64,
}

impl UploadWriter {
    pub fn asset_id(&self) -> &AssetId {
        &self.asset.id
    }

    /// Append a chunk, failing once the size limit is crossed.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> StorageResult<()> {
        let size = self.asset.size_bytes + chunk.len() as u64;
        if size > self.limit_bytes {
            return Err(StorageError::TooLarge {
                limit_bytes: self.limit_bytes,
            });
        }

        self.file.write_all(chunk).await?;
        self.asset.size_bytes = size;
        Ok(())
    }

    /// Flush the file and return the stored asset.
    pub async fn finish(mut self) -> StorageResult<StoredAsset> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        info!(
            "Stored upload {} ({} bytes) at {}",
            self.asset.id,
            self.asset.size_bytes,
            self.asset.path.display()
        );
        Ok(self.asset)
    }

    /// Discard the partial upload.
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.asset.path).await {
            warn!("Failed to remove partial upload {}: {}", self.asset.path.display(), e);
        }
    }
}

/// Lower-cased extension of an uploaded filename, or the fallback.
fn upload_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty() && e.len() <= MAX_EXTENSION_LEN && e.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}
