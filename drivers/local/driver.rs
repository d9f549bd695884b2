use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::context::CallContext;
use crate::error::{BlobError, Result};
use crate::storage::http::ContextReader;
use crate::storage::listing::paginate;
use crate::storage::{
    validate_key, BoxWriter, ByteRange, Capability, DriverReader, ListPage, ListQuery,
    ObjectMetadata, ReaderAttributes, StorageDriver, WriterOptions,
};

use super::writer::LocalWriter;

/// Suffix of the sidecar file holding content type, metadata and MD5
pub(super) const ATTRS_SUFFIX: &str = ".blobattrs";
/// Prefix of in-progress upload files / 临时文件前缀
pub(super) const TEMP_PREFIX: &str = ".blobtmp-";

/// Attributes a plain file cannot carry / 附加属性
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct BlobAttrs {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Hex MD5 of the content / 内容MD5
    #[serde(default)]
    pub md5: String,
    /// Length of the content these attributes were written for
    #[serde(default)]
    pub size: Option<u64>,
}

pub(super) fn attrs_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(ATTRS_SUFFIX);
    PathBuf::from(name)
}

pub(super) fn join_error(err: tokio::task::JoinError) -> BlobError {
    BlobError::Unknown(format!("blocking task failed: {}", err))
}

/// Map a filesystem error for `key` / 映射文件系统错误
pub(super) fn map_io(err: io::Error, key: &str) -> BlobError {
    match err.kind() {
        io::ErrorKind::NotFound => BlobError::NotFound(key.to_string()),
        io::ErrorKind::PermissionDenied => BlobError::Permission(format!("{}: {}", key, err)),
        _ => BlobError::from(err),
    }
}

fn is_internal_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) || name.ends_with(ATTRS_SUFFIX)
}

/// Local directory driver / 本地目录驱动
///
/// The bucket is an existing directory; keys map to relative paths. A write
/// goes to a temp file in the target directory and is renamed into place on
/// shutdown, so concurrent writers to one key are last-rename-wins and a
/// reader always sees a complete file.
pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a key to a path under the root, rejecting traversal / 解析对象路径
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
            return Err(BlobError::InvalidArgument(format!("key {:?} is not a relative path", key)));
        }
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(BlobError::InvalidArgument(format!("key {:?} has an invalid path segment", key)));
            }
            if is_internal_name(segment) {
                return Err(BlobError::InvalidArgument(format!("key {:?} uses a reserved name", key)));
            }
        }
        Ok(self.root.join(key))
    }

    async fn load_metadata(&self, key: &str, path: &Path) -> Result<ObjectMetadata> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| map_io(e, key))?;
        if !meta.is_file() {
            return Err(BlobError::NotFound(key.to_string()));
        }
        let attrs: BlobAttrs = match tokio::fs::read_to_string(attrs_path(path)).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => BlobAttrs::default(),
        };
        // the sidecar is committed first; until the content follows it
        // describes a different file
        let attrs = match attrs.size {
            Some(size) if size != meta.len() => BlobAttrs::default(),
            _ => attrs,
        };
        let content_type = if attrs.content_type.is_empty() {
            mime_guess::from_path(key).first_or_octet_stream().to_string()
        } else {
            attrs.content_type
        };
        let md5 = hex::decode(&attrs.md5).ok().filter(|d| d.len() == 16);

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: meta.len(),
            content_type: Some(content_type),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            etag: md5.as_ref().map(hex::encode),
            md5,
            metadata: attrs.metadata,
            is_dir: false,
        })
    }

    /// Collect every stored file below `dir` as (key, size, modified)
    async fn walk_dir(&self, dir: &Path) -> io::Result<Vec<ObjectMetadata>> {
        let mut entries = Vec::new();
        let mut dirs = VecDeque::new();
        dirs.push_back(dir.to_path_buf());
        while let Some(current) = dirs.pop_front() {
            // a prefix naming a file (or nothing) simply has no keys below it
            let mut read_dir = match tokio::fs::read_dir(&current).await {
                Ok(read_dir) => read_dir,
                Err(err) if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                    continue
                }
                Err(err) if current.is_file() => {
                    tracing::debug!("Listing below a file yields nothing: {:?}: {}", current, err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    dirs.push_back(path);
                } else if metadata.is_file() && !is_internal_name(&name) {
                    let relative = path
                        .strip_prefix(&self.root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    let mut object = ObjectMetadata::new(relative, metadata.len());
                    object.modified = metadata.modified().ok().map(DateTime::<Utc>::from);
                    entries.push(object);
                }
            }
        }
        Ok(entries)
    }

    /// Remove directories left empty by a delete, stopping at the root
    fn prune_empty_dirs(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    fn name(&self) -> &str {
        "file"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: true,
            can_multipart_upload: true, // 直接流式写入临时文件
            can_server_side_copy: true,
            max_chunk_size: None,
        }
    }

    async fn probe(&self, ctx: &CallContext) -> Result<()> {
        ctx.run(async {
            let meta = tokio::fs::metadata(&self.root)
                .await
                .map_err(|e| map_io(e, &self.root.display().to_string()))?;
            if !meta.is_dir() {
                return Err(BlobError::NotFound(format!("{} is not a directory", self.root.display())));
            }
            Ok(())
        })
        .await
    }

    async fn open_writer(&self, ctx: &CallContext, key: &str, options: &WriterOptions) -> Result<BoxWriter> {
        let final_path = self.key_path(key)?;
        let attrs = BlobAttrs {
            content_type: options.resolved_content_type(key),
            metadata: options.metadata.clone(),
            md5: String::new(),
            size: None,
        };
        let writer = ctx.run(LocalWriter::create(ctx, key, final_path, attrs)).await?;
        Ok(Box::new(writer))
    }

    async fn open_reader(&self, ctx: &CallContext, key: &str, range: Option<ByteRange>) -> Result<DriverReader> {
        let path = self.key_path(key)?;
        let meta = ctx.run(self.load_metadata(key, &path)).await?;
        let (start, len) = range.map_or((0, meta.size), |r| r.clamp(meta.size));

        // Use sync IO to open and seek / 使用同步IO
        let file = ctx
            .run(async {
                tokio::task::spawn_blocking(move || {
                    let mut file = std::fs::File::open(&path)?;
                    if start > 0 {
                        use std::io::Seek;
                        file.seek(io::SeekFrom::Start(start))?;
                    }
                    Ok::<std::fs::File, io::Error>(file)
                })
                .await
                .map_err(join_error)?
                .map_err(|e| map_io(e, key))
            })
            .await?;

        let body = tokio::fs::File::from_std(file).take(len);
        Ok(DriverReader {
            attributes: ReaderAttributes::from(&meta),
            body: Box::new(ContextReader::new(ctx, body)),
        })
    }

    async fn list_page(&self, ctx: &CallContext, query: &ListQuery) -> Result<ListPage> {
        // only walk the deepest directory the prefix names
        let base = match query.prefix.rfind('/') {
            Some(pos) => self.root.join(&query.prefix[..pos]),
            None => self.root.clone(),
        };
        let mut entries = ctx
            .run(async { self.walk_dir(&base).await.map_err(BlobError::from) })
            .await?;
        entries.retain(|e| e.key.starts_with(&query.prefix));
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(paginate(entries, query))
    }

    async fn attributes(&self, ctx: &CallContext, key: &str) -> Result<ObjectMetadata> {
        let path = self.key_path(key)?;
        ctx.run(self.load_metadata(key, &path)).await
    }

    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        ctx.check()?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| map_io(e, key))?;
        if !meta.is_file() {
            return Err(BlobError::NotFound(key.to_string()));
        }
        tokio::fs::remove_file(&path).await.map_err(|e| map_io(e, key))?;
        let _ = tokio::fs::remove_file(attrs_path(&path)).await;
        self.prune_empty_dirs(&path);
        Ok(())
    }

    /// Server-side copy: copy into a temp file, then rename into place / 服务端复制
    async fn copy(&self, ctx: &CallContext, dst_key: &str, src_key: &str) -> Result<()> {
        let src = self.key_path(src_key)?;
        let dst = self.key_path(dst_key)?;
        let src_name = src_key.to_string();
        ctx.run(async {
            tokio::task::spawn_blocking(move || {
                if !src.is_file() {
                    return Err(BlobError::NotFound(src_name));
                }
                let parent = dst.parent().unwrap_or_else(|| Path::new("."));
                std::fs::create_dir_all(parent).map_err(BlobError::from)?;
                let temp = parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
                if let Err(e) = std::fs::copy(&src, &temp) {
                    let _ = std::fs::remove_file(&temp);
                    return Err(map_io(e, &src_name));
                }
                // same order as a write: sidecar, then content
                match std::fs::copy(attrs_path(&src), attrs_path(&dst)) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        let _ = std::fs::remove_file(attrs_path(&dst));
                    }
                    Err(e) => {
                        let _ = std::fs::remove_file(&temp);
                        return Err(BlobError::from(e));
                    }
                }
                if let Err(e) = std::fs::rename(&temp, &dst) {
                    let _ = std::fs::remove_file(&temp);
                    return Err(map_io(e, &src_name));
                }
                Ok(())
            })
            .await
            .map_err(join_error)?
        })
        .await
    }
}
