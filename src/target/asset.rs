//! Write-once local staging of row attachments.
//!
//! The first target that needs an asset downloads it once and the bytes are
//! written to the cache while they flow to that target. Every later target in
//! the same item reads the cached copy.

use std::io;
use std::path::PathBuf;

use futures_util::{stream, StreamExt};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::error::AssetError;
use crate::drive::{ByteStream, ObjectStore};
use crate::layout::Layout;

const PART_SUFFIX: &str = ".part";

/// An opened asset: its filesystem-safe name and a stream of its bytes.
pub struct Asset {
    pub name: String,
    pub stream: ByteStream,
}

#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
    layout: Layout,
}

/// Strip characters that would let an asset name escape its directory.
pub fn clean_asset_name(name: &str) -> Result<String, AssetError> {
    let clean: String = name
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'))
        .collect();
    if clean.is_empty() || clean == "." || clean == ".." || clean.ends_with(PART_SUFFIX) {
        return Err(AssetError::InvalidName(name.to_string()));
    }
    Ok(clean)
}

impl AssetCache {
    pub fn new(dir: PathBuf, layout: Layout) -> Self {
        Self { dir, layout }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Open the asset called `name`, fetching it from `store` if it is not
    /// cached yet.
    ///
    /// For a fresh fetch the returned stream writes every chunk to
    /// `<name>.part` as it is read and renames it into place once the source
    /// is exhausted, so a cache entry exists only if it is complete.
    pub async fn open(&self, name: &str, store: &dyn ObjectStore) -> Result<Asset, AssetError> {
        let name = clean_asset_name(name)?;
        let cached = self.path(&name);

        if fs::try_exists(&cached).await? {
            tracing::debug!(asset = %name, "Using cached asset");
            let file = File::open(&cached).await?;
            return Ok(Asset {
                name,
                stream: Box::pin(ReaderStream::new(file)),
            });
        }

        let id = store.find(&name, None).await?;
        let source = store.download(&id, None).await?;

        self.layout.create_dir_all(&self.dir).await?;
        let part = self.dir.join(format!("{}{}", name, PART_SUFFIX));
        // leftover from an attempt whose consumer stopped reading early
        match fs::remove_file(&part).await {
            Ok(()) => tracing::debug!(asset = %name, "Discarded stale partial asset"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let file = self.layout.create_new(&part).await?;
        tracing::debug!(asset = %name, id = %id, "Caching asset");

        Ok(Asset {
            name,
            stream: tee_into_cache(source, file, part, cached),
        })
    }
}

struct Tee {
    source: ByteStream,
    file: File,
    part: PathBuf,
    target: PathBuf,
}

impl Tee {
    async fn commit(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        fs::rename(&self.part, &self.target).await
    }

    async fn abandon(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.part).await;
    }
}

fn tee_into_cache(source: ByteStream, file: File, part: PathBuf, target: PathBuf) -> ByteStream {
    let state = Some(Tee {
        source,
        file,
        part,
        target,
    });
    Box::pin(stream::unfold(state, |state| async move {
        let mut tee = state?;
        match tee.source.next().await {
            Some(Ok(chunk)) => match tee.file.write_all(&chunk).await {
                Ok(()) => Some((Ok(chunk), Some(tee))),
                Err(e) => {
                    tee.abandon().await;
                    Some((Err(e), None))
                }
            },
            Some(Err(e)) => {
                tee.abandon().await;
                Some((Err(e), None))
            }
            None => match tee.commit().await {
                Ok(()) => None,
                Err(e) => Some((Err(e), None)),
            },
        }
    }))
}

/// Drain `stream` into `file` and sync it.
pub async fn write_stream(mut stream: ByteStream, mut file: File) -> io::Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testutil::FakeStore;

    async fn drain(mut stream: ByteStream) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[test]
    fn test_clean_asset_name() {
        assert_eq!(clean_asset_name("song.mp3").unwrap(), "song.mp3");
        assert_eq!(clean_asset_name("../../etc/passwd").unwrap(), "....etcpasswd");
        assert!(clean_asset_name("..").is_err());
        assert!(clean_asset_name("  ").is_err());
        assert!(clean_asset_name("x.mp3.part").is_err());
    }

    #[tokio::test]
    async fn test_first_open_fetches_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::default().with_file("a.mp3", b"audio-bytes");
        let cache = AssetCache::new(dir.path().join("audio"), Layout::default());

        let asset = cache.open("a.mp3", &store).await.unwrap();
        assert_eq!(asset.name, "a.mp3");
        assert!(!cache.path("a.mp3").exists(), "cache entry appears only when complete");
        assert_eq!(drain(asset.stream).await.unwrap(), b"audio-bytes");

        assert_eq!(std::fs::read(cache.path("a.mp3")).unwrap(), b"audio-bytes");
        assert!(!dir.path().join("audio/a.mp3.part").exists());
        assert_eq!(store.download_count(), 1);
    }

    #[tokio::test]
    async fn test_second_open_reads_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::default().with_file("a.mp3", b"abc");
        let cache = AssetCache::new(dir.path().to_path_buf(), Layout::default());

        drain(cache.open("a.mp3", &store).await.unwrap().stream)
            .await
            .unwrap();
        let again = drain(cache.open("a.mp3", &store).await.unwrap().stream)
            .await
            .unwrap();
        assert_eq!(again, b"abc");
        assert_eq!(store.download_count(), 1);
        assert_eq!(store.find_count(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_stream_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::default().with_file("a.mp3", b"abc");
        let cache = AssetCache::new(dir.path().to_path_buf(), Layout::default());

        let asset = cache.open("a.mp3", &store).await.unwrap();
        drop(asset);
        assert!(!cache.path("a.mp3").exists());

        // a later attempt replaces the stale partial file
        let bytes = drain(cache.open("a.mp3", &store).await.unwrap().stream)
            .await
            .unwrap();
        assert_eq!(bytes, b"abc");
        assert!(cache.path("a.mp3").exists());
    }

    #[tokio::test]
    async fn test_lookup_errors_surface() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::default()
            .with_file("dup.mp3", b"1")
            .with_file("dup.mp3", b"2");
        let cache = AssetCache::new(dir.path().to_path_buf(), Layout::default());

        let err = cache.open("dup.mp3", &store).await.err().unwrap();
        assert!(matches!(err, AssetError::Store(crate::drive::StoreError::Ambiguous { .. })));
        let err = cache.open("missing.mp3", &store).await.err().unwrap();
        assert!(matches!(err, AssetError::Store(crate::drive::StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_write_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let file = Layout::default().create_new(&path).await.unwrap();
        let chunks = vec![Ok(bytes::Bytes::from_static(b"ab")), Ok(bytes::Bytes::from_static(b"cd"))];
        let n = write_stream(Box::pin(stream::iter(chunks)), file).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");
    }
}
