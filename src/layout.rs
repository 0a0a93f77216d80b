//! Filesystem layout policy: permission bits for everything the engine
//! creates, plus the create/exclusive-create helpers that apply them.

use std::io;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tokio::fs::{self, File, OpenOptions};

pub const DEFAULT_FILE_MODE: u32 = 0o600;
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Permission bits applied to created files and directories.
///
/// Passed explicitly from the config down to the orchestrator, the asset
/// cache and catalog targets. Ignored on non-unix platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Layout {
    #[serde(default = "default_file_mode", deserialize_with = "deserialize_mode")]
    pub file_mode: u32,
    #[serde(default = "default_dir_mode", deserialize_with = "deserialize_mode")]
    pub dir_mode: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            file_mode: DEFAULT_FILE_MODE,
            dir_mode: DEFAULT_DIR_MODE,
        }
    }
}

fn default_file_mode() -> u32 {
    DEFAULT_FILE_MODE
}

fn default_dir_mode() -> u32 {
    DEFAULT_DIR_MODE
}

/// Accept either an octal string (`"0640"`, `"750"`) or a plain number.
fn deserialize_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Octal(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Octal(s) => parse_octal_mode(&s).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn parse_octal_mode(s: &str) -> Result<u32, String> {
    let digits = s.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| format!("invalid permission mode '{}', expected octal like 0600", s))?;
    if mode > 0o7777 {
        return Err(format!("permission mode '{}' out of range", s));
    }
    Ok(mode)
}

impl Layout {
    /// Create `path` and any missing parents with `dir_mode`.
    pub async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(self.dir_mode);
        builder.create(path).await
    }

    /// Create exactly one new directory; fails if it already exists.
    pub async fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(self.dir_mode);
        builder.create(path).await
    }

    /// Open a brand-new file for writing; fails if `path` already exists.
    pub async fn create_new(&self, path: &Path) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(self.file_mode);
        options.open(path).await
    }

    /// Open `path` for writing, creating it or truncating what is there.
    pub async fn create(&self, path: &Path) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(self.file_mode);
        options.open(path).await
    }

    /// Create or truncate `path` and write `contents` to it, synced to disk.
    pub async fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file = self.create(path).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await
    }

    /// Apply the file mode to a file created by someone else (the xlsx writer).
    pub async fn restrict(&self, path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(self.file_mode)).await?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }
}
