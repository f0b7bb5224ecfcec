//! Build metadata lookup and firmware image description.
//!
//! Every firmware image is built alongside a `buildvars.h` carrying its
//! revision. Target revisions for an update run come from these files.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{UpdaterError, UpdaterResult};

/// Companion file expected next to each firmware image.
pub const BUILD_METADATA_FILE: &str = "buildvars.h";

/// Recognized revision keys. The first line defining any of them wins.
pub const REVISION_KEYS: &[&str] = &["CLI_RevisionNumber", "BCD_VERSION", "GIT_COMMIT_NUMBER"];

/// Locate the build metadata file in the image's directory.
pub fn find_build_metadata(image: &Path) -> UpdaterResult<PathBuf> {
    let dir = match image.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let metadata = dir.join(BUILD_METADATA_FILE);
    if metadata.is_file() {
        Ok(metadata)
    } else {
        Err(UpdaterError::MissingBuildMetadata {
            image: image.to_path_buf(),
        })
    }
}

/// Read the revision from a build metadata file.
///
/// A line matches when one of its whitespace tokens is exactly a recognized
/// key; the value is the last token, decimal or `0x` hex.
pub fn read_revision(metadata: &Path) -> UpdaterResult<u32> {
    let contents = fs::read_to_string(metadata)?;
    for line in contents.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(key) = tokens.iter().find(|t| REVISION_KEYS.contains(*t)) else {
            continue;
        };
        let Some(value) = tokens.last().filter(|v| *v != key) else {
            continue;
        };
        match parse_revision(value) {
            Some(revision) => {
                log::debug!("{} = {} in {}", key, revision, metadata.display());
                return Ok(revision);
            }
            None => log::warn!("Ignoring non-numeric {} '{}' in {}", key, value, metadata.display()),
        }
    }
    Err(UpdaterError::MissingRevision {
        metadata: metadata.to_path_buf(),
    })
}

fn parse_revision(value: &str) -> Option<u32> {
    let value = value.trim_matches('"');
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Calculate SHA256 hash of a file
pub fn image_digest(path: &Path) -> UpdaterResult<String> {
    let mut file = fs::File::open(path)?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// A firmware image with the revision its build metadata declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareImage {
    pub path: PathBuf,
    pub revision: u32,
    pub sha256: String,
}

impl FirmwareImage {
    /// Describe `path` from its companion metadata and contents.
    pub fn locate(path: &Path) -> UpdaterResult<Self> {
        let metadata = find_build_metadata(path)?;
        let revision = read_revision(&metadata)?;
        let sha256 = image_digest(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            revision,
            sha256,
        })
    }
}

impl fmt::Display for FirmwareImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (revision {}, sha256 {})",
            self.path.display(),
            self.revision,
            self.sha256
        )
    }
}

/// Revisions an update run reconciles the device to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetRevisions {
    pub bootloader: u32,
    pub mcu: u32,
    pub ble: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::temp::TestContext;

    #[test]
    fn test_locate_image() {
        let ctx = TestContext::new();
        let image = ctx.create_build("mcu", "kiibohd.dfu.bin", "CLI_RevisionNumber", "1400");

        let firmware = FirmwareImage::locate(&image).unwrap();
        assert_eq!(firmware.revision, 1400);
        assert_eq!(firmware.path, image);
        assert_eq!(firmware.sha256.len(), 64);
    }

    #[test]
    fn test_exact_key_match() {
        let ctx = TestContext::new();
        let metadata = ctx.create_file(
            "buildvars.h",
            "#define CLI_RevisionNumberStr \"1233\"\n#define BCD_VERSION 1301\n",
        );
        assert_eq!(read_revision(&metadata).unwrap(), 1301);
    }

    #[test]
    fn test_hex_revision() {
        let ctx = TestContext::new();
        let metadata = ctx.create_file("buildvars.h", "#define GIT_COMMIT_NUMBER 0x04E3\n");
        assert_eq!(read_revision(&metadata).unwrap(), 0x04E3);
    }

    #[test]
    fn test_missing_revision() {
        let ctx = TestContext::new();
        let metadata = ctx.create_file("buildvars.h", "#define CLI_Version \"0.5\"\n");
        let err = read_revision(&metadata).unwrap_err();
        assert!(matches!(err, UpdaterError::MissingRevision { .. }));
    }

    #[test]
    fn test_missing_metadata() {
        let ctx = TestContext::new();
        let image = ctx.create_file_bytes("ble/ble.bin", &[0; 16]);
        let err = FirmwareImage::locate(&image).unwrap_err();
        assert_eq!(err.error_code(), "UPD-050");
    }

    #[test]
    fn test_digest_known_value() {
        let ctx = TestContext::new();
        let file = ctx.create_file("hello.bin", "hello");
        assert_eq!(
            image_digest(&file).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
