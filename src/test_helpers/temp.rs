use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test context with temporary directory management.
/// Automatically cleans up when dropped.
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a fresh temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get the root path of the temporary directory
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a file with content at the given relative path
    pub fn create_file(&self, relative_path: &str, content: &str) -> PathBuf {
        self.create_file_bytes(relative_path, content.as_bytes())
    }

    /// Create a file with binary content at the given relative path
    pub fn create_file_bytes(&self, relative_path: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Create a firmware build directory: `<dir>/<image>` plus a
    /// `buildvars.h` defining `key` as `value`.
    pub fn create_build(&self, dir: &str, image: &str, key: &str, value: &str) -> PathBuf {
        self.create_file(
            &format!("{}/buildvars.h", dir),
            &format!(
                "// Generated build variables\n#define CLI_RevisionNumberStr \"unused\"\n#define {} {}\n",
                key, value
            ),
        );
        self.create_file_bytes(&format!("{}/{}", dir, image), &[0xA5; 64])
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
