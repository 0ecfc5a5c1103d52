//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - an isolated config file
//! - stand-in device nodes and symlink aliases
//!
//! # Usage
//!
//! ```ignore
//! use camrift_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let node = env.create_node("video0")?;
//! let config = env.write_config(&format!(
//!     "[[devices]]\npath = {:?}\ncamera = \"synthetic0\"\n",
//!     node
//! ))?;
//! ```

use crate::{Config, ENV_CONFIG};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Canonical root of the environment
    pub root: PathBuf,
    /// Config file written by `write_config`
    pub config_path: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        // tmp dirs may sit behind a symlink; device paths are compared canonicalized
        let root = temp_dir.path().canonicalize()?;
        std::fs::create_dir_all(root.join("dev"))?;

        Ok(Self {
            config_path: root.join(format!("camrift-test-{}.toml", test_id)),
            _temp_dir: temp_dir,
            root,
            test_id,
        })
    }

    /// Path of a device node under this environment (not created)
    pub fn device_path(&self, name: &str) -> PathBuf {
        self.root.join("dev").join(name)
    }

    /// Create an empty regular file standing in for a device node
    pub fn create_node(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self.device_path(name);
        std::fs::write(&path, b"")?;
        Ok(path)
    }

    /// Create `link` pointing at `target`
    pub fn create_alias(&self, link: &str, target: &Path) -> anyhow::Result<PathBuf> {
        let path = self.device_path(link);
        std::os::unix::fs::symlink(target, &path)?;
        Ok(path)
    }

    /// Write `contents` as the config file and load it back
    pub fn write_config(&self, contents: &str) -> anyhow::Result<Config> {
        std::fs::write(&self.config_path, contents)?;
        let config = Config::load_from(&self.config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables pointing a shimmed process at this config
    pub fn shim_env(&self) -> Vec<(String, String)> {
        vec![(
            ENV_CONFIG.to_string(),
            self.config_path.to_string_lossy().into_owned(),
        )]
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
