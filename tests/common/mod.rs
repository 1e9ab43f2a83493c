//! Shared helpers for integration tests.

#![allow(dead_code)]

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A throwaway project directory with a `provisor.toml`.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    /// Create a project with an empty `provisor.toml` and `config` string.
    pub async fn new() -> Result<Self> {
        Self::with_config("").await
    }

    pub async fn with_config(config: &str) -> Result<Self> {
        let project = Self {
            dir: TempDir::new()?,
        };
        project.write("provisor.toml", config).await?;
        Ok(project)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to a project-relative path, creating parent folders.
    pub async fn write(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    pub async fn write_store(&self, content: &str) -> Result<PathBuf> {
        self.write("config/store.toml", content).await
    }

    pub async fn write_host(&self, hostname: &str, content: &str) -> Result<PathBuf> {
        self.write(&format!("hosts/{hostname}.toml"), content).await
    }

    /// The `provisor` binary, run from the project directory.
    pub fn provisor(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("provisor").expect("provisor binary is built");
        cmd.current_dir(self.path())
            .env_remove("PROVISOR_CONFIG")
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1");
        cmd
    }
}
