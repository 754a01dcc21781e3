//! Project discovery and layout
//!
//! A project is any directory containing a `.loom/` folder. It holds the
//! config file and the SQLite database.

use miette::Diagnostic;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::config::{Config, ConfigError};
use crate::core::store::{Store, StoreError};

pub const PROJECT_DIR: &str = ".loom";
const CONFIG_FILE: &str = "config.yaml";
const DATABASE_FILE: &str = "loom.db";

#[derive(Debug, Error, Diagnostic)]
pub enum ProjectError {
    #[error("not a loom project (no {PROJECT_DIR} found in {searched} or any parent)")]
    #[diagnostic(code(loom::project::not_found), help("run `loom init` first"))]
    NotFound { searched: PathBuf },

    #[error("project already initialized at {0}")]
    #[diagnostic(code(loom::project::exists), help("pass --force to rewrite the config"))]
    AlreadyInitialized(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open database: {0}")]
    #[diagnostic(code(loom::project::store))]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    /// Create `.loom/` with a default config and an empty database
    pub fn init(root: impl AsRef<Path>) -> Result<Self, ProjectError> {
        Self::init_with(root, false)
    }

    /// Like [`Project::init`]; `force` rewrites the config of an existing project
    pub fn init_with(root: impl AsRef<Path>, force: bool) -> Result<Self, ProjectError> {
        let project = Self {
            root: root.as_ref().to_path_buf(),
        };
        let dir = project.loom_dir();
        if dir.exists() && !force {
            return Err(ProjectError::AlreadyInitialized(project.root.clone()));
        }
        fs::create_dir_all(&dir)?;
        fs::write(project.config_path(), Config::default().to_yaml()?)?;

        let config = Config::default();
        Store::open(project.database_path(), &config.store.options())?;
        Ok(project)
    }

    /// Walk up from the current directory looking for `.loom/`
    pub fn discover() -> Result<Self, ProjectError> {
        let cwd = std::env::current_dir()?;
        Self::discover_from(&cwd)
    }

    pub fn discover_from(start: &Path) -> Result<Self, ProjectError> {
        let mut dir = Some(start);
        while let Some(candidate) = dir {
            if candidate.join(PROJECT_DIR).is_dir() {
                return Ok(Self {
                    root: candidate.to_path_buf(),
                });
            }
            dir = candidate.parent();
        }
        Err(ProjectError::NotFound {
            searched: start.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn loom_dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.loom_dir().join(CONFIG_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        self.loom_dir().join(DATABASE_FILE)
    }

    pub fn config(&self) -> Result<Config, ProjectError> {
        Ok(Config::load(self)?)
    }

    pub fn open_store(&self, config: &Config) -> Result<Store, ProjectError> {
        Ok(Store::open(self.database_path(), &config.store.options())?)
    }
}
