use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{FrontendError, Result};

/// Resolved engine location. An empty name selects the in-memory engine,
/// whose catalog DuckDB names `memory`; any other name maps to `<name>.db`
/// next to the data directory, with the name doubling as the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDsn {
    pub catalog: String,
    pub path: Option<PathBuf>,
}

impl EngineDsn {
    pub fn in_memory() -> Self {
        EngineDsn {
            catalog: "memory".to_string(),
            path: None,
        }
    }

    pub fn resolve(name: &str) -> Result<Self> {
        let name = name.trim();
        if name == "memory" {
            return Err(FrontendError::Config(
                "'memory' is a reserved name and cannot be used as a database name".to_string(),
            ));
        }
        if name.is_empty() {
            return Ok(Self::in_memory());
        }
        Ok(EngineDsn {
            catalog: name.to_string(),
            path: Some(PathBuf::from(format!("{name}.db"))),
        })
    }
}

#[derive(Debug, Default)]
struct Vars {
    local_infile: i8,
    secure_file_priv: Option<PathBuf>,
}

/// Process-scoped system variables consulted by the bulk-load path.
/// Injected into the components that need them rather than reached for
/// through a global registry.
#[derive(Debug, Default)]
pub struct SystemVariables {
    inner: RwLock<Vars>,
}

impl SystemVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_infile(&self) -> bool {
        self.inner.read().local_infile != 0
    }

    pub fn set_local_infile(&self, value: i8) {
        self.inner.write().local_infile = value;
    }

    pub fn secure_file_priv(&self) -> Option<PathBuf> {
        self.inner.read().secure_file_priv.clone()
    }

    pub fn set_secure_file_priv<P: AsRef<Path>>(&self, value: Option<P>) {
        self.inner.write().secure_file_priv = value.map(|p| p.as_ref().to_path_buf());
    }
}

/// Filesystem layout rooted at the server's data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DataDir {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the per-connection bulk-load FIFOs.
    pub fn load_pipe_dir(&self) -> PathBuf {
        self.root.join("pipes").join("load-data")
    }
}
