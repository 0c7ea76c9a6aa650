//! `DuckDB` connection management.
//!
//! A store file is opened exactly once per [`ConnectionManager`]; every
//! handed-out connection is a clone of that root handle so all of them share
//! a single database instance (and therefore a single file lock).

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct ManagerInner {
    db_path: PathBuf,
    root: Mutex<Connection>,
}

/// Owns the root connection of one store file.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Open the store file at `path`, creating it when missing.
    ///
    /// # Errors
    /// Fails when the file cannot be opened, e.g. because another process
    /// holds the write lock.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        let root = Connection::open(db_path.as_path())?;
        configure_connection(&root)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                db_path,
                root: Mutex::new(root),
            }),
        })
    }

    /// Hand out a connection sharing the root database instance.
    ///
    /// # Errors
    /// Returns an error if the root handle cannot be cloned.
    pub fn acquire(&self) -> Result<StoreConnection, ::duckdb::Error> {
        let root = match self.inner.root.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let connection = root.try_clone()?;
        Ok(StoreConnection { connection })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }
}

/// A connection to the store; closes its handle when dropped.
pub struct StoreConnection {
    connection: Connection,
}

impl Deref for StoreConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}
