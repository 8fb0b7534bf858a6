//! SQLite access for compiled commands.
//!
//! Every call opens its own connection, runs one closure against it on the
//! blocking pool via `tokio::task::spawn_blocking`, and drops it. Opening is
//! bounded by the connect timeout; the closure by the command timeout, after
//! which the connection is interrupted. A timeout of zero disables the limit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::config::ConnectionTarget;
use crate::error::ExecutionError;

/// Per-call connections for one logical connection name.
#[derive(Debug, Clone)]
pub struct Database {
    target: Arc<ConnectionTarget>,
}

impl Database {
    pub fn new(target: ConnectionTarget) -> Self {
        Self {
            target: Arc::new(target),
        }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Open a connection synchronously.
    pub fn open(&self) -> Result<Connection, ExecutionError> {
        open_connection(&self.target)
    }

    /// Run `f` on a fresh connection off the async runtime.
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, ExecutionError>
    where
        F: FnOnce(&Connection) -> Result<T, ExecutionError> + Send + 'static,
        T: Send + 'static,
    {
        let target = self.target.clone();
        let conn = bounded(
            self.target.connect_timeout,
            "connecting",
            tokio::task::spawn_blocking(move || open_connection(&target)),
        )
        .await?;

        let interrupt = conn.get_interrupt_handle();
        let task = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            drop(conn);
            result
        });

        match bounded(self.target.command_timeout, "executing command", task).await {
            Err(err @ ExecutionError::Timeout { .. }) => {
                tracing::warn!(
                    "Command on connection '{}' timed out, interrupting",
                    self.target.name
                );
                interrupt.interrupt();
                Err(err)
            }
            other => other,
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    task: impl Future<Output = Result<Result<T, ExecutionError>, tokio::task::JoinError>>,
) -> Result<T, ExecutionError> {
    let joined = if limit.is_zero() {
        task.await
    } else {
        tokio::time::timeout(limit, task)
            .await
            .map_err(|_| ExecutionError::Timeout {
                operation,
                seconds: limit.as_secs(),
            })?
    };
    joined.map_err(|e| ExecutionError::Join(e.to_string()))?
}

fn open_connection(target: &ConnectionTarget) -> Result<Connection, ExecutionError> {
    let flags = if target.read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::default()
    };

    let connect_err = |source| ExecutionError::Connect {
        connection: target.name.clone(),
        source,
    };

    let conn = Connection::open_with_flags(&target.path, flags).map_err(connect_err)?;
    conn.busy_timeout(target.connect_timeout).map_err(connect_err)?;
    tracing::debug!("Opened connection '{}' at {}", target.name, target.path);
    Ok(conn)
}
