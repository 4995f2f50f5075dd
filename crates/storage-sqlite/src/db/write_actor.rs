//! Single writer thread. Every mutation runs on it inside one immediate
//! transaction, so SQLite never sees competing writers from this process.

use std::thread;

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use edc_core::errors::{DatabaseError, Error, Result};

use super::DbPool;
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(&DbPool) + Send + 'static>;

#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::UnboundedSender<Job>,
}

pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
    let spawned = thread::Builder::new()
        .name("edc-db-writer".to_string())
        .spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                job(&pool);
            }
            debug!("Database writer stopped");
        });
    if let Err(e) = spawned {
        error!("Failed to start database writer thread: {}", e);
    }
    WriteHandle { sender }
}

impl WriteHandle {
    /// Runs `f` in one top-level transaction on the writer thread.
    ///
    /// Dropping the returned future before the job commits rolls the whole
    /// transaction back.
    pub async fn exec<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
        let job: Job = Box::new(move |pool: &DbPool| {
            if reply_tx.is_closed() {
                return;
            }
            let result = pool
                .get()
                .map_err(StorageError::from)
                .and_then(|mut conn| {
                    conn.immediate_transaction::<T, StorageError, _>(|tx| {
                        let value = f(tx).map_err(StorageError::Domain)?;
                        if reply_tx.is_closed() {
                            return Err(StorageError::Domain(Error::Cancelled));
                        }
                        Ok(value)
                    })
                })
                .map_err(Error::from);
            let _ = reply_tx.send(result);
        });

        self.sender
            .send(job)
            .map_err(|_| {
                Error::Database(DatabaseError::Internal(
                    "database writer is not running".to_string(),
                ))
            })?;

        reply_rx.await.map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "database writer dropped the job".to_string(),
            ))
        })?
    }
}
