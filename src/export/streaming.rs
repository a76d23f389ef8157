//! Cursor driver
//!
//! A [`DocumentStore`] opens one [`StreamingQuery`] per connection attempt.
//! The query yields documents in ascending primary-key order in bounded
//! batches and is never restarted: after a fault the supervisor opens a new
//! one with an updated resume identifier.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use mongodb::bson::Document;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::connection::ConnectionManager;
use crate::error::{ConnectionError, Result};

use super::query::CursorRequest;

/// Trait for streaming query results in batches
#[async_trait]
pub trait StreamingQuery: Send {
    /// Fetch the next batch of documents
    ///
    /// # Returns
    /// * `Result<Option<Vec<Document>>>` - Next batch, or None once exhausted
    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>>;

    /// Close the query and release the connection behind it
    async fn close(&mut self) -> Result<()>;
}

/// A store that can open cursors for a request
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Connect, confirm liveness and open a cursor
    async fn open(&self, request: &CursorRequest) -> Result<Box<dyn StreamingQuery>>;
}

/// MongoDB-backed store; every `open` uses a fresh client
pub struct MongoStore {
    config: ConnectionConfig,
}

impl MongoStore {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.config.read_timeout)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn open(&self, request: &CursorRequest) -> Result<Box<dyn StreamingQuery>> {
        let mut manager = ConnectionManager::new(self.config.clone());
        manager.connect().await?;

        let collection = match manager.collection() {
            Ok(collection) => collection,
            Err(e) => {
                manager.disconnect().await;
                return Err(e);
            }
        };

        let cursor = collection
            .find(request.filter.clone())
            .projection(request.projection.clone())
            .sort(request.sort.clone())
            .batch_size(request.batch_size)
            .max_time(self.read_timeout())
            .await;

        match cursor {
            Ok(cursor) => {
                debug!(
                    "Opened cursor on {}.{} (resume after {:?})",
                    self.config.database, self.config.collection, request.resume_after
                );
                Ok(Box::new(CursorStreamingQuery::new(
                    cursor,
                    manager,
                    request.batch_size,
                    self.read_timeout(),
                )))
            }
            Err(e) => {
                manager.disconnect().await;
                Err(e.into())
            }
        }
    }
}

/// Cursor plus the connection that owns it
///
/// Generic over the document stream; `MongoStore` uses a driver cursor.
pub struct CursorStreamingQuery<S> {
    cursor: Option<S>,
    manager: ConnectionManager,
    batch_size: u32,
    read_timeout: Duration,
    total_fetched: u64,
}

impl<S> CursorStreamingQuery<S> {
    pub fn new(
        cursor: S,
        manager: ConnectionManager,
        batch_size: u32,
        read_timeout: Duration,
    ) -> Self {
        Self {
            cursor: Some(cursor),
            manager,
            batch_size,
            read_timeout,
            total_fetched: 0,
        }
    }
}

#[async_trait]
impl<S> StreamingQuery for CursorStreamingQuery<S>
where
    S: Stream<Item = mongodb::error::Result<Document>> + Unpin + Send,
{
    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let mut batch = Vec::with_capacity(self.batch_size as usize);
        while batch.len() < self.batch_size as usize {
            let next = match tokio::time::timeout(self.read_timeout, cursor.try_next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.cursor = None;
                    return Err(ConnectionError::Timeout("cursor batch".to_string()).into());
                }
            };
            match next {
                Ok(Some(doc)) => batch.push(doc),
                Ok(None) => break,
                Err(e) => {
                    self.cursor = None;
                    return Err(e.into());
                }
            }
        }

        if batch.is_empty() {
            debug!("Cursor exhausted after {} documents", self.total_fetched);
            self.cursor = None;
            return Ok(None);
        }

        self.total_fetched += batch.len() as u64;
        Ok(Some(batch))
    }

    async fn close(&mut self) -> Result<()> {
        // Drop the cursor before shutting the client down
        self.cursor = None;
        if self.manager.is_connected() {
            self.manager.disconnect().await;
            info!("Closed cursor after fetching {} documents", self.total_fetched);
        }
        Ok(())
    }
}
