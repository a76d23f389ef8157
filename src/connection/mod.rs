//! Connection management for MongoDB
//!
//! This module provides the store-facing half of the pipeline:
//! - Client option construction (timeouts, pool size, read preference)
//! - Connection establishment with a deadline
//! - Ping health checks before any cursor is opened
//! - Graceful shutdown
//!
//! One `ConnectionManager` is created per connection attempt; a retry always
//! starts from a fresh client so no state from the failed pool is reused.

use std::time::{Duration, Instant};

use mongodb::bson::{Document, doc};
use mongodb::options::{ClientOptions, ReadPreference, SelectionCriteria};
use mongodb::{Client, Collection};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::{ConfigError, ConnectionError, Result};
use crate::utils;

/// Upper bound on how long a graceful client shutdown may take.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// MongoDB connection manager
pub struct ConnectionManager {
    /// MongoDB client instance
    client: Option<Client>,

    /// Connection configuration
    config: ConnectionConfig,

    /// Current connection state
    state: ConnectionState,
}

/// Connection state information
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,

    /// Currently connecting
    Connecting,

    /// Connected and ping confirmed
    Connected,

    /// Connection failed
    Failed(String),
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

impl ConnectionManager {
    /// Create a new connection manager
    ///
    /// # Arguments
    /// * `config` - Connection configuration
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            client: None,
            config,
            state: ConnectionState::Disconnected,
        }
    }

    /// Establish connection to MongoDB and confirm liveness with a ping
    ///
    /// # Returns
    /// * `Result<HealthStatus>` - Ping result or connection error
    pub async fn connect(&mut self) -> Result<HealthStatus> {
        self.state = ConnectionState::Connecting;
        debug!(
            "Connecting to {}",
            utils::uri::sanitize(&self.config.uri)
        );

        let result = self.try_connect().await;
        match &result {
            Ok(status) => {
                self.state = ConnectionState::Connected;
                info!(
                    "MongoDB connection successful ({} ms ping)",
                    status.response_time_ms
                );
            }
            Err(e) => {
                self.state = ConnectionState::Failed(e.to_string());
                self.client = None;
            }
        }
        result
    }

    async fn try_connect(&mut self) -> Result<HealthStatus> {
        let options = self.client_options().await?;
        let client = Client::with_options(options)
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        self.client = Some(client);
        self.health_check().await
    }

    /// Disconnect from MongoDB
    ///
    /// Cursors opened from this client must be dropped first, otherwise the
    /// shutdown waits for them until the grace period runs out.
    pub async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, client.shutdown())
                .await
                .is_err()
            {
                debug!("Client shutdown did not finish within {:?}", SHUTDOWN_GRACE);
            }
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Perform health check on the connection
    ///
    /// # Returns
    /// * `Result<HealthStatus>` - Health check results or error
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let client = self.get_client()?;
        let started = Instant::now();
        let db = client.database(&self.config.database);
        let ping = db.run_command(doc! { "ping": 1 });

        match tokio::time::timeout(self.connect_timeout(), ping).await {
            Ok(Ok(_)) => Ok(HealthStatus {
                response_time_ms: started.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ConnectionError::Timeout("ping".to_string()).into()),
        }
    }

    /// Get a handle to the configured collection
    pub fn collection(&self) -> Result<Collection<Document>> {
        Ok(self
            .get_client()?
            .database(&self.config.database)
            .collection::<Document>(&self.config.collection))
    }

    /// Get the MongoDB client
    pub fn get_client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    /// Get current connection state
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout)
    }

    /// Parse the URI and apply pool, timeout and read preference settings
    async fn client_options(&self) -> Result<ClientOptions> {
        let parsed = tokio::time::timeout(
            self.connect_timeout(),
            ClientOptions::parse(self.config.uri.as_str()),
        )
        .await
        .map_err(|_| ConnectionError::Timeout("URI resolution".to_string()))?;

        let mut options = match parsed {
            Ok(options) => options,
            Err(e) => {
                if let mongodb::error::ErrorKind::InvalidArgument { message, .. } = e.kind.as_ref()
                {
                    return Err(ConfigError::InvalidValue {
                        field: "connection.uri".to_string(),
                        value: message.clone(),
                    }
                    .into());
                }
                return Err(e.into());
            }
        };

        self.configure(&mut options);
        Ok(options)
    }

    /// Apply configuration on top of URI-derived options
    fn configure(&self, options: &mut ClientOptions) {
        options.app_name = Some(self.config.app_name.clone());
        options.connect_timeout = Some(self.connect_timeout());
        options.server_selection_timeout =
            Some(Duration::from_secs(self.config.server_selection_timeout));
        options.max_pool_size = Some(self.config.max_pool_size);
        options.retry_reads = Some(true);
        options.selection_criteria = Some(Self::selection_criteria(
            self.config.read_from_secondary,
        ));
    }

    fn selection_criteria(read_from_secondary: bool) -> SelectionCriteria {
        let preference = if read_from_secondary {
            ReadPreference::SecondaryPreferred {
                options: Default::default(),
            }
        } else {
            ReadPreference::Primary
        };
        SelectionCriteria::ReadPreference(preference)
    }
}
