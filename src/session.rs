// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection/Channel Manager
//!
//! One [`AmqpSession`] owns the only broker connection and channel of the process.
//! Every broker interaction goes through [`AmqpSession::acquire`], which takes the
//! session lock, repairs the connection and channel if needed and keeps the lock
//! until the returned [`ReadySession`] is dropped. Broker calls are therefore totally
//! ordered; throughput is traded for a channel that is never used concurrently.
//!
//! There is no background reconnect loop. A dead connection is only noticed, and
//! replaced, when the next operation runs. An operation that fails is not retried
//! here; the caller retries it.

use crate::{
    broker::{BrokerChannel, BrokerConnection, BrokerConnector},
    configs::MQConfiguration,
    errors::ConnectionError,
};
use lapin::uri::AMQPUri;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Lifecycle of the shared connection as seen from outside the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handles, either never connected or closed.
    Absent,
    /// Handles exist and the connection reports open.
    Open,
    /// Handles exist but the broker or the network closed the connection.
    Stale,
}

#[derive(Default)]
struct SessionState {
    connection: Option<Arc<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
}

/// The session lock, held with a live channel.
pub struct ReadySession<'s> {
    _guard: MutexGuard<'s, SessionState>,
    channel: Arc<dyn BrokerChannel>,
}

impl ReadySession<'_> {
    pub fn channel(&self) -> &dyn BrokerChannel {
        self.channel.as_ref()
    }
}

pub struct AmqpSession {
    connector: Arc<dyn BrokerConnector>,
    uri: AMQPUri,
    redacted_uri: String,
    state: Mutex<SessionState>,
}

impl AmqpSession {
    pub fn new(cfg: &MQConfiguration, connector: Arc<dyn BrokerConnector>) -> Arc<AmqpSession> {
        let uri = cfg.uri();
        Arc::new(AmqpSession {
            connector,
            uri: uri.amqp_uri(),
            redacted_uri: uri.redacted(),
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Connection uri with the password redacted.
    pub fn redacted_uri(&self) -> &str {
        &self.redacted_uri
    }

    /// Makes sure a live connection and channel exist, dialing or opening only what
    /// is missing or closed. Safe to call before every operation.
    pub async fn ensure_ready(&self) -> Result<(), ConnectionError> {
        self.acquire().await.map(|_| ())
    }

    /// Takes the session lock and returns it together with a live channel.
    pub async fn acquire(&self) -> Result<ReadySession<'_>, ConnectionError> {
        let mut guard = self.state.lock().await;
        let channel = self.repair(&mut guard).await?;

        Ok(ReadySession {
            _guard: guard,
            channel,
        })
    }

    async fn repair(
        &self,
        state: &mut SessionState,
    ) -> Result<Arc<dyn BrokerChannel>, ConnectionError> {
        let live = state
            .connection
            .as_ref()
            .filter(|conn| !conn.is_closed())
            .cloned();

        let connection = match live {
            Some(conn) => conn,
            None => {
                warn!(
                    uri = %self.redacted_uri,
                    "connection is absent or closed, reconnecting"
                );
                state.channel = None;

                let conn = match self.connector.connect(&self.uri).await {
                    Ok(conn) => Ok(conn),
                    Err(err) => {
                        error!(
                            error = err.to_string(),
                            uri = %self.redacted_uri,
                            "failure to connect"
                        );
                        Err(ConnectionError::DialFailed {
                            uri: self.redacted_uri.clone(),
                            reason: err.to_string(),
                        })
                    }
                }?;

                state.connection = Some(conn.clone());
                conn
            }
        };

        let live = state
            .channel
            .as_ref()
            .filter(|channel| !channel.is_closed())
            .cloned();

        match live {
            Some(channel) => Ok(channel),
            None => {
                warn!("channel is absent or closed, opening a new one");

                let channel = match connection.create_channel().await {
                    Ok(channel) => Ok(channel),
                    Err(err) => {
                        error!(error = err.to_string(), "failure to open channel");
                        Err(ConnectionError::ChannelFailed(err.to_string()))
                    }
                }?;

                state.channel = Some(channel.clone());
                debug!(uri = %self.redacted_uri, "channel is open and ready to use");
                Ok(channel)
            }
        }
    }

    /// Closes the channel, then the connection, and drops both handles. The first
    /// close failure is reported after the handles are gone.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        let mut failure = None;

        if let Some(channel) = state.channel.take() {
            if let Err(err) = channel.close().await {
                warn!(error = err.to_string(), "failure to close channel");
                failure.get_or_insert(err);
            }
        }

        if let Some(conn) = state.connection.take() {
            if let Err(err) = conn.close().await {
                warn!(error = err.to_string(), "failure to close connection");
                failure.get_or_insert(err);
            }
        }

        info!(uri = %self.redacted_uri, "session closed");

        match failure {
            Some(err) => Err(ConnectionError::CloseFailed(err.to_string())),
            None => Ok(()),
        }
    }

    /// Both handles exist. Says nothing about whether they are still alive.
    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        state.connection.is_some() && state.channel.is_some()
    }

    /// Both handles exist and the connection reports open.
    pub async fn is_healthy(&self) -> bool {
        let state = self.state.lock().await;

        let (Some(conn), Some(_)) = (&state.connection, &state.channel) else {
            error!("rabbitmq connection or channel is not initialized");
            return false;
        };

        if conn.is_closed() {
            error!("rabbitmq connection is closed");
            return false;
        }

        true
    }

    pub async fn state(&self) -> ConnectionState {
        let state = self.state.lock().await;
        match &state.connection {
            None => ConnectionState::Absent,
            Some(conn) if conn.is_closed() => ConnectionState::Stale,
            Some(_) => ConnectionState::Open,
        }
    }
}
