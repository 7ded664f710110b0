// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the MQ Engine
//!
//! `AmqpError` is what the broker seam reports. The engine operations wrap it into
//! one error type per operation family so that callers can tell a connection problem
//! (retry `ensure_ready` later) from a broker-side rejection.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the broker client seam.
///
/// Every variant carries the rendered cause from the underlying client so that the
/// engine can log it and wrap it without holding on to client-specific types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{queue}` to exchange `{exchange}`: {reason}")]
    BindingExchangeToQueueError {
        queue: String,
        exchange: String,
        reason: String,
    },

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer on `{0}`: {1}")]
    BindingConsumerError(String, String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// The broker answered a confirmed publish with a NACK
    #[error("publish was nacked by the broker")]
    PublishNacked,

    /// Error reading a delivery from a consumer stream
    #[error("failure to consume message: {0}")]
    ConsumerError(String),

    /// Error closing a channel or connection
    #[error("failure to close: {0}")]
    CloseError(String),
}

impl AmqpError {
    /// The channel or connection could not carry the call. Anything else is the
    /// broker refusing it.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AmqpError::ConnectionError(_) | AmqpError::ChannelError(_)
        )
    }
}

/// Failures of the connection/channel manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Dialing the broker failed. `uri` is the redacted connection uri.
    #[error("failure to connect to `{uri}`: {reason}")]
    DialFailed { uri: String, reason: String },

    #[error("failure to open a channel: {0}")]
    ChannelFailed(String),

    /// The channel or connection went away while a call was using it. The next
    /// operation repairs the session.
    #[error("channel or connection lost: {0}")]
    Lost(String),

    /// Closing failed; the handles were released anyway.
    #[error("failure to close the session: {0}")]
    CloseFailed(String),
}

/// Failures while provisioning the queue topology at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failure to declare exchange `{name}`: {reason}")]
    DeclareExchange { name: String, reason: String },

    #[error("failure to declare queue `{name}`: {reason}")]
    DeclareQueue { name: String, reason: String },

    #[error("failure to bind queue `{queue}` to exchange `{exchange}`: {reason}")]
    BindQueue {
        queue: String,
        exchange: String,
        reason: String,
    },

    /// The retry delay does not fit the 32 bit `x-message-ttl` argument.
    #[error("retry ttl `{0}` ms is out of range")]
    InvalidRetryTtl(u32),
}

/// Failures of [`crate::publisher::RabbitMQPublisher::publish`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(#[from] ConnectionError),

    #[error("broker rejected the publish: {0}")]
    BrokerRejected(String),
}

/// Failures of [`crate::consumer::RabbitMQConsumer::consume`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumeError {
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(#[from] ConnectionError),

    #[error("failure to register consumer on `{queue}`: {reason}")]
    RegistrationFailed { queue: String, reason: String },
}

/// Failures of [`crate::forwarder::RetryForwarder::escalate`].
///
/// When this is returned the message was not forwarded and the original delivery is
/// still the caller's to nack or leave unacked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(#[from] ConnectionError),

    #[error("broker rejected the forward to `{queue}`: {reason}")]
    BrokerRejected { queue: String, reason: String },
}

/// Failures while writing a message to disk.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("invalid correlation id `{0}`")]
    InvalidCorrelationId(String),

    #[error("failure to write `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failure to serialize headers: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("invalid configuration: {0}")]
    InvalidFormat(#[from] Box<figment::Error>),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl From<figment::Error> for SettingsError {
    fn from(err: figment::Error) -> Self {
        SettingsError::InvalidFormat(Box::new(err))
    }
}
