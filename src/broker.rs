// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Seam
//!
//! The engine never talks to lapin directly. It goes through these three traits so
//! that the session, topology, publisher, consumer and forwarder can be exercised
//! against mocks. The lapin implementation lives in [`crate::channel`].
//!
//! The traits speak lapin's own property, option and field-table types; only the
//! connection and channel objects are abstracted.

use crate::errors::AmqpError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::{
    message::Delivery,
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    uri::AMQPUri,
    BasicProperties, ExchangeKind,
};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// A lazy, unbounded stream of deliveries. It ends when the channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Dials the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, uri: &AMQPUri) -> Result<Arc<dyn BrokerConnection>, AmqpError>;
}

/// A live broker connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Whether the broker or the network closed this connection.
    fn is_closed(&self) -> bool;

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel on a broker connection. Not safe for unsynchronized concurrent use;
/// the session serializes every call.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_closed(&self) -> bool;

    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    /// Publishes and waits for the broker to take the message. A confirmed channel
    /// reports a NACK as [`AmqpError::PublishNacked`].
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}
