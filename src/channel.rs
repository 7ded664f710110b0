// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel over lapin
//!
//! The production implementation of the [`crate::broker`] traits. Connection and
//! channel handles are wrapped in `Arc` so the session can hand them out while it
//! keeps ownership of the lifecycle.

use crate::{
    broker::{BrokerChannel, BrokerConnection, BrokerConnector, DeliveryStream},
    configs::MQConfiguration,
    errors::AmqpError,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    uri::AMQPUri,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::sync::Arc;
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ with lapin.
pub struct LapinConnector {
    app_name: Option<String>,
    confirms: bool,
}

impl LapinConnector {
    pub fn new(cfg: &MQConfiguration) -> LapinConnector {
        LapinConnector {
            app_name: cfg.app_name.clone(),
            confirms: cfg.confirms,
        }
    }

    fn properties(&self) -> ConnectionProperties {
        let options = ConnectionProperties::default();
        match &self.app_name {
            Some(name) => options.with_connection_name(LongString::from(name.clone())),
            None => options,
        }
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    async fn connect(&self, uri: &AMQPUri) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        debug!("creating amqp connection...");

        let conn = match Connection::connect_uri(uri.clone(), self.properties()).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;
        debug!("amqp connected");

        Ok(Arc::new(LapinConnection {
            conn,
            confirms: self.confirms,
        }))
    }
}

struct LapinConnection {
    conn: Connection,
    confirms: bool,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    fn is_closed(&self) -> bool {
        !self.conn.status().connected()
    }

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");

        let channel = match self.conn.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }?;

        if self.confirms {
            if let Err(err) = channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await
            {
                error!(error = err.to_string(), "error to enable publisher confirms");
                return Err(AmqpError::ChannelError(err.to_string()));
            }
        }

        debug!("channel created");
        Ok(Arc::new(LapinChannel { channel }))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.conn
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

/// Splits lapin publish failures into a dead channel or connection and a broker refusal.
fn publish_error(err: lapin::Error) -> AmqpError {
    match err {
        lapin::Error::InvalidChannelState(_)
        | lapin::Error::InvalidChannel(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::IOError(_) => AmqpError::ChannelError(err.to_string()),
        _ => AmqpError::PublishingError(err.to_string()),
    }
}

struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    fn is_closed(&self) -> bool {
        !self.channel.status().connected()
    }

    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(name, kind, options, arguments)
            .await
            .map_err(|err| AmqpError::DeclareExchangeError(name.to_owned(), err.to_string()))
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        self.channel
            .queue_declare(name, options, arguments)
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::DeclareQueueError(name.to_owned(), err.to_string()))
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(queue, exchange, routing_key, options, arguments)
            .await
            .map_err(|err| AmqpError::BindingExchangeToQueueError {
                queue: queue.to_owned(),
                exchange: exchange.to_owned(),
                reason: err.to_string(),
            })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let confirmation = self
            .channel
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;

        if confirmation.is_nack() {
            return Err(AmqpError::PublishNacked);
        }

        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, arguments)
            .await
            .map_err(|err| AmqpError::BindingConsumerError(queue.to_owned(), err.to_string()))?;

        Ok(consumer
            .map(|delivery| delivery.map_err(|err| AmqpError::ConsumerError(err.to_string())))
            .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_channel_on_publish_is_unavailable() {
        let err = publish_error(lapin::Error::InvalidChannelState(lapin::ChannelState::Closed));
        assert!(matches!(err, AmqpError::ChannelError(_)));
        assert!(err.is_unavailable());
    }

    #[test]
    fn other_publish_failures_are_refusals() {
        let err = publish_error(lapin::Error::ChannelsLimitReached);
        assert!(matches!(err, AmqpError::PublishingError(_)));
        assert!(!err.is_unavailable());
    }
}
