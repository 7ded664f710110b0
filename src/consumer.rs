// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! Registers a consumer and hands the delivery stream back to the caller. Only the
//! registration runs under the session lock; the stream is read without it.

use crate::{broker::DeliveryStream, errors::ConsumeError, session::AmqpSession};
use lapin::{options::BasicConsumeOptions, types::FieldTable};
use std::sync::Arc;
use tracing::{error, info};

/// An empty tag asks the broker to generate a unique one.
const BROKER_GENERATED_TAG: &str = "";

pub struct RabbitMQConsumer {
    session: Arc<AmqpSession>,
}

impl RabbitMQConsumer {
    pub fn new(session: Arc<AmqpSession>) -> RabbitMQConsumer {
        RabbitMQConsumer { session }
    }

    /// Starts consuming `queue`.
    ///
    /// With `auto_ack` off the caller owns acking or nacking every delivery. The
    /// stream stays open until the channel closes or the caller drops it.
    pub async fn consume(&self, queue: &str, auto_ack: bool) -> Result<DeliveryStream, ConsumeError> {
        let ready = self.session.acquire().await.map_err(|err| {
            error!(error = err.to_string(), "failure to ensure channel is open");
            ConsumeError::from(err)
        })?;

        info!(queue, "starting to consume from queue");

        match ready
            .channel()
            .basic_consume(
                queue,
                BROKER_GENERATED_TAG,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: auto_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue, "error to create the consumer");
                Err(ConsumeError::RegistrationFailed {
                    queue: queue.to_owned(),
                    reason: err.to_string(),
                })
            }
            Ok(stream) => {
                info!(queue, "consumer registered successfully");
                Ok(stream)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::AmqpError,
        test_support::{open_channel, session_for},
    };
    use futures_util::{stream, StreamExt};

    #[tokio::test]
    async fn registers_with_a_broker_generated_tag() {
        let mut channel = open_channel();
        channel
            .expect_basic_consume()
            .withf(|queue, tag, options, _| {
                queue == "orders"
                    && tag.is_empty()
                    && !options.no_ack
                    && !options.exclusive
                    && !options.no_local
                    && !options.nowait
            })
            .times(1)
            .returning(|_, _, _, _| Ok(stream::empty().boxed()));

        let consumer = RabbitMQConsumer::new(session_for(channel));
        let mut deliveries = consumer.consume("orders", false).await.unwrap();

        assert!(deliveries.next().await.is_none());
    }

    #[tokio::test]
    async fn auto_ack_is_passed_through() {
        let mut channel = open_channel();
        channel
            .expect_basic_consume()
            .withf(|_, _, options, _| options.no_ack)
            .times(1)
            .returning(|_, _, _, _| Ok(stream::empty().boxed()));

        let consumer = RabbitMQConsumer::new(session_for(channel));
        assert!(consumer.consume("audit", true).await.is_ok());
    }

    #[tokio::test]
    async fn registration_failure_names_the_queue() {
        let mut channel = open_channel();
        channel.expect_basic_consume().times(1).returning(|queue, _, _, _| {
            Err(AmqpError::BindingConsumerError(
                queue.to_owned(),
                "NOT_FOUND".to_owned(),
            ))
        });

        let consumer = RabbitMQConsumer::new(session_for(channel));
        let err = consumer.consume("missing", false).await.err().unwrap();

        assert!(matches!(
            err,
            ConsumeError::RegistrationFailed { ref queue, .. } if queue == "missing"
        ));
    }
}
