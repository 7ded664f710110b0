// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Publishes new messages into the topology: to the policy exchange, routed by the
//! main queue name. The publish itself is never retried here; on failure the caller
//! decides what to do.

use crate::{
    errors::{ConnectionError, PublishError},
    otel,
    retry::RetryPolicy,
    session::AmqpSession,
};
use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties};
use opentelemetry::Context;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

pub struct RabbitMQPublisher {
    session: Arc<AmqpSession>,
    policy: Arc<RetryPolicy>,
}

impl RabbitMQPublisher {
    pub fn new(session: Arc<AmqpSession>, policy: Arc<RetryPolicy>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { session, policy })
    }

    /// Publishes `body` and returns it once the broker has taken it.
    ///
    /// The message gets a fresh message id, the current time as timestamp and the
    /// current trace context in its headers. An empty content type falls back to
    /// [`JSON_CONTENT_TYPE`].
    pub async fn publish(
        &self,
        body: &str,
        app_id: &str,
        content_type: &str,
        correlation_id: &str,
    ) -> Result<String, PublishError> {
        let ready = self.session.acquire().await.map_err(|err| {
            error!(error = err.to_string(), "failure to ensure channel is open");
            PublishError::from(err)
        })?;

        let content_type = if content_type.is_empty() {
            JSON_CONTENT_TYPE
        } else {
            content_type
        };

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(content_type))
            .with_correlation_id(ShortString::from(correlation_id))
            .with_app_id(ShortString::from(app_id))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_timestamp(unix_now())
            .with_headers(otel::inject_headers(&Context::current()));

        info!(
            exchange = self.policy.exchange(),
            queue = self.policy.main_queue(),
            "sending message to queue"
        );

        match ready
            .channel()
            .basic_publish(
                self.policy.exchange(),
                self.policy.main_queue(),
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                body.as_bytes(),
                properties,
            )
            .await
        {
            Err(err) if err.is_unavailable() => {
                error!(error = err.to_string(), "channel lost while publishing message");
                Err(PublishError::ChannelUnavailable(ConnectionError::Lost(
                    err.to_string(),
                )))
            }
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(PublishError::BrokerRejected(err.to_string()))
            }
            _ => {
                debug!(correlation_id, "message published");
                Ok(body.to_owned())
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::{MockBrokerConnection, MockBrokerConnector},
        errors::{AmqpError, ConnectionError},
        test_support::{cfg, open_channel, recording_channel, session_for, PublishLog, Toggle},
    };

    fn policy() -> Arc<RetryPolicy> {
        Arc::new(RetryPolicy::with_conventional_names(
            "orders-ex",
            "orders",
            5000,
            3,
        ))
    }

    #[tokio::test]
    async fn publishes_to_the_exchange_routed_by_main_queue() {
        let log = PublishLog::default();
        let publisher = RabbitMQPublisher::new(session_for(recording_channel(log.clone())), policy());

        let body = publisher
            .publish(r#"{"id":1}"#, "billing", "application/json", "corr-1")
            .await
            .unwrap();
        assert_eq!(body, r#"{"id":1}"#);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let sent = &log[0];
        assert_eq!(sent.exchange, "orders-ex");
        assert_eq!(sent.routing_key, "orders");
        assert!(!sent.mandatory);
        assert!(!sent.immediate);
        assert_eq!(sent.payload, br#"{"id":1}"#.to_vec());
        assert_eq!(
            sent.properties.correlation_id(),
            &Some(ShortString::from("corr-1"))
        );
        assert_eq!(sent.properties.app_id(), &Some(ShortString::from("billing")));
        assert!(sent.properties.message_id().is_some());
        assert!(sent.properties.headers().is_some());
    }

    #[tokio::test]
    async fn empty_content_type_defaults_to_json() {
        let log = PublishLog::default();
        let publisher = RabbitMQPublisher::new(session_for(recording_channel(log.clone())), policy());

        publisher.publish("{}", "billing", "", "corr-2").await.unwrap();

        assert_eq!(
            log.lock().unwrap()[0].properties.content_type(),
            &Some(ShortString::from(JSON_CONTENT_TYPE))
        );
    }

    #[tokio::test]
    async fn broker_rejection_is_reported() {
        let mut channel = open_channel();
        channel
            .expect_basic_publish()
            .times(1)
            .returning(|_, _, _, _, _| Err(AmqpError::PublishNacked));

        let publisher = RabbitMQPublisher::new(session_for(channel), policy());
        let err = publisher.publish("{}", "billing", "", "corr-3").await.unwrap_err();

        assert!(matches!(err, PublishError::BrokerRejected(_)));
    }

    #[tokio::test]
    async fn channel_closed_mid_publish_is_unavailable() {
        let mut channel = open_channel();
        channel
            .expect_basic_publish()
            .times(1)
            .returning(|_, _, _, _, _| Err(AmqpError::ChannelError("closed".to_owned())));

        let publisher = RabbitMQPublisher::new(session_for(channel), policy());
        let err = publisher.publish("{}", "billing", "", "corr-5").await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::ChannelUnavailable(ConnectionError::Lost(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_channel_error() {
        let mut connector = MockBrokerConnector::new();
        connector
            .expect_connect()
            .returning(|_| Err(AmqpError::ConnectionError("refused".to_owned())));

        let publisher = RabbitMQPublisher::new(
            crate::session::AmqpSession::new(&cfg(), Arc::new(connector)),
            policy(),
        );
        let err = publisher.publish("{}", "billing", "", "corr-4").await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::ChannelUnavailable(ConnectionError::DialFailed { .. })
        ));
    }

    #[tokio::test]
    async fn reconnects_transparently_when_the_connection_closed() {
        let closed = Toggle::default();
        let log = PublishLog::default();

        let mut first = MockBrokerConnection::new();
        let flag = closed.clone();
        first.expect_is_closed().returning(move || flag.get());
        first
            .expect_create_channel()
            .times(1)
            .return_once(|| Ok(Arc::new(open_channel())));

        let mut second = MockBrokerConnection::new();
        second.expect_is_closed().returning(|| false);
        let channel = recording_channel(log.clone());
        second
            .expect_create_channel()
            .times(1)
            .return_once(move || Ok(Arc::new(channel)));

        let mut connector = MockBrokerConnector::new();
        let mut seq = mockall::Sequence::new();
        connector
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_| Ok(Arc::new(first)));
        connector
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_| Ok(Arc::new(second)));

        let session = crate::session::AmqpSession::new(&cfg(), Arc::new(connector));
        session.ensure_ready().await.unwrap();
        closed.set(true);

        let publisher = RabbitMQPublisher::new(session, policy());
        publisher.publish("{}", "billing", "", "corr-5").await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
