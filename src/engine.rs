// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # MQ Engine
//!
//! Wires one [`AmqpSession`] into the topology, publisher, consumer and forwarder.
//! Build one engine per process and pass it, or an `Arc` of it, to whoever needs the
//! broker.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use mqengine::{engine::MQEngine, settings::SettingsLoader};
//!
//! let settings = SettingsLoader::new("MQ").load()?;
//! mqengine::logging::init(&settings.logging);
//!
//! let engine = MQEngine::from_settings(&settings);
//! engine.connect().await?;
//! engine.publish(r#"{"id":1}"#, "billing", "application/json", "corr-1").await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    broker::{BrokerConnector, DeliveryStream},
    channel::LapinConnector,
    configs::MQConfiguration,
    consumer::RabbitMQConsumer,
    errors::{ConnectionError, ConsumeError, ForwardError, PersistError, PublishError, TopologyError},
    forwarder::RetryForwarder,
    health::HealthStatus,
    persist,
    publisher::RabbitMQPublisher,
    retry::{Escalation, RetryPolicy},
    session::AmqpSession,
    settings::EngineSettings,
    topology::AmqpTopology,
};
use lapin::{message::Delivery, BasicProperties};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

pub struct MQEngine {
    cfg: Arc<MQConfiguration>,
    policy: Arc<RetryPolicy>,
    session: Arc<AmqpSession>,
    topology: AmqpTopology,
    publisher: Arc<RabbitMQPublisher>,
    consumer: RabbitMQConsumer,
    forwarder: RetryForwarder,
}

impl MQEngine {
    pub fn new(
        cfg: MQConfiguration,
        policy: RetryPolicy,
        connector: Arc<dyn BrokerConnector>,
    ) -> MQEngine {
        let cfg = Arc::new(cfg);
        let policy = Arc::new(policy);
        let session = AmqpSession::new(&cfg, connector);

        MQEngine {
            topology: AmqpTopology::new(session.clone(), cfg.clone()),
            publisher: RabbitMQPublisher::new(session.clone(), policy.clone()),
            consumer: RabbitMQConsumer::new(session.clone()),
            forwarder: RetryForwarder::new(session.clone(), policy.clone()),
            cfg,
            policy,
            session,
        }
    }

    /// An engine talking to RabbitMQ through lapin.
    pub fn with_lapin(cfg: MQConfiguration, policy: RetryPolicy) -> MQEngine {
        let connector = Arc::new(LapinConnector::new(&cfg));
        MQEngine::new(cfg, policy, connector)
    }

    pub fn from_settings(settings: &EngineSettings) -> MQEngine {
        MQEngine::with_lapin(settings.mq_configuration(), settings.retry_policy())
    }

    pub fn configuration(&self) -> &MQConfiguration {
        &self.cfg
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn session(&self) -> &Arc<AmqpSession> {
        &self.session
    }

    /// Connects and provisions the topology. Run it once at startup, before any
    /// consumer; a failure here usually means the service should not start.
    pub async fn connect(&self) -> Result<(), TopologyError> {
        info!(
            host = %self.cfg.host,
            port = self.cfg.port,
            vhost = %self.cfg.vhost,
            "connecting to rabbitmq"
        );
        self.topology.provision(&self.policy).await
    }

    pub async fn ensure_ready(&self) -> Result<(), ConnectionError> {
        self.session.ensure_ready().await
    }

    pub async fn publish(
        &self,
        body: &str,
        app_id: &str,
        content_type: &str,
        correlation_id: &str,
    ) -> Result<String, PublishError> {
        self.publisher
            .publish(body, app_id, content_type, correlation_id)
            .await
    }

    pub fn publisher(&self) -> Arc<RabbitMQPublisher> {
        self.publisher.clone()
    }

    pub async fn consume(&self, queue: &str, auto_ack: bool) -> Result<DeliveryStream, ConsumeError> {
        self.consumer.consume(queue, auto_ack).await
    }

    /// Forwards a failed delivery to `target` or the dead-letter queue. On success the
    /// delivery's headers carry the new retry count.
    pub async fn escalate(&self, delivery: &mut Delivery, target: &str) -> Result<Escalation, ForwardError> {
        self.forwarder.escalate(delivery, target).await
    }

    /// Escalates towards the retry queue of the policy.
    pub async fn escalate_to_retry(&self, delivery: &mut Delivery) -> Result<Escalation, ForwardError> {
        self.forwarder
            .escalate(delivery, self.policy.retry_queue())
            .await
    }

    pub async fn escalate_message(
        &self,
        properties: &mut BasicProperties,
        body: &[u8],
        target: &str,
    ) -> Result<Escalation, ForwardError> {
        self.forwarder.escalate_message(properties, body, target).await
    }

    /// Dumps a delivery into `dir`, named after its correlation id.
    pub fn save_delivery(&self, dir: &Path, delivery: &Delivery) -> Result<(PathBuf, PathBuf), PersistError> {
        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str())
            .unwrap_or_default();

        persist::save_message_to_file(
            dir,
            correlation_id,
            &delivery.data,
            delivery.properties.headers().as_ref(),
        )
    }

    pub async fn close(&self) -> Result<(), ConnectionError> {
        self.session.close().await
    }

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    pub async fn is_healthy(&self) -> bool {
        self.session.is_healthy().await
    }

    pub async fn health(&self) -> HealthStatus {
        HealthStatus::probe(&self.session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::{MockBrokerConnection, MockBrokerConnector},
        retry::X_RETRY_COUNT,
        test_support::{connector_for, recording_channel, PublishLog},
    };
    use lapin::types::AMQPValue;

    fn policy() -> RetryPolicy {
        RetryPolicy::with_conventional_names("orders-ex", "orders", 30_000, 3)
    }

    #[tokio::test]
    async fn one_session_serves_every_component() {
        let log = PublishLog::default();
        let mut channel = recording_channel(log.clone());
        channel.expect_queue_declare().times(3).returning(|_, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let engine = MQEngine::new(
            MQConfiguration::new(),
            policy(),
            Arc::new(connector_for(channel)),
        );
        assert!(!engine.is_connected().await);

        engine.connect().await.unwrap();
        engine.publish("{}", "billing", "", "corr-1").await.unwrap();
        let mut props = BasicProperties::default();
        let plan = engine
            .escalate_message(&mut props, b"{}", "orders.retry")
            .await
            .unwrap();

        assert_eq!(plan.target, "orders.retry");
        assert!(engine.health().await.healthy);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].exchange, "orders-ex");
        assert_eq!(
            log[1]
                .properties
                .headers()
                .as_ref()
                .and_then(|h| h.inner().get(X_RETRY_COUNT).cloned()),
            Some(AMQPValue::LongInt(1))
        );
    }

    #[tokio::test]
    async fn close_then_publish_reconnects() {
        let log = PublishLog::default();

        let mut first_channel = recording_channel(log.clone());
        first_channel.expect_close().times(1).returning(|| Ok(()));
        let mut first = MockBrokerConnection::new();
        first.expect_is_closed().returning(|| false);
        first.expect_close().times(1).returning(|| Ok(()));
        first
            .expect_create_channel()
            .times(1)
            .return_once(move || Ok(Arc::new(first_channel)));

        let second_channel = recording_channel(log.clone());
        let mut second = MockBrokerConnection::new();
        second.expect_is_closed().returning(|| false);
        second
            .expect_create_channel()
            .times(1)
            .return_once(move || Ok(Arc::new(second_channel)));

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

        let engine = MQEngine::new(MQConfiguration::new(), policy(), Arc::new(connector));
        engine.publish("a", "billing", "", "corr-1").await.unwrap();
        engine.close().await.unwrap();
        assert!(!engine.is_healthy().await);

        engine.publish("b", "billing", "", "corr-2").await.unwrap();
        assert!(engine.is_healthy().await);
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
