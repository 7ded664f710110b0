// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Provisioning
//!
//! Declares, in order and failing fast:
//!
//! 1. the exchanges of the configuration,
//! 2. the main queue, bound to the policy exchange with its own name as routing key,
//! 3. the retry queue, whose `x-message-ttl` and dead-letter arguments make the broker
//!    move expired messages back to the main queue,
//! 4. the terminal dead-letter queue,
//! 5. any extra queues of the configuration, with their bindings.
//!
//! All of it must run before a consumer starts, or messages may be routed to queues
//! that do not exist yet.

use crate::{
    broker::BrokerChannel,
    configs::MQConfiguration,
    errors::TopologyError,
    exchange::ExchangeDefinition,
    queue::QueueDefinition,
    retry::RetryPolicy,
    session::AmqpSession,
};
use lapin::{options::QueueBindOptions, types::FieldTable};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct AmqpTopology {
    session: Arc<AmqpSession>,
    cfg: Arc<MQConfiguration>,
}

impl AmqpTopology {
    pub fn new(session: Arc<AmqpSession>, cfg: Arc<MQConfiguration>) -> AmqpTopology {
        AmqpTopology { session, cfg }
    }

    /// Provisions the whole topology while holding the session lock.
    pub async fn provision(&self, policy: &RetryPolicy) -> Result<(), TopologyError> {
        let ready = self.session.acquire().await?;
        let channel = ready.channel();

        for exch in self.cfg.exchange_definitions() {
            install_exchange(channel, exch).await?;
        }

        for def in retry_topology(policy)? {
            install_queue(channel, &def).await?;
        }

        for def in self.cfg.queue_definitions() {
            install_queue(channel, def).await?;
        }

        info!(
            queue = policy.main_queue(),
            retry = policy.retry_queue(),
            dlq = policy.dead_letter_queue(),
            "topology provisioned"
        );

        Ok(())
    }
}

/// The main, retry and dead-letter queue definitions for `policy`, in declare order.
pub fn retry_topology(policy: &RetryPolicy) -> Result<[QueueDefinition; 3], TopologyError> {
    let ttl = i32::try_from(policy.retry_ttl_ms())
        .map_err(|_| TopologyError::InvalidRetryTtl(policy.retry_ttl_ms()))?;

    Ok([
        QueueDefinition::new(policy.main_queue()).exchange(policy.exchange()),
        QueueDefinition::new(policy.retry_queue())
            .ttl(ttl)
            .dead_letter_to(policy.main_queue()),
        QueueDefinition::new(policy.dead_letter_queue()),
    ])
}

async fn install_exchange(
    channel: &dyn BrokerChannel,
    exch: &ExchangeDefinition,
) -> Result<(), TopologyError> {
    if exch.name().is_empty() {
        return Ok(());
    }

    debug!("creating exchange: {}", exch.name());

    match channel
        .exchange_declare(
            exch.name(),
            exch.kind.into(),
            exch.declare_options(),
            exch.arguments(),
        )
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = exch.name(),
                "error to declare the exchange"
            );
            Err(TopologyError::DeclareExchange {
                name: exch.name().to_owned(),
                reason: err.to_string(),
            })
        }
        _ => {
            debug!("exchange: {} was created", exch.name());
            Ok(())
        }
    }
}

async fn install_queue(
    channel: &dyn BrokerChannel,
    def: &QueueDefinition,
) -> Result<(), TopologyError> {
    debug!("creating queue: {}", def.name());

    if let Err(err) = channel
        .queue_declare(def.name(), def.declare_options(), def.arguments())
        .await
    {
        error!(
            error = err.to_string(),
            name = def.name(),
            "failure to declare queue"
        );
        return Err(TopologyError::DeclareQueue {
            name: def.name().to_owned(),
            reason: err.to_string(),
        });
    }
    debug!("queue: {} was created", def.name());

    let Some((exchange, routing_key)) = def.binding() else {
        return Ok(());
    };

    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        def.name(),
        exchange,
        routing_key
    );

    match channel
        .queue_bind(
            def.name(),
            exchange,
            routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");
            Err(TopologyError::BindQueue {
                queue: def.name().to_owned(),
                exchange: exchange.to_owned(),
                reason: err.to_string(),
            })
        }
        _ => Ok(()),
    }
}
