// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry/Escalation Forwarder
//!
//! A consumer whose handler failed calls [`RetryForwarder::escalate`] instead of
//! republishing the message itself. The forwarder bumps `X-Retry-Count`, decides
//! between the caller's target (normally the retry queue) and the dead-letter queue,
//! and publishes a copy straight to that queue through the default exchange.
//!
//! The original delivery is neither acked nor nacked here. After a successful
//! escalation its headers carry the bumped `X-Retry-Count`, so escalating the same
//! delivery again keeps counting, and the caller acks it. After a failed one the
//! message was not forwarded, the delivery is left exactly as it was, and the caller
//! should nack it or leave it unacked.

use crate::{
    errors::{ConnectionError, ForwardError},
    otel,
    retry::{plan_escalation, Escalation, RetryPolicy},
    session::AmqpSession,
};
use lapin::{message::Delivery, options::BasicPublishOptions, BasicProperties};
use opentelemetry::trace::{Span, Status};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Publishing to the default exchange delivers straight to the queue named by the
/// routing key.
const DEFAULT_EXCHANGE: &str = "";

pub struct RetryForwarder {
    session: Arc<AmqpSession>,
    policy: Arc<RetryPolicy>,
}

impl RetryForwarder {
    pub fn new(session: Arc<AmqpSession>, policy: Arc<RetryPolicy>) -> RetryForwarder {
        RetryForwarder { session, policy }
    }

    /// Escalates a failed delivery towards `target`, or to the dead-letter queue once
    /// the retry budget is used up.
    pub async fn escalate(
        &self,
        delivery: &mut Delivery,
        target: &str,
    ) -> Result<Escalation, ForwardError> {
        self.escalate_message(&mut delivery.properties, &delivery.data, target)
            .await
    }

    /// Same as [`RetryForwarder::escalate`] for a message already taken apart.
    ///
    /// On success `properties` gets the headers of the forwarded copy.
    pub async fn escalate_message(
        &self,
        properties: &mut BasicProperties,
        body: &[u8],
        target: &str,
    ) -> Result<Escalation, ForwardError> {
        let mut span = otel::new_span(properties, "escalate");

        let ready = match self.session.acquire().await {
            Ok(ready) => ready,
            Err(err) => {
                error!(error = err.to_string(), "failure to ensure channel is open");
                span.record_error(&err);
                span.set_status(Status::error("channel unavailable"));
                return Err(ForwardError::from(err));
            }
        };

        let plan = plan_escalation(&self.policy, properties, target);

        if plan.dead_lettered {
            warn!(
                retry_count = plan.metadata.count,
                queue = plan.target,
                "max retry attempts reached, moving to dead letter queue"
            );
        }
        debug!(
            queue = plan.target,
            retry_count = plan.metadata.count,
            expiration = plan.properties.expiration().as_ref().map(|e| e.as_str()),
            "copying message to queue"
        );

        match ready
            .channel()
            .basic_publish(
                DEFAULT_EXCHANGE,
                &plan.target,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                body,
                plan.properties.clone(),
            )
            .await
        {
            Err(err) if err.is_unavailable() => {
                error!(
                    error = err.to_string(),
                    queue = plan.target,
                    "channel lost while copying message"
                );
                span.record_error(&err);
                span.set_status(Status::error("channel unavailable"));
                Err(ForwardError::ChannelUnavailable(ConnectionError::Lost(
                    err.to_string(),
                )))
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    queue = plan.target,
                    "failure to copy message"
                );
                span.record_error(&err);
                span.set_status(Status::error("failure to copy message"));
                Err(ForwardError::BrokerRejected {
                    queue: plan.target,
                    reason: err.to_string(),
                })
            }
            _ => {
                if let Some(headers) = plan.properties.headers() {
                    *properties = properties.clone().with_headers(headers.clone());
                }
                span.set_status(Status::Ok);
                Ok(plan)
            }
        }
    }
}
