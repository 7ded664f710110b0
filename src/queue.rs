// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Declarative description of a queue to provision: its declare flags, its argument
//! table and the exchange it is bound to, if any.

use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
};
use std::collections::BTreeMap;

/// Queue argument carrying the per-queue message TTL
pub const AMQP_ARGS_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument naming the exchange expired messages are dead-lettered to
pub const AMQP_ARGS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument naming the routing key used when dead-lettering
pub const AMQP_ARGS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// Queues are durable, not auto-deleted and not exclusive unless told otherwise.
/// When `exchange` is set the queue is bound to it with `routing_key`, falling back
/// to the queue name when no routing key was given.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) exchange: Option<String>,
    pub(crate) routing_key: Option<String>,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) no_wait: bool,
    pub(crate) params: BTreeMap<ShortString, AMQPValue>,
}

impl QueueDefinition {
    /// Creates a durable queue definition with the given name.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A durable, unbound queue definition without arguments
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            exchange: None,
            routing_key: None,
            durable: true,
            delete: false,
            exclusive: false,
            no_wait: false,
            params: BTreeMap::default(),
        }
    }

    /// Binds the queue to `exchange`. The default exchange (`""`) is never bound to.
    ///
    /// # Parameters
    /// * `exchange` - The name of the exchange
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = Some(exchange.to_owned());
        self
    }

    /// Sets the routing key of the binding. Without one the queue name is used.
    ///
    /// # Parameters
    /// * `key` - The routing key
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = Some(key.to_owned());
        self
    }

    /// Whether the queue survives broker restarts. Queues are durable by default.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Declares without waiting for the broker's answer.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    /// Replaces the whole argument table.
    pub fn params(mut self, params: BTreeMap<ShortString, AMQPValue>) -> Self {
        self.params = params;
        self
    }

    /// Adds a single queue argument.
    pub fn param(mut self, key: &str, value: AMQPValue) -> Self {
        self.params.insert(ShortString::from(key), value);
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue through `x-message-ttl`.
    ///
    /// # Parameters
    /// * `ttl` - TTL in milliseconds
    ///
    /// # Returns
    /// Self for method chaining
    pub fn ttl(self, ttl: i32) -> Self {
        self.param(AMQP_ARGS_MESSAGE_TTL, AMQPValue::LongInt(LongInt::from(ttl)))
    }

    /// Dead-letters expired or rejected messages straight into `queue` through the
    /// default exchange.
    pub fn dead_letter_to(self, queue: &str) -> Self {
        self.param(
            AMQP_ARGS_DEAD_LETTER_EXCHANGE,
            AMQPValue::LongString(LongString::from("")),
        )
        .param(
            AMQP_ARGS_DEAD_LETTER_ROUTING_KEY,
            AMQPValue::LongString(LongString::from(queue)),
        )
    }

    /// The name of the queue.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The exchange and routing key this queue is bound with, if it is bound at all.
    pub fn binding(&self) -> Option<(&str, &str)> {
        match self.exchange.as_deref() {
            Some(exchange) if !exchange.is_empty() => Some((
                exchange,
                self.routing_key
                    .as_deref()
                    .filter(|key| !key.is_empty())
                    .unwrap_or(&self.name),
            )),
            _ => None,
        }
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: false,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.delete,
            nowait: self.no_wait,
        }
    }

    pub(crate) fn arguments(&self) -> FieldTable {
        FieldTable::from(self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_a_durable_unbound_queue() {
        let def = QueueDefinition::new("orders");

        let options = def.declare_options();
        assert!(options.durable);
        assert!(!options.auto_delete);
        assert!(!options.exclusive);
        assert!(!options.nowait);
        assert_eq!(def.binding(), None);
        assert!(def.arguments().inner().is_empty());
    }

    #[test]
    fn binding_falls_back_to_the_queue_name() {
        let def = QueueDefinition::new("orders").exchange("orders-ex");
        assert_eq!(def.binding(), Some(("orders-ex", "orders")));

        let def = def.routing_key("orders.*");
        assert_eq!(def.binding(), Some(("orders-ex", "orders.*")));
    }

    #[test]
    fn default_exchange_is_never_bound() {
        let def = QueueDefinition::new("audit").exchange("").routing_key("audit");
        assert_eq!(def.binding(), None);
    }

    #[test]
    fn dead_letter_to_routes_through_the_default_exchange() {
        let def = QueueDefinition::new("orders.retry")
            .ttl(5000)
            .dead_letter_to("orders");
        let args = def.arguments();

        assert_eq!(
            args.inner().get(AMQP_ARGS_MESSAGE_TTL),
            Some(&AMQPValue::LongInt(5000))
        );
        assert_eq!(
            args.inner().get(AMQP_ARGS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from("")))
        );
        assert_eq!(
            args.inner().get(AMQP_ARGS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from("orders")))
        );
    }
}
