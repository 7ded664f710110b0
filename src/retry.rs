// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry Metadata and Escalation Policy
//!
//! A failed message travels main queue -> retry queue -> main queue ... until it has
//! used up its retry budget, after which it lands in the dead-letter queue. The
//! bookkeeping rides in two message headers:
//!
//! - `X-Retry-Count`: how many times the message was escalated (absent means 0).
//! - `X-Retry-TTL`: caller supplied backoff in milliseconds.
//!
//! [`RetryMetadata`] is the typed view of those headers and [`plan_escalation`] is the
//! decision the forwarder publishes.

use lapin::{
    types::{AMQPValue, FieldTable, LongInt, ShortString},
    BasicProperties,
};

/// Header counting the escalations of a message
pub const X_RETRY_COUNT: &str = "X-Retry-Count";
/// Header carrying the backoff, in milliseconds, to hold the message in the retry queue
pub const X_RETRY_TTL: &str = "X-Retry-TTL";

/// Queue names and retry budget for one main queue.
///
/// A message is allowed exactly `max_attempts` passes through the retry queue; the
/// escalation after that routes it to the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub(crate) exchange: String,
    pub(crate) main_queue: String,
    pub(crate) retry_queue: String,
    pub(crate) dead_letter_queue: String,
    pub(crate) retry_ttl_ms: u32,
    pub(crate) max_attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy with explicit queue names.
    ///
    /// # Parameters
    /// * `exchange` - Exchange the main queue is bound to, `""` for the default exchange
    /// * `main_queue` - Queue consumers read from
    /// * `retry_queue` - Queue holding failed messages until their TTL expires
    /// * `dead_letter_queue` - Terminal queue for messages out of retries
    /// * `retry_ttl_ms` - `x-message-ttl` of the retry queue, in milliseconds
    /// * `max_attempts` - Passes through the retry queue allowed per message
    ///
    /// # Returns
    /// The retry policy
    pub fn new(
        exchange: &str,
        main_queue: &str,
        retry_queue: &str,
        dead_letter_queue: &str,
        retry_ttl_ms: u32,
        max_attempts: u32,
    ) -> RetryPolicy {
        RetryPolicy {
            exchange: exchange.to_owned(),
            main_queue: main_queue.to_owned(),
            retry_queue: retry_queue.to_owned(),
            dead_letter_queue: dead_letter_queue.to_owned(),
            retry_ttl_ms,
            max_attempts,
        }
    }

    /// Uses `<main>.retry` and `<main>.dlq` for the retry and dead-letter queues.
    pub fn with_conventional_names(
        exchange: &str,
        main_queue: &str,
        retry_ttl_ms: u32,
        max_attempts: u32,
    ) -> RetryPolicy {
        RetryPolicy::new(
            exchange,
            main_queue,
            &format!("{main_queue}.retry"),
            &format!("{main_queue}.dlq"),
            retry_ttl_ms,
            max_attempts,
        )
    }

    /// Exchange new messages are published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Queue consumers read from, also the routing key of new messages.
    pub fn main_queue(&self) -> &str {
        &self.main_queue
    }

    /// Default target of an escalation.
    pub fn retry_queue(&self) -> &str {
        &self.retry_queue
    }

    /// Target of an escalation once the budget is used up.
    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter_queue
    }

    /// Delay a message spends in the retry queue, in milliseconds.
    pub fn retry_ttl_ms(&self) -> u32 {
        self.retry_ttl_ms
    }

    /// Passes through the retry queue allowed before dead-lettering.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a message carrying `retry_count` has used up its budget.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        u64::from(retry_count) >= u64::from(self.max_attempts) + 1
    }
}

/// Typed view of the retry headers of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryMetadata {
    pub count: u32,
    pub ttl_ms: Option<u32>,
}

impl RetryMetadata {
    /// Reads the retry headers. Integers of any width and decimal strings are
    /// accepted; values above `u32::MAX` are clamped to it so a count never goes
    /// back down. Negative or unparsable values count as absent.
    pub fn from_headers(headers: Option<&FieldTable>) -> RetryMetadata {
        let Some(headers) = headers else {
            return RetryMetadata::default();
        };

        let read = |key: &str| {
            headers
                .inner()
                .get(key)
                .and_then(header_integer)
                .filter(|value| *value >= 0)
                .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
        };

        RetryMetadata {
            count: read(X_RETRY_COUNT).unwrap_or_default(),
            ttl_ms: read(X_RETRY_TTL),
        }
    }

    /// The metadata after one more escalation.
    pub fn escalated(self) -> RetryMetadata {
        RetryMetadata {
            count: self.count.saturating_add(1),
            ..self
        }
    }

    /// Writes the retry count into `headers` as a 32 bit integer. The TTL header is
    /// left as the caller set it.
    pub fn write_count(&self, headers: &mut FieldTable) {
        let count = i32::try_from(self.count).unwrap_or(i32::MAX);
        headers.insert(
            ShortString::from(X_RETRY_COUNT),
            AMQPValue::LongInt(LongInt::from(count)),
        );
    }

    /// The per-message expiration for a retry hop, if the caller asked for one.
    pub fn expiration(&self) -> Option<String> {
        self.ttl_ms.filter(|ttl| *ttl > 0).map(|ttl| ttl.to_string())
    }
}

fn header_integer(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongLongInt(v) => Some(*v),
        AMQPValue::ShortString(v) => parse_integer(v.as_str()),
        AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes())
            .ok()
            .and_then(parse_integer),
        _ => None,
    }
}

/// Decimal digits too large for an `i64` still read as a (clamped) positive count.
fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<u128>()
            .ok()
            .map(|value| i64::try_from(value).unwrap_or(i64::MAX))
    })
}

/// Where and how a failed message is republished.
#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    /// Queue the message is published to through the default exchange.
    pub target: String,
    pub metadata: RetryMetadata,
    /// The message ran out of retries and goes to the dead-letter queue.
    pub dead_lettered: bool,
    pub properties: BasicProperties,
}

/// Decides the next hop of a failed message and builds its outgoing properties.
///
/// The incoming properties are only read. The outgoing message keeps content type,
/// correlation id, app id, reply-to, message id, timestamp and delivery mode, gets a
/// copy of the headers with the retry count bumped by one, and carries an expiration
/// only while it still has retries left and the caller set a positive `X-Retry-TTL`.
pub fn plan_escalation(
    policy: &RetryPolicy,
    properties: &BasicProperties,
    target: &str,
) -> Escalation {
    let metadata = RetryMetadata::from_headers(properties.headers().as_ref()).escalated();

    let mut headers = properties.headers().clone().unwrap_or_default();
    metadata.write_count(&mut headers);

    let dead_lettered = policy.is_exhausted(metadata.count);
    let (target, expiration) = if dead_lettered {
        (policy.dead_letter_queue.clone(), None)
    } else {
        (target.to_owned(), metadata.expiration())
    };

    let mut outgoing = BasicProperties::default().with_headers(headers);
    if let Some(value) = properties.content_type() {
        outgoing = outgoing.with_content_type(value.clone());
    }
    if let Some(value) = properties.correlation_id() {
        outgoing = outgoing.with_correlation_id(value.clone());
    }
    if let Some(value) = properties.app_id() {
        outgoing = outgoing.with_app_id(value.clone());
    }
    if let Some(value) = properties.reply_to() {
        outgoing = outgoing.with_reply_to(value.clone());
    }
    if let Some(value) = properties.message_id() {
        outgoing = outgoing.with_message_id(value.clone());
    }
    if let Some(value) = properties.timestamp() {
        outgoing = outgoing.with_timestamp(*value);
    }
    if let Some(value) = properties.delivery_mode() {
        outgoing = outgoing.with_delivery_mode(*value);
    }
    if let Some(value) = expiration {
        outgoing = outgoing.with_expiration(ShortString::from(value));
    }

    Escalation {
        target,
        metadata,
        dead_lettered,
        properties: outgoing,
    }
}
