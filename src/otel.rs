// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration for RabbitMQ
//!
//! Trace context travels in the message headers. The publisher injects the current
//! context, and the forwarder extracts the context of the failed delivery so that the
//! retry hop shows up in the same trace.

use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::{
    global::{self, BoxedSpan},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::collections::BTreeMap;
use tracing::error;

const TRACER_NAME: &str = "mqengine";

/// An adapter for injecting and extracting OpenTelemetry context from RabbitMQ headers.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> RabbitMQTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for RabbitMQTracePropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

impl Extractor for RabbitMQTracePropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Headers for an outgoing message carrying the trace context of `ctx`.
pub(crate) fn inject_headers(ctx: &Context) -> FieldTable {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut RabbitMQTracePropagator::new(&mut headers))
    });

    FieldTable::from(headers)
}

/// Starts a consumer-kind span parented on the trace context carried by `props`.
pub(crate) fn new_span(props: &BasicProperties, name: &str) -> BoxedSpan {
    let mut headers = props
        .headers()
        .as_ref()
        .map(|h| h.inner().clone())
        .unwrap_or_default();

    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTracePropagator::new(&mut headers))
    });

    let tracer = global::tracer(TRACER_NAME);
    tracer
        .span_builder(name.to_owned())
        .with_kind(SpanKind::Consumer)
        .start_with_context(&tracer, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::LongString;

    #[test]
    fn keys_are_lowercased_on_injection() {
        let mut headers = BTreeMap::default();
        RabbitMQTracePropagator::new(&mut headers).set("TraceParent", "00-abc".to_owned());

        assert_eq!(
            headers.get(&ShortString::from("traceparent")),
            Some(&AMQPValue::LongString(LongString::from("00-abc")))
        );
    }

    #[test]
    fn extracts_only_long_strings() {
        let mut headers = BTreeMap::default();
        headers.insert(
            ShortString::from("traceparent"),
            AMQPValue::LongString(LongString::from("00-abc")),
        );
        headers.insert(ShortString::from("X-Retry-Count"), AMQPValue::LongInt(2));

        let propagator = RabbitMQTracePropagator::new(&mut headers);
        assert_eq!(propagator.get("traceparent"), Some("00-abc"));
        assert_eq!(propagator.get("X-Retry-Count"), None);
        assert_eq!(propagator.keys().len(), 2);
    }
}
