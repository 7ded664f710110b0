// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Mock wiring shared by the unit tests.

use crate::{
    broker::{MockBrokerChannel, MockBrokerConnection, MockBrokerConnector},
    configs::MQConfiguration,
    session::AmqpSession,
};
use lapin::BasicProperties;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

pub(crate) fn cfg() -> MQConfiguration {
    MQConfiguration::new().credentials("guest", "supersecret")
}

/// A shared flag the mocks can read while the test flips it.
#[derive(Clone, Default)]
pub(crate) struct Toggle(Arc<AtomicBool>);

impl Toggle {
    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst)
    }
}

/// A channel that always reports open and expects nothing else.
pub(crate) fn open_channel() -> MockBrokerChannel {
    let mut channel = MockBrokerChannel::new();
    channel.expect_is_closed().returning(|| false);
    channel
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub payload: Vec<u8>,
    pub properties: BasicProperties,
}

pub(crate) type PublishLog = Arc<Mutex<Vec<Published>>>;

/// An open channel recording every publish into `log`.
pub(crate) fn recording_channel(log: PublishLog) -> MockBrokerChannel {
    let mut channel = open_channel();
    channel.expect_basic_publish().returning(
        move |exchange, routing_key, options, payload, properties| {
            log.lock().unwrap().push(Published {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                mandatory: options.mandatory,
                immediate: options.immediate,
                payload: payload.to_vec(),
                properties,
            });
            Ok(())
        },
    );
    channel
}

/// A connector whose single connection stays open and yields `channel`.
pub(crate) fn connector_for(channel: MockBrokerChannel) -> MockBrokerConnector {
    let mut conn = MockBrokerConnection::new();
    conn.expect_is_closed().returning(|| false);
    conn.expect_create_channel()
        .times(1)
        .return_once(move || Ok(Arc::new(channel)));

    let mut connector = MockBrokerConnector::new();
    connector
        .expect_connect()
        .times(1)
        .return_once(move |_| Ok(Arc::new(conn)));
    connector
}

pub(crate) fn session_for(channel: MockBrokerChannel) -> Arc<AmqpSession> {
    AmqpSession::new(&cfg(), Arc::new(connector_for(channel)))
}
