// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! RabbitMQ messaging engine with a delayed retry queue and a terminal dead-letter
//! queue. Start from [`engine::MQEngine`].

mod otel;

#[cfg(test)]
mod test_support;

pub mod broker;
pub mod channel;
pub mod configs;
pub mod consumer;
pub mod engine;
pub mod errors;
pub mod exchange;
pub mod forwarder;
pub mod health;
pub mod logging;
pub mod persist;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod session;
pub mod settings;
pub mod topology;
