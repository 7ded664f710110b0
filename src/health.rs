// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Read-only liveness report for health endpoints. Probing never reconnects.

use crate::session::AmqpSession;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Connection and channel handles exist.
    pub connected: bool,
    /// Handles exist and the connection reports open.
    pub healthy: bool,
}

impl HealthStatus {
    pub async fn probe(session: &AmqpSession) -> HealthStatus {
        let connected = session.is_connected().await;
        let healthy = connected && session.is_healthy().await;
        HealthStatus { connected, healthy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::MockBrokerConnector,
        test_support::{cfg, open_channel, session_for},
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn reports_absent_session_as_down() {
        let session = AmqpSession::new(&cfg(), Arc::new(MockBrokerConnector::new()));
        let status = HealthStatus::probe(&session).await;

        assert_eq!(
            status,
            HealthStatus {
                connected: false,
                healthy: false
            }
        );
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            serde_json::json!({"connected": false, "healthy": false})
        );
    }

    #[tokio::test]
    async fn reports_ready_session_as_up() {
        let session = session_for(open_channel());
        session.ensure_ready().await.unwrap();

        let status = HealthStatus::probe(&session).await;
        assert!(status.connected && status.healthy);
    }
}
