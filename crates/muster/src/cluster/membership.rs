//! Delivery of bootstrap decisions to the membership subsystem.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use muster_common::MusterError;

use crate::config::{MembershipConfig, MembershipKind};

/// Operations the owning membership subsystem exposes to bootstrap.
///
/// Each is invoked at most once per decided session.
#[async_trait]
pub trait Membership: Send + Sync {
    async fn join_seed_nodes(&self, seed_nodes: &[String]) -> Result<(), MusterError>;

    async fn initiate_new_cluster(&self, self_address: &str) -> Result<(), MusterError>;
}

/// Records decisions as structured log events
#[derive(Debug, Default)]
pub struct LogMembership;

#[async_trait]
impl Membership for LogMembership {
    async fn join_seed_nodes(&self, seed_nodes: &[String]) -> Result<(), MusterError> {
        tracing::info!(seed_nodes = ?seed_nodes, "Joining existing cluster");
        Ok(())
    }

    async fn initiate_new_cluster(&self, self_address: &str) -> Result<(), MusterError> {
        tracing::info!(self_address = %self_address, "Initiating new cluster");
        Ok(())
    }
}

/// Body POSTed to the webhook
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum WebhookAction<'a> {
    Join {
        #[serde(rename = "seedNodes")]
        seed_nodes: &'a [String],
    },
    Initiate {
        #[serde(rename = "self")]
        self_address: &'a str,
    },
}

/// POSTs decisions to the owning process
#[derive(Debug, Clone)]
pub struct WebhookMembership {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookMembership {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    async fn deliver(&self, action: WebhookAction<'_>) -> Result<(), MusterError> {
        self.client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&action)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| MusterError::Membership(format!("webhook {} failed: {e}", self.url)))?;

        tracing::info!(url = %self.url, action = ?action, "Bootstrap decision delivered");
        Ok(())
    }
}

#[async_trait]
impl Membership for WebhookMembership {
    async fn join_seed_nodes(&self, seed_nodes: &[String]) -> Result<(), MusterError> {
        self.deliver(WebhookAction::Join { seed_nodes }).await
    }

    async fn initiate_new_cluster(&self, self_address: &str) -> Result<(), MusterError> {
        self.deliver(WebhookAction::Initiate { self_address }).await
    }
}

/// Membership collaborator selected by `membership.kind`
pub fn from_config(config: &MembershipConfig) -> Result<Arc<dyn Membership>, MusterError> {
    match config.kind {
        MembershipKind::Log => Ok(Arc::new(LogMembership)),
        MembershipKind::Webhook => {
            let url = config
                .webhook_url
                .as_deref()
                .ok_or_else(|| MusterError::Config("membership.webhook-url is required".to_string()))?;
            Ok(Arc::new(WebhookMembership::new(url, config.request_timeout)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    async fn capture_server(status: StatusCode) -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route(
                "/decision",
                post(
                    move |State(tx): State<mpsc::UnboundedSender<serde_json::Value>>,
                          Json(body): Json<serde_json::Value>| async move {
                        let _ = tx.send(body);
                        status
                    },
                ),
            )
            .with_state(tx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/decision", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, rx)
    }

    #[tokio::test]
    async fn test_webhook_payloads() {
        let (url, mut rx) = capture_server(StatusCode::OK).await;
        let membership = WebhookMembership::new(url, Duration::from_secs(2));

        assert_ok!(membership.join_seed_nodes(&["10.0.0.1:2552".to_string()]).await);
        assert_eq!(
            rx.recv().await.unwrap(),
            serde_json::json!({"action": "join", "seedNodes": ["10.0.0.1:2552"]})
        );

        assert_ok!(membership.initiate_new_cluster("10.0.0.2:2552").await);
        assert_eq!(
            rx.recv().await.unwrap(),
            serde_json::json!({"action": "initiate", "self": "10.0.0.2:2552"})
        );
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_membership_error() {
        let (url, _rx) = capture_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let membership = WebhookMembership::new(url, Duration::from_secs(2));

        let result = membership.initiate_new_cluster("a").await;
        assert!(matches!(result, Err(MusterError::Membership(_))));

        assert_err!(membership.join_seed_nodes(&[]).await);
    }

    #[test]
    fn test_from_config() {
        assert_ok!(from_config(&MembershipConfig::default()));

        let webhook = MembershipConfig {
            kind: MembershipKind::Webhook,
            ..Default::default()
        };
        assert!(matches!(from_config(&webhook), Err(MusterError::Config(_))));
    }
}
