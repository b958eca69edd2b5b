//! Push and local notification delivery.
//!
//! Delivery is fire-and-forget: failures are logged and never fail the
//! mutation that triggered them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::remote::Notifier;

/// Notifier that records deliveries in the log. Push providers are not integrated.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn schedule_local(&self, title: &str, body: &str) -> Result<(), AppError> {
        tracing::info!(title, body, "Local notification scheduled");
        Ok(())
    }

    async fn send_remote(&self, token: &str, title: &str, body: &str) -> Result<(), AppError> {
        if token.trim().is_empty() {
            return Err(AppError::Validation("Push token is empty".to_string()));
        }
        tracing::info!(title, body, "Push notification sent");
        Ok(())
    }
}

/// Schedule a local notification without waiting for it.
pub fn dispatch_local(notifier: Arc<dyn Notifier>, title: String, body: String) {
    tokio::spawn(async move {
        if let Err(err) = notifier.schedule_local(&title, &body).await {
            tracing::warn!("Failed to schedule local notification: {}", err);
        }
    });
}

/// Send a push notification without waiting for it.
pub fn dispatch_remote(notifier: Arc<dyn Notifier>, token: String, title: String, body: String) {
    tokio::spawn(async move {
        if let Err(err) = notifier.send_remote(&token, &title, &body).await {
            tracing::warn!("Failed to send push notification: {}", err);
        }
    });
}
