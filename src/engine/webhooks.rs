//! Completion callback delivery.

use crate::types::{Event, JobId, JobStatus, WebhookPayload, WebhookResult, WebhookSummary};
use crate::utils;

use super::BatchEngine;

/// Parameters for a completion callback
pub(crate) struct NotifyParams {
    /// The finished job
    pub(crate) job_id: JobId,
    /// Where to POST the payload
    pub(crate) webhook_url: String,
    /// Terminal status (completed, partial or failed)
    pub(crate) status: JobStatus,
    /// Per-group results in processing order
    pub(crate) results: Vec<WebhookResult>,
    /// Unix timestamp of the terminal transition
    pub(crate) completed_at: i64,
}

/// Build the JSON body sent to the callback URL
pub(crate) fn build_payload(params: NotifyParams) -> (String, WebhookPayload) {
    let NotifyParams {
        job_id,
        webhook_url,
        status,
        results,
        completed_at,
    } = params;

    let success = results.iter().filter(|r| r.error.is_none()).count();
    let summary = WebhookSummary {
        total: results.len(),
        success,
        failed: results.len() - success,
    };

    let payload = WebhookPayload {
        job_id,
        status,
        results,
        summary,
        completed_at: utils::timestamp_to_datetime(completed_at),
    };

    (webhook_url, payload)
}

impl BatchEngine {
    /// Post the completion payload for a finished job
    ///
    /// Sent from a detached task (fire and forget) so a slow or unreachable
    /// receiver never holds up the worker. Bounded by the configured webhook
    /// timeout, never retried, and never changes job or group status.
    pub(crate) fn notify_completion(&self, params: NotifyParams) {
        let (url, payload) = build_payload(params);
        let timeout = self.config.notifications.webhook_timeout;
        let auth_header = self.config.notifications.auth_header.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let job_id = payload.job_id.clone();

            let client = reqwest::Client::new();
            let mut request = client.post(&url).json(&payload).timeout(timeout);

            // Add authentication header if configured
            if let Some(auth) = &auth_header {
                request = request.header("Authorization", auth);
            }

            let result = tokio::time::timeout(timeout, request.send()).await;

            // Handle webhook response
            let error_msg = match result {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        None
                    } else {
                        Some(format!(
                            "Webhook returned status {}: {}",
                            response.status(),
                            response.text().await.unwrap_or_default()
                        ))
                    }
                }
                Ok(Err(e)) => Some(format!("Failed to send webhook: {}", e)),
                Err(_) => Some(format!("Webhook timed out after {:?}", timeout)),
            };

            match error_msg {
                None => {
                    tracing::debug!(job_id = %job_id, url = %url, "webhook sent successfully");
                    event_tx
                        .send(Event::WebhookDelivered { id: job_id, url })
                        .ok();
                }
                Some(error) => {
                    tracing::warn!(job_id = %job_id, url = %url, error = %error, "webhook failed");
                    event_tx
                        .send(Event::WebhookFailed {
                            id: job_id,
                            url,
                            error,
                        })
                        .ok();
                }
            }
        });
    }
}
