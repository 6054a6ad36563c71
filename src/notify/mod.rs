//! Fire-and-forget outbound alerts.
//!
//! `notify` enqueues and returns immediately; a background task drains the
//! queue, mirrors every alert into the log, and optionally POSTs it to a
//! webhook. Delivery failures are logged and dropped; the trading path
//! never blocks on, or fails because of, alerting.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub body: String,
}

/// Cheap cloneable handle for emitting alerts.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Alert>>,
}

impl Notifier {
    /// Spawn the drain task and return the send handle.
    pub fn spawn(webhook_url: Option<String>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Alert>();

        tokio::spawn(async move {
            let http = reqwest::Client::new();
            while let Some(alert) = rx.recv().await {
                log_alert(&alert);

                if let Some(url) = &webhook_url {
                    match http.post(url).json(&alert).send().await {
                        Ok(resp) if resp.status().is_success() => {}
                        Ok(resp) => {
                            debug!(status = %resp.status(), "Alert webhook rejected delivery")
                        }
                        Err(e) => debug!(error = %e, "Alert webhook unreachable"),
                    }
                }
            }
        });

        Self { tx: Some(tx) }
    }

    /// Handle that logs locally and delivers nowhere (tests, status CLI).
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Enqueue an alert. Never blocks; a closed channel only logs.
    pub fn notify(&self, level: AlertLevel, title: impl Into<String>, body: impl Into<String>) {
        let alert = Alert {
            level,
            title: title.into(),
            body: body.into(),
        };

        match &self.tx {
            Some(tx) => {
                if tx.send(alert.clone()).is_err() {
                    // Drain task is gone (shutdown); keep the log trail
                    log_alert(&alert);
                }
            }
            None => log_alert(&alert),
        }
    }
}

fn log_alert(alert: &Alert) {
    match alert.level {
        AlertLevel::Info => info!(target: "alert", title = %alert.title, "{}", alert.body),
        AlertLevel::Warning => warn!(target: "alert", title = %alert.title, "{}", alert.body),
        AlertLevel::Error => error!(target: "alert", title = %alert.title, "{}", alert.body),
        AlertLevel::Critical => {
            error!(target: "alert", title = %alert.title, critical = true, "{}", alert.body)
        }
    }
}
