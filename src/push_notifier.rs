// =============================================================================
// Push notifier — Pushover delivery for trigger events
// =============================================================================
//
// For every newly-created trigger event, finds the users subscribed to push
// alerts, applies each user's gating preferences, and posts a message via
// the Pushover HTTP API. Delivery to one user never blocks or fails delivery
// to the rest, and a cache-backed idempotency guard stops the same event
// from notifying the same user twice (e.g. if the tick loop overlaps).
// =============================================================================

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cache::CacheStore;
use crate::stores::PreferenceStore;
use crate::types::{ReasonTag, TriggerEvent, UserScannerSettings};

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(6 * 3600);
const PUSH_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PushNotifier {
    http: reqwest::Client,
    cache: Arc<dyn CacheStore>,
    preferences: Arc<dyn PreferenceStore>,
    app_token: String,
}

impl PushNotifier {
    pub fn new(cache: Arc<dyn CacheStore>, preferences: Arc<dyn PreferenceStore>, app_token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PUSH_HTTP_TIMEOUT)
            .build()
            .expect("reqwest client build with a fixed timeout cannot fail");
        Self { http, cache, preferences, app_token }
    }

    /// Notify every eligible, gated-in user about `event`. Logs and
    /// continues past individual failures rather than aborting the batch.
    pub async fn notify(&self, event: &TriggerEvent) {
        if self.app_token.is_empty() {
            return;
        }

        let candidates = match self.preferences.pushover_candidates(event.triggered_at).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to load pushover candidates");
                return;
            }
        };

        for settings in candidates {
            if !gate_passes(&settings, event) {
                continue;
            }

            let idempotency_key = format!("scanner:pushover:sent:{}:{}", event.id, settings.user_id);
            match self.cache.add(&idempotency_key, "1", IDEMPOTENCY_TTL).await {
                Ok(false) => continue, // already sent
                Ok(true) => {}
                Err(e) => {
                    warn!(error = %e, "idempotency check failed — sending anyway");
                }
            }

            if let Err(e) = self.send_one(&settings, event).await {
                error!(user_id = settings.user_id, error = %e, "pushover delivery failed");
            } else {
                info!(user_id = settings.user_id, event_id = %event.id, "pushover notification sent");
            }
        }
    }

    async fn send_one(&self, settings: &UserScannerSettings, event: &TriggerEvent) -> anyhow::Result<()> {
        let title = format!("{} ignition", event.symbol);
        let message = format_message(event);

        let mut form: Vec<(&str, String)> = vec![
            ("token", self.app_token.clone()),
            ("user", settings.pushover_user_key.clone()),
            ("title", title),
            ("message", message),
            ("priority", settings.pushover_priority.to_string()),
        ];
        if let Some(device) = &settings.pushover_device {
            form.push(("device", device.clone()));
        }
        if let Some(sound) = &settings.pushover_sound {
            form.push(("sound", sound.clone()));
        }

        let response = self.http.post(PUSHOVER_URL).form(&form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("pushover returned {status}: {body}");
        }
        Ok(())
    }
}

fn gate_passes(settings: &UserScannerSettings, event: &TriggerEvent) -> bool {
    if settings.notify_only_hod_break && !is_hod_break(event) {
        return false;
    }
    if let Some(min_score) = settings.notify_min_score {
        if event.metrics.score < min_score {
            return false;
        }
    }
    true
}

fn is_hod_break(event: &TriggerEvent) -> bool {
    event.metrics.broke_hod || event.reason_tags.contains(&ReasonTag::HodBreak)
}

fn format_message(event: &TriggerEvent) -> String {
    format!(
        "Px {:.2} | %1m {:.2} | %5m {:.2}\nrVol1m {:.2} | rVol5m {:.2}\nScore: {:.1}\nWhy: {}",
        event.bar.c,
        event.metrics.pct_change_1m,
        event.metrics.pct_change_5m,
        event.metrics.rvol_1m,
        event.metrics.rvol_5m,
        event.metrics.score,
        event
            .reason_tags
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    )
}
