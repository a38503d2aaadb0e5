//! The access-decision engine.
//!
//! Page checks: ban > block > device policy. Content checks: device policy >
//! channel rule > classification cache > classifier. The engine is the only
//! writer of the watch ledger and of the policy expiry correction; it never
//! mutates the site registry or channel rules.

mod clock;
mod single_flight;
mod verdict;


use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    db::{
        models::DEFAULT_HISTORY_LIMIT, AccessCheck, CachedClassification, ChannelAction,
        Database, DeviceAccess, NewWatchEntry, SiteStatus, Strictness, WatchClassification,
        WatchEntry, WatchStats,
    },
    error::{require, GateResult},
    notify::Notifier,
    oracle::{Classification, ClassificationRequest, Classifier},
};

use single_flight::InFlight;

pub use clock::{Clock, ManualClock, SystemClock};
pub use verdict::{
    format_minutes, format_remaining, minutes_until, ContentCheck, InternetStatus, Verdict,
    CHANNEL_ALLOWED, CHANNEL_BLOCKED, DECISION_TIMED_OUT,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct DecisionEngine {
    db: Database,
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    classifier_timeout: Duration,
    in_flight: InFlight,
}

impl DecisionEngine {
    pub fn new(db: Database, classifier: Arc<dyn Classifier>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            classifier,
            notifier,
            clock: Arc::new(SystemClock),
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
            in_flight: InFlight::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    /// Decide whether `url` may be opened on `device_id`.
    ///
    /// Site-level denials hold regardless of the device's internet grant and
    /// short-circuit before the policy is even read.
    pub async fn decide_page(&self, device_id: &str, url: &str) -> GateResult<Verdict> {
        require(device_id, "deviceId")?;
        require(url, "url")?;

        let (domain, status) = self.db.site_status(url).await?;
        match status {
            SiteStatus::Banned => {
                return Ok(Verdict::deny(format!("{domain} is permanently banned")));
            }
            SiteStatus::Blocked => {
                return Ok(Verdict::deny(format!("{domain} is blocked")));
            }
            SiteStatus::Clear => {}
        }

        let check = self.check_device(device_id).await?;
        Ok(match check.access.denial_reason() {
            Some(reason) => Verdict::deny(reason),
            None => Verdict::allow(),
        })
    }

    /// Decide whether a video may be watched, recording the outcome in the
    /// watch ledger. Policy denials are not recorded.
    pub async fn decide_content(&self, request: &ContentCheck) -> GateResult<Verdict> {
        require(&request.device_id, "deviceId")?;
        require(&request.content_id, "videoId")?;

        let check = self.check_device(&request.device_id).await?;
        if let Some(reason) = check.access.denial_reason() {
            return Ok(Verdict::deny(reason));
        }

        if let Some(rule) = self
            .db
            .resolve_channel_rule(&request.channel_name, request.channel_id.as_deref())
            .await?
        {
            let (allowed, reason) = match rule.action {
                ChannelAction::Allow => (true, CHANNEL_ALLOWED),
                ChannelAction::Block => (false, CHANNEL_BLOCKED),
            };
            self.record_watch(request, allowed, reason).await?;
            return Ok(Verdict::with_reason(allowed, reason));
        }

        if let Some(cached) = self.cached(&request.content_id).await? {
            return self.serve_cached(request, cached).await;
        }

        let slot = self.in_flight.acquire(&request.content_id).await;

        // Another request for the same video may have finished classifying
        // while this one waited for the slot.
        if let Some(cached) = self.cached(&request.content_id).await? {
            drop(slot);
            return self.serve_cached(request, cached).await;
        }

        let classification = self.classify(request, check.policy.strictness).await;
        self.db
            .cache_classification(
                &request.content_id,
                classification.allowed,
                &classification.reason,
                self.clock.now(),
            )
            .await?;
        drop(slot);

        self.record_watch(request, classification.allowed, &classification.reason)
            .await?;

        if !classification.allowed {
            self.notify_denial(request, &classification.reason);
        }

        Ok(Verdict::with_reason(
            classification.allowed,
            classification.reason,
        ))
    }

    /// [`Self::decide_content`] bounded by a caller deadline. An elapsed
    /// deadline resolves to a denial instead of an error.
    pub async fn decide_content_within(
        &self,
        request: &ContentCheck,
        deadline: Duration,
    ) -> GateResult<Verdict> {
        match tokio::time::timeout(deadline, self.decide_content(request)).await {
            Ok(result) => result,
            Err(_) => {
                log_warn!(
                    "content decision for {} on {} exceeded {:?}",
                    request.content_id,
                    request.device_id,
                    deadline
                );
                Ok(Verdict::deny(DECISION_TIMED_OUT))
            }
        }
    }

    /// Current internet grant for a device with a human-readable summary.
    /// Applies the same expiry correction as the decision paths.
    pub async fn internet_status(&self, device_id: &str) -> GateResult<InternetStatus> {
        require(device_id, "deviceId")?;

        let now = self.clock.now();
        let check = self.check_device(device_id).await?;
        let message = match check.access {
            DeviceAccess::Granted {
                expires_at: Some(expires_at),
            } => format_remaining(minutes_until(expires_at, now)),
            DeviceAccess::Granted { expires_at: None } => {
                "Internet access enabled (no time limit)".to_string()
            }
            DeviceAccess::Expired | DeviceAccess::Disabled => {
                "Internet access disabled".to_string()
            }
        };

        Ok(InternetStatus {
            device_id: device_id.to_string(),
            internet_allowed: check.access.is_granted(),
            expires_at: check.policy.expires_at,
            message,
        })
    }

    pub async fn watch_history(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> GateResult<Vec<WatchEntry>> {
        require(device_id, "deviceId")?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        Ok(self.db.get_watch_history(device_id, since, limit).await?)
    }

    pub async fn watch_stats(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> GateResult<WatchStats> {
        require(device_id, "deviceId")?;
        Ok(self.db.get_watch_stats(device_id, since).await?)
    }

    async fn check_device(&self, device_id: &str) -> GateResult<AccessCheck> {
        let check = self
            .db
            .resolve_device_access(device_id, self.clock.now())
            .await?;
        if check.corrected {
            log_info!("internet grant for {device_id} expired; policy disabled");
        }
        Ok(check)
    }

    async fn cached(&self, content_id: &str) -> GateResult<Option<CachedClassification>> {
        Ok(self
            .db
            .get_cached_classification(content_id, self.clock.now())
            .await?)
    }

    /// Cache hits are logged but never re-notify: the notification went out
    /// when the verdict was first produced.
    async fn serve_cached(
        &self,
        request: &ContentCheck,
        cached: CachedClassification,
    ) -> GateResult<Verdict> {
        self.record_watch(request, cached.allowed, &cached.reason)
            .await?;
        Ok(Verdict::with_reason(cached.allowed, cached.reason))
    }

    async fn classify(&self, request: &ContentCheck, strictness: Strictness) -> Classification {
        let classification_request = ClassificationRequest {
            title: request.title.clone(),
            channel_name: request.channel_name.clone(),
            description_preview: request.description_preview.clone().unwrap_or_default(),
            strictness,
        };

        match tokio::time::timeout(
            self.classifier_timeout,
            self.classifier.classify(&classification_request),
        )
        .await
        {
            Ok(Ok(classification)) => {
                log_info!(
                    "classified {} as {} ({})",
                    request.content_id,
                    WatchClassification::from_allowed(classification.allowed).as_str(),
                    classification.reason
                );
                classification
            }
            Ok(Err(err)) => {
                log_warn!("classifier failed for {}: {err}", request.content_id);
                Classification::unavailable()
            }
            Err(_) => {
                log_warn!(
                    "classifier timed out after {:?} for {}",
                    self.classifier_timeout,
                    request.content_id
                );
                Classification::unavailable()
            }
        }
    }

    async fn record_watch(
        &self,
        request: &ContentCheck,
        allowed: bool,
        reason: &str,
    ) -> GateResult<WatchEntry> {
        let entry = NewWatchEntry {
            device_id: request.device_id.clone(),
            content_id: request.content_id.clone(),
            title: request.title.clone(),
            channel_name: request.channel_name.clone(),
            channel_id: request.channel_id.clone(),
            classification: WatchClassification::from_allowed(allowed),
            reason: Some(reason.to_string()),
            watched_at: self.clock.now(),
        };
        Ok(self.db.log_watch(entry).await?)
    }

    fn notify_denial(&self, request: &ContentCheck, reason: &str) {
        let message = denial_message(request, reason);
        let notifier = Arc::clone(&self.notifier);
        let content_id = request.content_id.clone();

        tokio::spawn(async move {
            if let Err(err) = notifier.notify(&message).await {
                log_error!("failed to send denial notification for {content_id}: {err}");
            }
        });
    }
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        "Unknown"
    } else {
        value
    }
}

fn denial_message(request: &ContentCheck, reason: &str) -> String {
    let channel = or_unknown(&request.channel_name);
    format!(
        "🚫 Video Blocked\n\n\
         Title: \"{title}\"\n\
         Channel: {channel}\n\
         Reason: {reason}\n\n\
         Reply \"allow this\" to unblock, or \"allow {channel}\" to always allow this channel.",
        title = or_unknown(&request.title),
    )
}
