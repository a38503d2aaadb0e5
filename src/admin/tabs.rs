//! Tab snapshots reported by each device's extension, and close-tab commands
//! queued by the parent for the extension to pick up.

use serde::Serialize;

use crate::{
    db::{BrowserTab, DeviceTabs, PendingTabClose, SiteRecord},
    error::{require, GateResult},
};

use super::PolicyAdmin;

/// What the extension gets back when it polls: closes queued for it plus
/// the domains currently blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabPoll {
    pub pending: Vec<PendingTabClose>,
    pub blocked_domains: Vec<String>,
}

impl PolicyAdmin {
    /// Store the device's current tabs, replacing its previous report.
    pub async fn report_tabs(&self, device_id: &str, tabs: Vec<BrowserTab>) -> GateResult<()> {
        require(device_id, "deviceId")?;
        Ok(self
            .db
            .replace_device_tabs(device_id, tabs, self.now())
            .await?)
    }

    pub async fn device_tabs(&self, device_id: &str) -> GateResult<DeviceTabs> {
        require(device_id, "deviceId")?;
        Ok(self.db.get_device_tabs(device_id).await?)
    }

    pub async fn all_device_tabs(&self) -> GateResult<Vec<DeviceTabs>> {
        Ok(self.db.get_all_device_tabs().await?)
    }

    /// Block the tab's site and, when the tab is identified, queue a close
    /// for that device.
    pub async fn close_tab(
        &self,
        device_id: Option<&str>,
        tab_id: Option<i64>,
        url: &str,
        title: Option<&str>,
    ) -> GateResult<SiteRecord> {
        let record = self.block_site(url, title).await?;

        let device_id = device_id.filter(|id| !id.trim().is_empty());
        if let (Some(device_id), Some(tab_id)) = (device_id, tab_id) {
            self.db
                .queue_tab_close(device_id, tab_id, url, self.now())
                .await?;
        }
        Ok(record)
    }

    /// Drains the device's queued closes; a second poll sees none of them.
    pub async fn poll_tab_closes(&self, device_id: &str) -> GateResult<TabPoll> {
        require(device_id, "deviceId")?;
        let pending = self.db.take_pending_tab_closes(device_id).await?;
        let blocked_domains = self
            .blocked_sites()
            .await?
            .into_iter()
            .map(|site| site.domain)
            .collect();

        Ok(TabPoll {
            pending,
            blocked_domains,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::{
        db::{Database, SiteStatus},
        engine::ManualClock,
        error::GateError,
    };

    fn admin() -> PolicyAdmin {
        PolicyAdmin::new(Database::in_memory().unwrap())
            .with_clock(Arc::new(ManualClock::new(Utc::now())))
    }

    #[tokio::test]
    async fn report_requires_a_device() {
        let admin = admin();
        assert!(matches!(
            admin.report_tabs(" ", Vec::new()).await,
            Err(GateError::InvalidArgument(_))
        ));
        assert!(matches!(
            admin.poll_tab_closes("").await,
            Err(GateError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn reported_tabs_are_listed_per_device() {
        let admin = admin();
        let tabs = vec![BrowserTab {
            tab_id: Some(3),
            url: "https://khanacademy.org".into(),
            title: Some("Khan".into()),
        }];

        admin.report_tabs("laptop", tabs.clone()).await.unwrap();

        let snapshot = admin.device_tabs("laptop").await.unwrap();
        assert_eq!(snapshot.tabs, tabs);
        assert!(snapshot.last_update.is_some());
        assert_eq!(admin.all_device_tabs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closing_a_tab_blocks_its_site_and_queues_once() {
        let admin = admin();

        admin
            .close_tab(Some("laptop"), Some(42), "https://games.com/play", Some("Games"))
            .await
            .unwrap();
        // No tab id: the site is still blocked but nothing is queued.
        admin
            .close_tab(Some("laptop"), None, "https://videos.com", None)
            .await
            .unwrap();

        assert_eq!(
            admin.site_status("https://games.com").await.unwrap(),
            SiteStatus::Blocked
        );

        let poll = admin.poll_tab_closes("laptop").await.unwrap();
        assert_eq!(
            poll.pending,
            vec![PendingTabClose {
                tab_id: 42,
                url: "https://games.com/play".into()
            }]
        );
        assert_eq!(poll.blocked_domains.len(), 2);
        assert!(poll.blocked_domains.contains(&"games.com".to_string()));

        let again = admin.poll_tab_closes("laptop").await.unwrap();
        assert!(again.pending.is_empty());
        assert_eq!(again.blocked_domains.len(), 2);
    }

    #[tokio::test]
    async fn close_without_url_is_invalid() {
        let admin = admin();
        assert!(matches!(
            admin.close_tab(Some("laptop"), Some(1), "", None).await,
            Err(GateError::InvalidArgument(_))
        ));
        assert!(admin.poll_tab_closes("laptop").await.unwrap().pending.is_empty());
    }
}
