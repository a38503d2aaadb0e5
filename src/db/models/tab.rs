use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One open tab as reported by the browser extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserTab {
    #[serde(default, alias = "id")]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Latest tab report for a device. `last_update` is `None` until the device
/// reports for the first time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTabs {
    pub device_id: String,
    pub tabs: Vec<BrowserTab>,
    pub last_update: Option<DateTime<Utc>>,
}

/// A close-tab command waiting for the device to poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingTabClose {
    pub tab_id: i64,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::BrowserTab;

    #[test]
    fn extension_tab_shape_is_accepted() {
        let tab: BrowserTab =
            serde_json::from_str(r#"{"id":12,"url":"https://a.com","title":"A","active":true}"#)
                .unwrap();
        assert_eq!(tab.tab_id, Some(12));
        assert_eq!(tab.title.as_deref(), Some("A"));

        let bare: BrowserTab = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.tab_id, None);
        assert!(bare.url.is_empty());
    }
}
