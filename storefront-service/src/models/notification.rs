use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Order,
    Alert,
    User,
    Other,
}

impl std::fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationCategory::Order => write!(f, "order"),
            NotificationCategory::Alert => write!(f, "alert"),
            NotificationCategory::User => write!(f, "user"),
            NotificationCategory::Other => write!(f, "other"),
        }
    }
}

/// Admin-facing notification. Stored with a BSON date so that
/// newest-first listing sorts correctly in MongoDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub is_read: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}
