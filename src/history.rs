use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::comic::ComicRequest;
use crate::store::KeyValueStore;

pub const RECENT_REQUESTS_KEY: &str = "recent_requests";
pub const DAILY_USAGE_KEY: &str = "daily_usage";
pub const PRO_USER_KEY: &str = "pro_user";

pub const MAX_RECENT_REQUESTS: usize = 10;
pub const FREE_DAILY_LIMIT: u32 = 2;

pub fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

fn today() -> String {
    OffsetDateTime::now_utc().date().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRequest {
    pub id: String,
    pub created_at: String,
    pub request: ComicRequest,
}

pub fn recent_requests(store: &dyn KeyValueStore) -> Result<Vec<RecentRequest>> {
    match store.get(RECENT_REQUESTS_KEY)? {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(list) => Ok(list),
            Err(e) => {
                warn!(error = %e, "discarding unreadable request history");
                Ok(Vec::new())
            }
        },
        None => Ok(Vec::new()),
    }
}

/// Prepend `request`, keeping the newest [`MAX_RECENT_REQUESTS`].
pub fn record_request(store: &dyn KeyValueStore, request: &ComicRequest) -> Result<RecentRequest> {
    let entry = RecentRequest {
        id: Uuid::new_v4().to_string(),
        created_at: now_iso(),
        request: request.clone(),
    };
    let mut list = recent_requests(store)?;
    list.insert(0, entry.clone());
    list.truncate(MAX_RECENT_REQUESTS);
    store
        .set(RECENT_REQUESTS_KEY, &serde_json::to_string(&list)?)
        .context("save request history")?;
    debug!(id = %entry.id, kept = list.len(), "request recorded");
    Ok(entry)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub day: String,
    pub count: u32,
}

pub fn is_pro(store: &dyn KeyValueStore) -> Result<bool> {
    Ok(store.get(PRO_USER_KEY)?.as_deref() == Some("true"))
}

pub fn set_pro(store: &dyn KeyValueStore, enabled: bool) -> Result<()> {
    store.set(PRO_USER_KEY, if enabled { "true" } else { "false" })
}

/// Usage for `day`; a counter from an earlier day reads as zero.
pub fn usage_on(store: &dyn KeyValueStore, day: &str) -> Result<DailyUsage> {
    let stored: Option<DailyUsage> = store
        .get(DAILY_USAGE_KEY)?
        .and_then(|raw| serde_json::from_str(&raw).ok());
    Ok(match stored {
        Some(u) if u.day == day => u,
        _ => DailyUsage {
            day: day.to_string(),
            count: 0,
        },
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageCheck {
    pub usage: DailyUsage,
    pub pro: bool,
    /// Advisory only; callers warn and carry on.
    pub over_limit: bool,
}

pub fn bump_usage_on(store: &dyn KeyValueStore, day: &str) -> Result<UsageCheck> {
    let pro = is_pro(store)?;
    let mut usage = usage_on(store, day)?;
    usage.count += 1;
    store.set(DAILY_USAGE_KEY, &serde_json::to_string(&usage)?)?;
    let over_limit = !pro && usage.count > FREE_DAILY_LIMIT;
    Ok(UsageCheck {
        usage,
        pro,
        over_limit,
    })
}

pub fn bump_usage(store: &dyn KeyValueStore) -> Result<UsageCheck> {
    bump_usage_on(store, &today())
}
