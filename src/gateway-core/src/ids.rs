//! ID and timestamp helpers shared by audit, approval, and cron stores.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
