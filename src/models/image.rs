use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkoutImage {
    pub id: String,
    pub workout_id: String,
    pub download_url: String,
    pub file_name: String,
    /// Milliseconds since the Unix epoch.
    pub uploaded_at: i64,
}

impl Default for WorkoutImage {
    fn default() -> Self {
        Self {
            id: String::new(),
            workout_id: String::new(),
            download_url: String::new(),
            file_name: String::new(),
            uploaded_at: Utc::now().timestamp_millis(),
        }
    }
}
