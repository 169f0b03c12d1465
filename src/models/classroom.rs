use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub building: Option<String>,
    pub capacity: Option<i64>,
    pub created_at: NaiveDateTime,
}
