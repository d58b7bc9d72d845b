//! Represents the bucket a deployment is bound to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket: the namespace object keys are resolved in.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name, e.g. `course-content`.
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
