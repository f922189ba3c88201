use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Mirrored education organization, unique per (education_organization_id, instance_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EducationOrganizationMirror {
    #[sqlx(rename = "educationorganizationid")]
    pub education_organization_id: i64,
    #[sqlx(rename = "instanceid")]
    pub instance_id: i32,
    #[sqlx(rename = "instancename")]
    pub instance_name: String,
    #[sqlx(rename = "nameofinstitution")]
    pub name_of_institution: String,
    #[sqlx(rename = "shortnameofinstitution")]
    pub short_name_of_institution: Option<String>,
    pub discriminator: String,
    #[sqlx(rename = "externalrowid")]
    pub external_row_id: Uuid,
    #[sqlx(rename = "parentid")]
    pub parent_id: Option<i64>,
    #[sqlx(rename = "lastmodifieddate")]
    pub last_modified_date: DateTime<Utc>,
    #[sqlx(rename = "lastrefreshed")]
    pub last_refreshed: DateTime<Utc>,
}
