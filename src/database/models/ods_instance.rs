use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered ODS instance from the tenant's admin database.
///
/// `connection_string` is stored encrypted and must go through the decryption
/// provider before use.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OdsInstance {
    #[sqlx(rename = "odsinstanceid")]
    pub ods_instance_id: i32,
    pub name: String,
    #[serde(skip_serializing)]
    #[sqlx(rename = "connectionstring")]
    pub connection_string: String,
}
