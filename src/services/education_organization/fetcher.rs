use async_trait::async_trait;
use futures::{Stream, StreamExt};
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection, Row, TypeInfo, ValueRef};
use std::fmt::Display;
use tiberius::ColumnData;
use tracing::{debug, error};
use uuid::Uuid;

use crate::database::manager::pg_connect_options;
use crate::database::{sqlserver, DatabaseEngine};

/// Reads every education organization of an ODS together with its parent id.
/// The column order is relied on by [`SourceEducationOrganization::from_row`].
pub const EDUCATION_ORGANIZATION_QUERY: &str = "SELECT
    edorg.educationorganizationid,
    edorg.nameofinstitution,
    edorg.shortnameofinstitution,
    edorg.discriminator,
    edorg.id,
    COALESCE(scl.localeducationagencyid, lea.parentlocaleducationagencyid, lea.educationservicecenterid, lea.stateeducationagencyid, esc.stateeducationagencyid) AS parentid
FROM edfi.educationorganization edorg
    LEFT JOIN edfi.school scl ON edorg.educationorganizationid = scl.schoolid
    LEFT JOIN edfi.localeducationagency lea ON edorg.educationorganizationid = lea.localeducationagencyid
    LEFT JOIN edfi.educationservicecenter esc ON edorg.educationorganizationid = esc.educationservicecenterid
WHERE edorg.discriminator in ('edfi.StateEducationAgency', 'edfi.EducationServiceCenter', 'edfi.LocalEducationAgency', 'edfi.School');";

/// One cell of a source row, independent of the engine it came from
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Text(String),
    Uuid(Uuid),
    Unreadable(String),
}

impl ColumnValue {
    fn textual(&self) -> Option<String> {
        match self {
            ColumnValue::Null | ColumnValue::Unreadable(_) => None,
            ColumnValue::Int(v) => Some(v.to_string()),
            ColumnValue::Text(s) => Some(s.clone()),
            ColumnValue::Uuid(u) => Some(u.to_string()),
        }
    }
}

/// Values of one result row in query column order
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow(pub Vec<ColumnValue>);

impl SourceRow {
    fn cell(&self, index: usize) -> Result<&ColumnValue, RowError> {
        match self.0.get(index) {
            Some(ColumnValue::Unreadable(reason)) => Err(RowError::Unreadable {
                column: COLUMNS[index],
                reason: reason.clone(),
            }),
            Some(value) => Ok(value),
            None => Err(RowError::MissingColumn(COLUMNS[index])),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RowError {
    #[error("Missing column {0}")]
    MissingColumn(&'static str),

    #[error("Column {0} is null")]
    NullColumn(&'static str),

    #[error("Invalid {column} value: {value}")]
    InvalidValue { column: &'static str, value: String },

    #[error("Column {column} could not be read: {reason}")]
    Unreadable { column: &'static str, reason: String },
}

/// An education organization as read from an ODS, before reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEducationOrganization {
    pub education_organization_id: i64,
    pub name_of_institution: String,
    pub short_name_of_institution: Option<String>,
    pub discriminator: String,
    pub id: Uuid,
    pub parent_id: Option<i64>,
}

const COLUMNS: [&str; 6] = [
    "educationorganizationid",
    "nameofinstitution",
    "shortnameofinstitution",
    "discriminator",
    "id",
    "parentid",
];

impl SourceEducationOrganization {
    pub fn from_row(row: &SourceRow) -> Result<Self, RowError> {
        let parent_id = match row.cell(5)? {
            ColumnValue::Null => None,
            value => Some(parse_id(COLUMNS[5], value)?),
        };

        Ok(Self {
            education_organization_id: parse_id(COLUMNS[0], row.cell(0)?)?,
            name_of_institution: required_text(COLUMNS[1], row.cell(1)?)?,
            short_name_of_institution: match row.cell(2)? {
                ColumnValue::Null => None,
                value => Some(required_text(COLUMNS[2], value)?),
            },
            discriminator: required_text(COLUMNS[3], row.cell(3)?)?,
            id: parse_uuid(COLUMNS[4], row.cell(4)?)?,
            parent_id,
        })
    }
}

impl TryFrom<&SourceRow> for SourceEducationOrganization {
    type Error = RowError;

    fn try_from(row: &SourceRow) -> Result<Self, Self::Error> {
        Self::from_row(row)
    }
}

/// Ids go through their textual form so int, bigint and numeric-text columns all convert
fn parse_id(column: &'static str, value: &ColumnValue) -> Result<i64, RowError> {
    let text = value.textual().ok_or(RowError::NullColumn(column))?;
    text.trim().parse::<i64>().map_err(|_| RowError::InvalidValue {
        column,
        value: text,
    })
}

fn required_text(column: &'static str, value: &ColumnValue) -> Result<String, RowError> {
    match value {
        ColumnValue::Text(s) => Ok(s.clone()),
        ColumnValue::Null => Err(RowError::NullColumn(column)),
        other => Err(RowError::InvalidValue {
            column,
            value: other.textual().unwrap_or_default(),
        }),
    }
}

fn parse_uuid(column: &'static str, value: &ColumnValue) -> Result<Uuid, RowError> {
    match value {
        ColumnValue::Uuid(u) => Ok(*u),
        ColumnValue::Text(s) => Uuid::parse_str(s.trim()).map_err(|_| RowError::InvalidValue {
            column,
            value: s.clone(),
        }),
        ColumnValue::Null => Err(RowError::NullColumn(column)),
        other => Err(RowError::InvalidValue {
            column,
            value: other.textual().unwrap_or_default(),
        }),
    }
}

/// Result of one fetch. `complete` is false when the connection or the reader
/// failed part way, in which case `records` holds what was read before the fault.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EducationOrganizationSnapshot {
    pub records: Vec<SourceEducationOrganization>,
    pub complete: bool,
}

impl EducationOrganizationSnapshot {
    pub fn complete(records: Vec<SourceEducationOrganization>) -> Self {
        Self { records, complete: true }
    }

    pub fn partial(records: Vec<SourceEducationOrganization>) -> Self {
        Self {
            records,
            complete: false,
        }
    }
}

/// Reads the current education organizations from one ODS
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Never fails: faults are logged and reflected in [`EducationOrganizationSnapshot::complete`]
    async fn fetch(&self, connection_string: &str, engine: DatabaseEngine) -> EducationOrganizationSnapshot;
}

/// Fetches over a dedicated connection per call, opened and closed here
#[derive(Debug, Default, Clone)]
pub struct OdsSnapshotFetcher;

impl OdsSnapshotFetcher {
    pub fn new() -> Self {
        Self
    }

    async fn fetch_postgres(&self, connection_string: &str) -> EducationOrganizationSnapshot {
        let options = match pg_connect_options(connection_string) {
            Ok(options) => options,
            Err(e) => {
                error!(error = %e, "Error reading education organizations from database. {}", e);
                return EducationOrganizationSnapshot::partial(Vec::new());
            }
        };
        let mut conn = match PgConnection::connect_with(&options).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Error reading education organizations from database. {}", e);
                return EducationOrganizationSnapshot::partial(Vec::new());
            }
        };

        let snapshot = {
            let rows = sqlx::query(EDUCATION_ORGANIZATION_QUERY)
                .fetch(&mut conn)
                .map(|row| row.map(|row| pg_source_row(&row)));
            collect_rows(rows).await
        };

        if let Err(e) = conn.close().await {
            debug!(error = %e, "Failed to close ODS connection cleanly");
        }
        snapshot
    }

    async fn fetch_sql_server(&self, connection_string: &str) -> EducationOrganizationSnapshot {
        let mut client = match sqlserver::connect(connection_string).await {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Error reading education organizations from database. {}", e);
                return EducationOrganizationSnapshot::partial(Vec::new());
            }
        };

        let snapshot = match client.simple_query(EDUCATION_ORGANIZATION_QUERY).await {
            Ok(stream) => {
                let rows = stream
                    .into_row_stream()
                    .map(|row| row.map(|row| SourceRow(row.into_iter().map(sql_server_value).collect())));
                collect_rows(rows).await
            }
            Err(e) => {
                error!(error = %e, "Error reading education organizations from database. {}", e);
                EducationOrganizationSnapshot::partial(Vec::new())
            }
        };

        if let Err(e) = client.close().await {
            debug!(error = %e, "Failed to close ODS connection cleanly");
        }
        snapshot
    }
}

#[async_trait]
impl SnapshotFetcher for OdsSnapshotFetcher {
    async fn fetch(&self, connection_string: &str, engine: DatabaseEngine) -> EducationOrganizationSnapshot {
        match engine {
            DatabaseEngine::PostgreSql => self.fetch_postgres(connection_string).await,
            DatabaseEngine::SqlServer => self.fetch_sql_server(connection_string).await,
        }
    }
}

/// Drain a row stream into a snapshot.
///
/// A row that does not convert is logged and skipped. A stream error ends the
/// read and marks the snapshot incomplete, keeping the rows already collected.
pub async fn collect_rows<S, E>(rows: S) -> EducationOrganizationSnapshot
where
    S: Stream<Item = Result<SourceRow, E>>,
    E: Display,
{
    futures::pin_mut!(rows);
    let mut records = Vec::new();

    while let Some(next) = rows.next().await {
        match next {
            Ok(row) => match SourceEducationOrganization::from_row(&row) {
                Ok(record) => records.push(record),
                Err(e) => error!(error = %e, "Data conversion error while reading education organizations. {}", e),
            },
            Err(e) => {
                error!(error = %e, "Error reading education organizations from database. {}", e);
                return EducationOrganizationSnapshot::partial(records);
            }
        }
    }

    EducationOrganizationSnapshot::complete(records)
}

fn pg_source_row(row: &PgRow) -> SourceRow {
    SourceRow((0..row.len()).map(|index| pg_value(row, index)).collect())
}

fn pg_value(row: &PgRow, index: usize) -> ColumnValue {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return ColumnValue::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(e) => return ColumnValue::Unreadable(e.to_string()),
    };

    let value = match type_name.as_str() {
        "INT2" => row.try_get::<i16, _>(index).map(|v| ColumnValue::Int(v.into())),
        "INT4" => row.try_get::<i32, _>(index).map(|v| ColumnValue::Int(v.into())),
        "INT8" => row.try_get::<i64, _>(index).map(ColumnValue::Int),
        "UUID" => row.try_get::<Uuid, _>(index).map(ColumnValue::Uuid),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<String, _>(index).map(ColumnValue::Text),
        other => return ColumnValue::Unreadable(format!("unsupported column type {}", other)),
    };
    value.unwrap_or_else(|e| ColumnValue::Unreadable(e.to_string()))
}

fn sql_server_value(data: ColumnData<'static>) -> ColumnValue {
    match data {
        ColumnData::U8(v) => v.map_or(ColumnValue::Null, |v| ColumnValue::Int(v.into())),
        ColumnData::I16(v) => v.map_or(ColumnValue::Null, |v| ColumnValue::Int(v.into())),
        ColumnData::I32(v) => v.map_or(ColumnValue::Null, |v| ColumnValue::Int(v.into())),
        ColumnData::I64(v) => v.map_or(ColumnValue::Null, ColumnValue::Int),
        ColumnData::Numeric(v) => v.map_or(ColumnValue::Null, |n| ColumnValue::Text(n.to_string())),
        ColumnData::String(v) => v.map_or(ColumnValue::Null, |s| ColumnValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(ColumnValue::Null, ColumnValue::Uuid),
        other => ColumnValue::Unreadable(format!("unsupported column type {:?}", other)),
    }
}
