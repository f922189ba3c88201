use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use tiberius::Row;
use tracing::debug;
use uuid::Uuid;

use crate::database::models::{EducationOrganizationMirror, OdsInstance};
use crate::database::sqlserver::{self, SqlServerClient};
use crate::database::{DatabaseEngine, DatabaseError, DatabaseManager};
use crate::services::education_organization::reconciler::ReconcilePlan;
use crate::services::tenancy::TenantScope;

/// Opens admin database access for a tenant
#[async_trait]
pub trait AdminContextFactory: Send + Sync {
    /// Registered ODS instances of the tenant, or only `instance_id` when given
    async fn ods_instances(
        &self,
        scope: &TenantScope,
        engine: DatabaseEngine,
        instance_id: Option<i32>,
    ) -> Result<Vec<OdsInstance>, DatabaseError>;

    /// A fresh unit of work. Every call returns a new context that nothing else holds.
    async fn create_context(
        &self,
        scope: &TenantScope,
        engine: DatabaseEngine,
    ) -> Result<Box<dyn EducationOrganizationContext>, DatabaseError>;
}

/// Unit of work over the mirror table. Nothing is visible to other connections
/// until [`EducationOrganizationContext::save_changes`] commits.
#[async_trait]
pub trait EducationOrganizationContext: Send {
    fn context_id(&self) -> Uuid;

    async fn load_for_instance(
        &mut self,
        instance_id: i32,
    ) -> Result<HashMap<i64, EducationOrganizationMirror>, DatabaseError>;

    async fn apply(&mut self, plan: &ReconcilePlan) -> Result<(), DatabaseError>;

    async fn save_changes(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Contexts backed by the tenant's admin database
#[derive(Debug, Default, Clone)]
pub struct SqlAdminContextFactory;

impl SqlAdminContextFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AdminContextFactory for SqlAdminContextFactory {
    async fn ods_instances(
        &self,
        scope: &TenantScope,
        engine: DatabaseEngine,
        instance_id: Option<i32>,
    ) -> Result<Vec<OdsInstance>, DatabaseError> {
        match engine {
            DatabaseEngine::PostgreSql => {
                let pool = DatabaseManager::pg_pool(&scope.admin_connection_string).await?;
                let instances = match instance_id {
                    Some(id) => {
                        sqlx::query_as::<_, OdsInstance>(
                            "SELECT odsinstanceid, name, connectionstring FROM dbo.odsinstances WHERE odsinstanceid = $1",
                        )
                        .bind(id)
                        .fetch_all(&pool)
                        .await?
                    }
                    None => {
                        sqlx::query_as::<_, OdsInstance>(
                            "SELECT odsinstanceid, name, connectionstring FROM dbo.odsinstances ORDER BY odsinstanceid",
                        )
                        .fetch_all(&pool)
                        .await?
                    }
                };
                Ok(instances)
            }
            DatabaseEngine::SqlServer => {
                let mut client = sqlserver::connect(&scope.admin_connection_string).await?;
                let rows = match instance_id {
                    Some(id) => {
                        client
                            .query(
                                "SELECT OdsInstanceId, Name, ConnectionString FROM dbo.OdsInstances WHERE OdsInstanceId = @P1",
                                &[&id],
                            )
                            .await?
                            .into_first_result()
                            .await?
                    }
                    None => {
                        client
                            .simple_query("SELECT OdsInstanceId, Name, ConnectionString FROM dbo.OdsInstances ORDER BY OdsInstanceId")
                            .await?
                            .into_first_result()
                            .await?
                    }
                };
                rows.iter().map(ods_instance_from_row).collect()
            }
        }
    }

    async fn create_context(
        &self,
        scope: &TenantScope,
        engine: DatabaseEngine,
    ) -> Result<Box<dyn EducationOrganizationContext>, DatabaseError> {
        let context: Box<dyn EducationOrganizationContext> = match engine {
            DatabaseEngine::PostgreSql => {
                let pool = DatabaseManager::pg_pool(&scope.admin_connection_string).await?;
                Box::new(PgEducationOrganizationContext {
                    id: Uuid::new_v4(),
                    tx: pool.begin().await?,
                })
            }
            DatabaseEngine::SqlServer => {
                let mut client = sqlserver::connect(&scope.admin_connection_string).await?;
                client.simple_query("BEGIN TRANSACTION").await?.into_results().await?;
                Box::new(SqlServerEducationOrganizationContext {
                    id: Uuid::new_v4(),
                    client,
                })
            }
        };
        debug!(context_id = %context.context_id(), tenant = %scope.tenant_identifier, "Opened admin context");
        Ok(context)
    }
}

struct PgEducationOrganizationContext {
    id: Uuid,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EducationOrganizationContext for PgEducationOrganizationContext {
    fn context_id(&self) -> Uuid {
        self.id
    }

    async fn load_for_instance(
        &mut self,
        instance_id: i32,
    ) -> Result<HashMap<i64, EducationOrganizationMirror>, DatabaseError> {
        let rows = sqlx::query_as::<_, EducationOrganizationMirror>(
            "SELECT educationorganizationid, instanceid, instancename, nameofinstitution, shortnameofinstitution,
                    discriminator, externalrowid, parentid, lastmodifieddate, lastrefreshed
             FROM adminapi.educationorganizations
             WHERE instanceid = $1",
        )
        .bind(instance_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(|row| (row.education_organization_id, row)).collect())
    }

    async fn apply(&mut self, plan: &ReconcilePlan) -> Result<(), DatabaseError> {
        for row in &plan.to_insert {
            sqlx::query(
                "INSERT INTO adminapi.educationorganizations
                    (educationorganizationid, instanceid, instancename, nameofinstitution, shortnameofinstitution,
                     discriminator, externalrowid, parentid, lastmodifieddate, lastrefreshed)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(row.education_organization_id)
            .bind(row.instance_id)
            .bind(&row.instance_name)
            .bind(&row.name_of_institution)
            .bind(&row.short_name_of_institution)
            .bind(&row.discriminator)
            .bind(row.external_row_id)
            .bind(row.parent_id)
            .bind(row.last_modified_date)
            .bind(row.last_refreshed)
            .execute(&mut *self.tx)
            .await?;
        }

        for row in &plan.to_update {
            sqlx::query(
                "UPDATE adminapi.educationorganizations
                 SET nameofinstitution = $1, shortnameofinstitution = $2, discriminator = $3, parentid = $4,
                     lastmodifieddate = $5, lastrefreshed = $6
                 WHERE educationorganizationid = $7 AND instanceid = $8",
            )
            .bind(&row.name_of_institution)
            .bind(&row.short_name_of_institution)
            .bind(&row.discriminator)
            .bind(row.parent_id)
            .bind(row.last_modified_date)
            .bind(row.last_refreshed)
            .bind(row.education_organization_id)
            .bind(row.instance_id)
            .execute(&mut *self.tx)
            .await?;
        }

        for row in &plan.to_delete {
            sqlx::query("DELETE FROM adminapi.educationorganizations WHERE educationorganizationid = $1 AND instanceid = $2")
                .bind(row.education_organization_id)
                .bind(row.instance_id)
                .execute(&mut *self.tx)
                .await?;
        }

        Ok(())
    }

    async fn save_changes(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.commit().await?;
        Ok(())
    }
}

// Dropping without save_changes closes the connection, which rolls back the open transaction.
struct SqlServerEducationOrganizationContext {
    id: Uuid,
    client: SqlServerClient,
}

#[async_trait]
impl EducationOrganizationContext for SqlServerEducationOrganizationContext {
    fn context_id(&self) -> Uuid {
        self.id
    }

    async fn load_for_instance(
        &mut self,
        instance_id: i32,
    ) -> Result<HashMap<i64, EducationOrganizationMirror>, DatabaseError> {
        let rows = self
            .client
            .query(
                "SELECT EducationOrganizationId, InstanceId, InstanceName, NameOfInstitution, ShortNameOfInstitution,
                        Discriminator, ExternalRowId, ParentId, LastModifiedDate, LastRefreshed
                 FROM adminapi.EducationOrganizations
                 WHERE InstanceId = @P1",
                &[&instance_id],
            )
            .await?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| mirror_from_row(row).map(|m| (m.education_organization_id, m)))
            .collect()
    }

    async fn apply(&mut self, plan: &ReconcilePlan) -> Result<(), DatabaseError> {
        for row in &plan.to_insert {
            self.client
                .execute(
                    "INSERT INTO adminapi.EducationOrganizations
                        (EducationOrganizationId, InstanceId, InstanceName, NameOfInstitution, ShortNameOfInstitution,
                         Discriminator, ExternalRowId, ParentId, LastModifiedDate, LastRefreshed)
                     VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9, @P10)",
                    &[
                        &row.education_organization_id,
                        &row.instance_id,
                        &row.instance_name.as_str(),
                        &row.name_of_institution.as_str(),
                        &row.short_name_of_institution.as_deref(),
                        &row.discriminator.as_str(),
                        &row.external_row_id,
                        &row.parent_id,
                        &row.last_modified_date.naive_utc(),
                        &row.last_refreshed.naive_utc(),
                    ],
                )
                .await?;
        }

        for row in &plan.to_update {
            self.client
                .execute(
                    "UPDATE adminapi.EducationOrganizations
                     SET NameOfInstitution = @P1, ShortNameOfInstitution = @P2, Discriminator = @P3, ParentId = @P4,
                         LastModifiedDate = @P5, LastRefreshed = @P6
                     WHERE EducationOrganizationId = @P7 AND InstanceId = @P8",
                    &[
                        &row.name_of_institution.as_str(),
                        &row.short_name_of_institution.as_deref(),
                        &row.discriminator.as_str(),
                        &row.parent_id,
                        &row.last_modified_date.naive_utc(),
                        &row.last_refreshed.naive_utc(),
                        &row.education_organization_id,
                        &row.instance_id,
                    ],
                )
                .await?;
        }

        for row in &plan.to_delete {
            self.client
                .execute(
                    "DELETE FROM adminapi.EducationOrganizations WHERE EducationOrganizationId = @P1 AND InstanceId = @P2",
                    &[&row.education_organization_id, &row.instance_id],
                )
                .await?;
        }

        Ok(())
    }

    async fn save_changes(self: Box<Self>) -> Result<(), DatabaseError> {
        let mut client = self.client;
        client.simple_query("COMMIT TRANSACTION").await?.into_results().await?;
        // The commit already landed; a failed close must not report the save as failed.
        if let Err(e) = client.close().await {
            debug!(error = %e, "Failed to close admin connection cleanly");
        }
        Ok(())
    }
}

fn required<T>(value: Option<T>, column: &str) -> Result<T, DatabaseError> {
    value.ok_or_else(|| DatabaseError::QueryError(format!("{} is null", column)))
}

fn ods_instance_from_row(row: &Row) -> Result<OdsInstance, DatabaseError> {
    Ok(OdsInstance {
        ods_instance_id: required(row.try_get::<i32, _>("OdsInstanceId")?, "OdsInstanceId")?,
        name: required(row.try_get::<&str, _>("Name")?, "Name")?.to_string(),
        connection_string: required(row.try_get::<&str, _>("ConnectionString")?, "ConnectionString")?.to_string(),
    })
}

fn mirror_from_row(row: &Row) -> Result<EducationOrganizationMirror, DatabaseError> {
    let timestamp = |column: &str| -> Result<_, DatabaseError> {
        Ok(required(row.try_get::<NaiveDateTime, _>(column)?, column)?.and_utc())
    };

    Ok(EducationOrganizationMirror {
        education_organization_id: required(row.try_get::<i64, _>("EducationOrganizationId")?, "EducationOrganizationId")?,
        instance_id: required(row.try_get::<i32, _>("InstanceId")?, "InstanceId")?,
        instance_name: required(row.try_get::<&str, _>("InstanceName")?, "InstanceName")?.to_string(),
        name_of_institution: required(row.try_get::<&str, _>("NameOfInstitution")?, "NameOfInstitution")?.to_string(),
        short_name_of_institution: row.try_get::<&str, _>("ShortNameOfInstitution")?.map(str::to_string),
        discriminator: required(row.try_get::<&str, _>("Discriminator")?, "Discriminator")?.to_string(),
        external_row_id: required(row.try_get::<Uuid, _>("ExternalRowId")?, "ExternalRowId")?,
        parent_id: row.try_get::<i64, _>("ParentId")?,
        last_modified_date: timestamp("LastModifiedDate")?,
        last_refreshed: timestamp("LastRefreshed")?,
    })
}
