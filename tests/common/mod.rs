#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use ods_admin_api::crypto::{CryptoError, SymmetricStringEncryptionProvider};
use ods_admin_api::database::models::{EducationOrganizationMirror, OdsInstance};
use ods_admin_api::database::{DatabaseEngine, DatabaseError};
use ods_admin_api::jobs::{JobStatus, JobStatusRecord, JobStatusStore};
use ods_admin_api::services::education_organization::{
    AdminContextFactory, EducationOrganizationContext, EducationOrganizationService, EducationOrganizationSnapshot,
    ReconcilePlan, SnapshotFetcher, SourceEducationOrganization, SyncSettings,
};
use ods_admin_api::services::tenancy::{TenancyRouter, TenantScope};
use ods_admin_api::services::tenant_service::{
    TenantConfiguration, TenantConfigurationProvider, TenantError, TenantSummary, TenantsService,
};

/// base64 of a 32 byte all-zero key
pub fn encryption_key() -> String {
    STANDARD.encode([0u8; 32])
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        encryption_key: Some(encryption_key()),
        database_engine: Some("PostgreSql".to_string()),
        max_concurrent_instances: None,
        protect_partial_snapshots: false,
    }
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// In-memory status table that also keeps every write in order
#[derive(Default)]
pub struct MemoryStatusStore {
    rows: Mutex<HashMap<String, JobStatusRecord>>,
    history: Mutex<Vec<(String, JobStatus, Option<String>)>>,
    fail_writes: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn history(&self) -> Vec<(String, JobStatus, Option<String>)> {
        self.history.lock().unwrap().clone()
    }

    pub fn statuses_for(&self, job_id: &str) -> Vec<JobStatus> {
        self.history()
            .into_iter()
            .filter(|(id, _, _)| id == job_id)
            .map(|(_, status, _)| status)
            .collect()
    }

    pub fn row(&self, job_id: &str) -> Option<JobStatusRecord> {
        self.rows.lock().unwrap().get(job_id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl JobStatusStore for MemoryStatusStore {
    async fn set_status(&self, job_id: &str, status: JobStatus, error_message: Option<&str>) -> Result<(), DatabaseError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::QueryError("status table unavailable".to_string()));
        }
        self.history
            .lock()
            .unwrap()
            .push((job_id.to_string(), status, error_message.map(str::to_string)));
        self.rows.lock().unwrap().insert(
            job_id.to_string(),
            JobStatusRecord {
                job_id: job_id.to_string(),
                status,
                error_message: error_message.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>, DatabaseError> {
        Ok(self.row(job_id))
    }
}

// ---------------------------------------------------------------------------
// Tenants
// ---------------------------------------------------------------------------

/// Serves both tenant listing and tenant configuration from a fixed list of names
pub struct FixedTenants {
    names: Vec<String>,
}

impl FixedTenants {
    pub fn new(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        })
    }
}

pub fn admin_connection(tenant: &str) -> String {
    format!("Host=admin;Database=EdFi_Admin_{}", tenant)
}

#[async_trait]
impl TenantsService for FixedTenants {
    async fn get_tenants(&self, _from_cache: bool) -> Result<Vec<TenantSummary>, TenantError> {
        Ok(self
            .names
            .iter()
            .map(|name| TenantSummary {
                tenant_name: name.clone(),
                admin_connection_string: admin_connection(name),
                security_connection_string: String::new(),
            })
            .collect())
    }

    async fn get_tenant_by_id(&self, tenant_name: &str) -> Result<Option<TenantSummary>, TenantError> {
        Ok(self
            .get_tenants(false)
            .await?
            .into_iter()
            .find(|t| t.tenant_name.eq_ignore_ascii_case(tenant_name)))
    }
}

impl TenantConfigurationProvider for FixedTenants {
    fn get(&self) -> HashMap<String, TenantConfiguration> {
        self.names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    TenantConfiguration {
                        tenant_identifier: name.clone(),
                        admin_connection_string: admin_connection(name),
                        security_connection_string: String::new(),
                    },
                )
            })
            .collect()
    }
}

pub fn router(multi_tenancy: bool, tenants: Arc<FixedTenants>) -> TenancyRouter {
    TenancyRouter::new(
        multi_tenancy,
        Some(admin_connection("default")),
        None,
        tenants.clone(),
        tenants,
    )
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

/// "enc:<plain>" decrypts to "<plain>"; anything else fails
pub struct PrefixDecryptor;

impl SymmetricStringEncryptionProvider for PrefixDecryptor {
    fn try_decrypt(&self, cipher_text: &str, _key: &[u8]) -> Option<String> {
        cipher_text.strip_prefix("enc:").map(str::to_string)
    }

    fn encrypt(&self, plain_text: &str, _key: &[u8]) -> Result<String, CryptoError> {
        Ok(format!("enc:{}", plain_text))
    }
}

pub fn instance(id: i32, connection_string: &str) -> OdsInstance {
    OdsInstance {
        ods_instance_id: id,
        name: format!("Instance {}", id),
        connection_string: connection_string.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Source data
// ---------------------------------------------------------------------------

pub fn source(id: i64, name: &str) -> SourceEducationOrganization {
    SourceEducationOrganization {
        education_organization_id: id,
        name_of_institution: name.to_string(),
        short_name_of_institution: None,
        discriminator: "edfi.School".to_string(),
        id: Uuid::new_v4(),
        parent_id: Some(255901),
    }
}

/// Returns a canned snapshot per decrypted connection string
#[derive(Default)]
pub struct FakeFetcher {
    snapshots: Mutex<HashMap<String, EducationOrganizationSnapshot>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn with_snapshot(self, connection_string: &str, snapshot: EducationOrganizationSnapshot) -> Self {
        self.snapshots
            .lock()
            .unwrap()
            .insert(connection_string.to_string(), snapshot);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotFetcher for FakeFetcher {
    async fn fetch(&self, connection_string: &str, _engine: DatabaseEngine) -> EducationOrganizationSnapshot {
        self.calls.lock().unwrap().push(connection_string.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.snapshots
            .lock()
            .unwrap()
            .get(connection_string)
            .cloned()
            .unwrap_or_else(|| EducationOrganizationSnapshot::complete(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// Admin database
// ---------------------------------------------------------------------------

type MirrorTable = HashMap<(String, i32), HashMap<i64, EducationOrganizationMirror>>;

#[derive(Default)]
struct FactoryState {
    instances: HashMap<String, Vec<OdsInstance>>,
    committed: MirrorTable,
    context_ids: Vec<Uuid>,
    processed: Vec<(String, i32)>,
    active: HashSet<Uuid>,
    max_active: usize,
    failing_instances: HashSet<i32>,
}

/// Admin database double: registry per tenant plus a committed mirror table.
/// Tracks every context it hands out and which instances were processed.
#[derive(Clone, Default)]
pub struct FakeContextFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl FakeContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instances(self, tenant: &str, instances: Vec<OdsInstance>) -> Self {
        self.state.lock().unwrap().instances.insert(tenant.to_string(), instances);
        self
    }

    pub fn with_mirror(self, tenant: &str, instance_id: i32, rows: Vec<EducationOrganizationMirror>) -> Self {
        self.state.lock().unwrap().committed.insert(
            (tenant.to_string(), instance_id),
            rows.into_iter().map(|r| (r.education_organization_id, r)).collect(),
        );
        self
    }

    /// `apply` fails for this instance
    pub fn failing_on(self, instance_id: i32) -> Self {
        self.state.lock().unwrap().failing_instances.insert(instance_id);
        self
    }

    pub fn mirror_ids(&self, tenant: &str, instance_id: i32) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<i64> = state
            .committed
            .get(&(tenant.to_string(), instance_id))
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn mirror_row(&self, tenant: &str, instance_id: i32, id: i64) -> Option<EducationOrganizationMirror> {
        let state = self.state.lock().unwrap();
        state
            .committed
            .get(&(tenant.to_string(), instance_id))
            .and_then(|rows| rows.get(&id).cloned())
    }

    pub fn context_ids(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().context_ids.clone()
    }

    pub fn processed(&self) -> Vec<(String, i32)> {
        let mut processed = self.state.lock().unwrap().processed.clone();
        processed.sort();
        processed
    }

    pub fn max_active(&self) -> usize {
        self.state.lock().unwrap().max_active
    }
}

fn tenant_of(scope: &TenantScope) -> String {
    scope.tenant_identifier.clone()
}

#[async_trait]
impl AdminContextFactory for FakeContextFactory {
    async fn ods_instances(
        &self,
        scope: &TenantScope,
        _engine: DatabaseEngine,
        instance_id: Option<i32>,
    ) -> Result<Vec<OdsInstance>, DatabaseError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .get(&tenant_of(scope))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|i| instance_id.map_or(true, |id| i.ods_instance_id == id))
            .collect())
    }

    async fn create_context(
        &self,
        scope: &TenantScope,
        _engine: DatabaseEngine,
    ) -> Result<Box<dyn EducationOrganizationContext>, DatabaseError> {
        let id = Uuid::new_v4();
        {
            let mut state = self.state.lock().unwrap();
            state.context_ids.push(id);
            state.active.insert(id);
            state.max_active = state.max_active.max(state.active.len());
        }
        Ok(Box::new(FakeContext {
            id,
            tenant: tenant_of(scope),
            instance_id: None,
            staged: HashMap::new(),
            factory: self.clone(),
        }))
    }
}

struct FakeContext {
    id: Uuid,
    tenant: String,
    instance_id: Option<i32>,
    staged: HashMap<i64, EducationOrganizationMirror>,
    factory: FakeContextFactory,
}

#[async_trait]
impl EducationOrganizationContext for FakeContext {
    fn context_id(&self) -> Uuid {
        self.id
    }

    async fn load_for_instance(
        &mut self,
        instance_id: i32,
    ) -> Result<HashMap<i64, EducationOrganizationMirror>, DatabaseError> {
        // Keep the context open long enough for sibling tasks to overlap.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut state = self.factory.state.lock().unwrap();
        state.processed.push((self.tenant.clone(), instance_id));
        self.instance_id = Some(instance_id);
        self.staged = state
            .committed
            .get(&(self.tenant.clone(), instance_id))
            .cloned()
            .unwrap_or_default();
        Ok(self.staged.clone())
    }

    async fn apply(&mut self, plan: &ReconcilePlan) -> Result<(), DatabaseError> {
        let failing = {
            let state = self.factory.state.lock().unwrap();
            self.instance_id.map_or(false, |id| state.failing_instances.contains(&id))
        };
        if failing {
            return Err(DatabaseError::QueryError("deadlock detected".to_string()));
        }

        for row in plan.to_insert.iter().chain(plan.to_update.iter()) {
            self.staged.insert(row.education_organization_id, row.clone());
        }
        for row in &plan.to_delete {
            self.staged.remove(&row.education_organization_id);
        }
        Ok(())
    }

    async fn save_changes(self: Box<Self>) -> Result<(), DatabaseError> {
        let mut state = self.factory.state.lock().unwrap();
        if let Some(instance_id) = self.instance_id {
            state.committed.insert((self.tenant.clone(), instance_id), self.staged.clone());
        }
        state.active.remove(&self.id);
        Ok(())
    }
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        if let Ok(mut state) = self.factory.state.lock() {
            state.active.remove(&self.id);
        }
    }
}

pub fn service(
    settings: SyncSettings,
    router: TenancyRouter,
    fetcher: Arc<FakeFetcher>,
    factory: FakeContextFactory,
) -> EducationOrganizationService {
    EducationOrganizationService::new(settings, router, fetcher, Arc::new(factory), Arc::new(PrefixDecryptor))
}

pub fn mirror(id: i64, instance_id: i32, name: &str) -> EducationOrganizationMirror {
    let stamp = chrono::Utc::now() - chrono::Duration::days(1);
    EducationOrganizationMirror {
        education_organization_id: id,
        instance_id,
        instance_name: format!("Instance {}", instance_id),
        name_of_institution: name.to_string(),
        short_name_of_institution: None,
        discriminator: "edfi.School".to_string(),
        external_row_id: Uuid::new_v4(),
        parent_id: None,
        last_modified_date: stamp,
        last_refreshed: stamp,
    }
}
