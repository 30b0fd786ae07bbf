//! Tenant provisioning
//!
//! [`TenantProvisioner::create`] turns a bare tenant id into a registered,
//! usable tenant in six logged steps:
//!
//! 1. validate the id
//! 2. check the registry (never a cache) for an existing row
//! 3. create the isolation boundary, create-if-absent
//! 4. apply the schema manifest; tables are fatal, indexes are reported
//! 5. re-inspect the boundary for required tables
//! 6. insert the registry row
//!
//! A failure after step 3 evicts the tenant's cached connection and removes
//! only a registry row this run wrote. The boundary is never dropped: another
//! process provisioning the same id may already be writing to it.

use crate::backend::BackendProvider;
use crate::bootstrap::{BootstrapManager, BootstrapState};
use crate::connection::ConnectionManager;
use crate::error::{TenantError, TenantResult};
use crate::manifest::SchemaManifest;
use crate::registry::TenantRegistry;
use crate::schema::{IndexReport, SchemaInstaller};
use crate::tenant::{TenantId, TenantRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_config::ProvisioningSettings;
use tracing::Instrument;
use uuid::Uuid;

/// Steps of the provisioning pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStep {
    ValidateTenantId,
    ExistenceCheck,
    CreateIsolationBoundary,
    InitializeSchema,
    ValidateSetup,
    RegisterTenant,
}

impl ProvisioningStep {
    pub const ALL: [ProvisioningStep; 6] = [
        Self::ValidateTenantId,
        Self::ExistenceCheck,
        Self::CreateIsolationBoundary,
        Self::InitializeSchema,
        Self::ValidateSetup,
        Self::RegisterTenant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidateTenantId => "validate_tenant_id",
            Self::ExistenceCheck => "existence_check",
            Self::CreateIsolationBoundary => "create_isolation_boundary",
            Self::InitializeSchema => "initialize_schema",
            Self::ValidateSetup => "validate_setup",
            Self::RegisterTenant => "register_tenant",
        }
    }

    /// 1-based position in the pipeline
    pub fn number(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).map_or(0, |i| i + 1)
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing of one completed or failed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: ProvisioningStep,
    pub elapsed: Duration,
    pub succeeded: bool,
}

/// Result of a successful provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisioningOutcome {
    pub record: TenantRecord,
    /// Index sub-step result from step 4
    pub indexes: IndexReport,
    /// Manifest indexes absent after step 5
    pub missing_indexes: Vec<String>,
    pub steps: Vec<StepReport>,
}

impl ProvisioningOutcome {
    pub fn total_elapsed(&self) -> Duration {
        self.steps.iter().map(|s| s.elapsed).sum()
    }
}

/// Runs the provisioning pipeline.
pub struct TenantProvisioner<P: BackendProvider> {
    connections: Arc<ConnectionManager<P>>,
    bootstrap: Arc<BootstrapManager<P>>,
    manifest: SchemaManifest,
    strict_indexes: bool,
}

impl<P: BackendProvider> TenantProvisioner<P> {
    pub fn new(
        connections: Arc<ConnectionManager<P>>,
        bootstrap: Arc<BootstrapManager<P>>,
        manifest: SchemaManifest,
        settings: &ProvisioningSettings,
    ) -> Self {
        Self {
            connections,
            bootstrap,
            manifest,
            strict_indexes: settings.strict_indexes,
        }
    }

    /// Provision a tenant and return its registry record.
    pub async fn create(
        &self,
        tenant_id: &str,
        display_name: &str,
        created_by: &str,
    ) -> TenantResult<TenantRecord> {
        Ok(self
            .create_with_report(tenant_id, display_name, created_by)
            .await?
            .record)
    }

    /// Provision a tenant and return the per-step report.
    pub async fn create_with_report(
        &self,
        tenant_id: &str,
        display_name: &str,
        created_by: &str,
    ) -> TenantResult<ProvisioningOutcome> {
        let span = tracing::info_span!("provision", tenant_id, run_id = %Uuid::new_v4());

        async {
            let mut run = Run::new(tenant_id);
            let outcome = self.pipeline(&mut run, display_name, created_by).await;

            match &outcome {
                Ok(o) => tracing::info!(
                    elapsed_ms = o.total_elapsed().as_millis() as u64,
                    indexes_failed = o.indexes.failed_count(),
                    "tenant provisioned"
                ),
                Err(e) => tracing::warn!(error = %e, "tenant provisioning failed"),
            }

            outcome
        }
        .instrument(span)
        .await
    }

    async fn pipeline(
        &self,
        run: &mut Run,
        display_name: &str,
        created_by: &str,
    ) -> TenantResult<ProvisioningOutcome> {
        let resolver = self.connections.resolver();
        let raw = run.tenant_id.clone();

        let tenant_id = run
            .step(ProvisioningStep::ValidateTenantId, async {
                resolver.parse_tenant_id(&raw)
            })
            .await?;

        let state = self.bootstrap.state().await?;
        if state != BootstrapState::Ready {
            return Err(TenantError::Bootstrap {
                stage: state,
                message: "system must be bootstrapped before provisioning tenants".to_string(),
            });
        }

        let registry = self.connections.registry().await?;

        run.step(ProvisioningStep::ExistenceCheck, async {
            match registry.find(&tenant_id).await? {
                Some(_) => Err(TenantError::TenantExists(tenant_id.to_string())),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| run.wrap(ProvisioningStep::ExistenceCheck, e))?;

        let (boundary, conn) = run
            .step(ProvisioningStep::CreateIsolationBoundary, async {
                let boundary = resolver.resolve_isolation_boundary(&tenant_id)?;
                let conn = self.connections.connect_for_provisioning(&tenant_id).await?;
                Ok((boundary, conn))
            })
            .await
            .map_err(|e| run.wrap(ProvisioningStep::CreateIsolationBoundary, e))?;

        let installer = SchemaInstaller::new(
            self.connections.provider().as_ref(),
            self.connections.retry_policy(),
        );

        let indexes = run
            .step(ProvisioningStep::InitializeSchema, async {
                let report = installer
                    .apply(&conn, &boundary, &self.manifest)
                    .await
                    .map_err(|f| run_error(&tenant_id, ProvisioningStep::InitializeSchema, f))?;

                if self.strict_indexes && !report.is_clean() {
                    let names: Vec<&str> = report.failed.iter().map(|f| f.index.as_str()).collect();
                    return Err(run_error(
                        &tenant_id,
                        ProvisioningStep::InitializeSchema,
                        format!("index creation failed: {}", names.join(", ")),
                    ));
                }

                Ok(report)
            })
            .await;
        let indexes = match indexes {
            Ok(report) => report,
            Err(e) => return Err(self.rollback(&registry, &tenant_id, None, e).await),
        };

        let setup = run
            .step(ProvisioningStep::ValidateSetup, async {
                let setup = installer
                    .verify(&conn, &boundary, &self.manifest)
                    .await
                    .map_err(|e| run_error(&tenant_id, ProvisioningStep::ValidateSetup, e))?;

                if !setup.tables_complete() {
                    return Err(run_error(
                        &tenant_id,
                        ProvisioningStep::ValidateSetup,
                        format!("missing tables: {}", setup.missing_tables.join(", ")),
                    ));
                }

                if !setup.missing_indexes.is_empty() {
                    tracing::warn!(
                        missing_indexes = %setup.missing_indexes.join(", "),
                        "tenant provisioned without some indexes"
                    );
                }

                Ok(setup)
            })
            .await;
        let setup = match setup {
            Ok(setup) => setup,
            Err(e) => return Err(self.rollback(&registry, &tenant_id, None, e).await),
        };

        let display_name = match display_name.trim() {
            "" => tenant_id.to_string(),
            name => name.to_string(),
        };
        let record = TenantRecord::new(tenant_id.clone(), display_name, &boundary, created_by);

        let registered = run
            .step(ProvisioningStep::RegisterTenant, registry.register(&record))
            .await;
        match registered {
            Ok(()) => {}
            // A racing provisioner owns the row
            Err(e) if e.is_already_exists() => return Err(e),
            Err(e) => {
                let e = run.wrap(ProvisioningStep::RegisterTenant, e);
                return Err(self.rollback(&registry, &tenant_id, Some(&record), e).await);
            }
        }

        Ok(ProvisioningOutcome {
            record,
            indexes,
            missing_indexes: setup.missing_indexes,
            steps: std::mem::take(&mut run.steps),
        })
    }

    /// Best-effort, non-destructive cleanup. Returns `error` unchanged.
    async fn rollback(
        &self,
        registry: &TenantRegistry,
        tenant_id: &TenantId,
        written: Option<&TenantRecord>,
        error: TenantError,
    ) -> TenantError {
        if let Err(e) = self.connections.close_connection(tenant_id).await {
            tracing::warn!(error = %e, "rollback could not evict cached connection");
        }

        if let Some(record) = written {
            match registry.remove_partial(record).await {
                Ok(true) => tracing::info!("rollback removed partial registry row"),
                Ok(false) => tracing::debug!("rollback found no registry row of ours"),
                Err(e) => tracing::warn!(error = %e, "rollback could not remove registry row"),
            }
        }

        tracing::info!("isolation boundary retained after failed provisioning");
        error
    }
}

fn run_error(tenant_id: &TenantId, step: ProvisioningStep, err: impl fmt::Display) -> TenantError {
    TenantError::Provisioning {
        tenant_id: tenant_id.to_string(),
        step,
        message: err.to_string(),
    }
}

/// Per-run step bookkeeping.
struct Run {
    tenant_id: String,
    steps: Vec<StepReport>,
}

impl Run {
    fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            steps: Vec::with_capacity(ProvisioningStep::ALL.len()),
        }
    }

    async fn step<T, F>(&mut self, step: ProvisioningStep, fut: F) -> TenantResult<T>
    where
        F: Future<Output = TenantResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match &result {
            Ok(_) => tracing::info!(
                tenant_id = %self.tenant_id,
                step = %step,
                step_number = step.number(),
                elapsed_ms,
                "provisioning step completed"
            ),
            Err(e) => tracing::warn!(
                tenant_id = %self.tenant_id,
                step = %step,
                step_number = step.number(),
                elapsed_ms,
                error = %e,
                "provisioning step failed"
            ),
        }

        self.steps.push(StepReport {
            step,
            elapsed,
            succeeded: result.is_ok(),
        });
        result
    }

    /// Name the failing step on errors that do not already carry one.
    fn wrap(&self, step: ProvisioningStep, err: TenantError) -> TenantError {
        match err {
            TenantError::Provisioning { .. } | TenantError::TenantExists(_) => err,
            other => TenantError::Provisioning {
                tenant_id: self.tenant_id.clone(),
                step,
                message: other.to_string(),
            },
        }
    }
}
