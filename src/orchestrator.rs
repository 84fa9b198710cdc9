//! Run orchestration.
//!
//! An orchestrated run takes the snapshot lock, loads the last-applied
//! snapshot, builds the resource graph, diffs and plans it, asks for
//! confirmation, applies the plan and saves whatever succeeded. The lock is
//! renewed before the provider is touched and again before the snapshot is
//! written, and released on every exit path.

use tracing::{debug, info, warn};

use crate::config::{ResourceDecl, TopologyConfig, TopologyHasher};
use crate::error::Result;
use crate::graph::GraphBuilder;
use crate::planner::{ApplyReport, DiffEngine, PlanApplier, PlanSynthesizer, ProvisioningPlan};
use crate::provider::Provider;
use crate::state::{generate_holder_id, RunOperation, Snapshot, SnapshotStore};

/// Drives plan and apply runs for one topology.
pub struct Orchestrator<'a> {
    /// Topology configuration.
    config: &'a TopologyConfig,
    /// Snapshot store.
    store: &'a dyn SnapshotStore,
    /// Provider adapter.
    provider: &'a dyn Provider,
    /// Topology hasher.
    hasher: TopologyHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
}

/// Outcome of an orchestrated run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Nothing to do.
    UpToDate(ProvisioningPlan),
    /// The confirmation callback declined the plan.
    Cancelled(ProvisioningPlan),
    /// The plan was applied, fully or partially.
    Applied {
        /// The applied plan.
        plan: ProvisioningPlan,
        /// Per-step results.
        report: ApplyReport,
    },
}

impl RunOutcome {
    /// Returns the plan the run was based on.
    #[must_use]
    pub const fn plan(&self) -> &ProvisioningPlan {
        match self {
            Self::UpToDate(plan) | Self::Cancelled(plan) | Self::Applied { plan, .. } => plan,
        }
    }

    /// Returns the apply report, if the plan was applied.
    #[must_use]
    pub const fn report(&self) -> Option<&ApplyReport> {
        match self {
            Self::Applied { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Returns true unless an applied step failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report().is_none_or(|r| r.success)
    }

    /// Turns a partially applied run into the error of its failed step.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::StepFailed`](crate::error::ApplyError::StepFailed)
    /// if a step failed.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Applied { plan, report } => Ok(Self::Applied {
                plan,
                report: report.into_result()?,
            }),
            other => Ok(other),
        }
    }
}

impl<'a> Orchestrator<'a> {
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(
        config: &'a TopologyConfig,
        store: &'a dyn SnapshotStore,
        provider: &'a dyn Provider,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            hasher: TopologyHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Computes the plan for the configured topology without applying it.
    ///
    /// Read-only: the snapshot is not locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded or the topology
    /// cannot be planned.
    pub async fn plan(&self) -> Result<ProvisioningPlan> {
        let snapshot = self.load_snapshot().await?;
        let topology_hash = self.hasher.hash_topology(self.config);
        self.synthesize(&self.config.resources, &snapshot, &topology_hash)
    }

    /// Plans and applies the configured topology.
    ///
    /// `confirm` is called with the plan when it contains changes; returning
    /// false cancels the run before any provider call.
    ///
    /// # Errors
    ///
    /// Returns an error if locking, planning or saving fails, or if the plan
    /// violates guardrails. A failed step is reported in the outcome instead.
    pub async fn apply<F>(&self, confirm: F) -> Result<RunOutcome>
    where
        F: FnOnce(&ProvisioningPlan) -> bool + Send,
    {
        info!(
            "Applying {}/{}",
            self.config.project.name, self.config.project.environment
        );
        let topology_hash = self.hasher.hash_topology(self.config);
        self.locked_run(&self.config.resources, &topology_hash, RunOperation::Apply, confirm)
            .await
    }

    /// Deletes every resource recorded in the snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::apply`].
    pub async fn destroy<F>(&self, confirm: F) -> Result<RunOutcome>
    where
        F: FnOnce(&ProvisioningPlan) -> bool + Send,
    {
        info!(
            "Destroying {}/{}",
            self.config.project.name, self.config.project.environment
        );
        self.locked_run(&[], "", RunOperation::Destroy, confirm).await
    }

    /// Runs under the snapshot lock and always releases it.
    async fn locked_run<F>(
        &self,
        decls: &[ResourceDecl],
        topology_hash: &str,
        operation: RunOperation,
        confirm: F,
    ) -> Result<RunOutcome>
    where
        F: FnOnce(&ProvisioningPlan) -> bool + Send,
    {
        let holder = generate_holder_id();
        let lock = self.store.acquire_lock(&holder).await?;
        debug!("Acquired snapshot lock {}", lock.lock_id);

        let outcome = self
            .run(decls, topology_hash, operation, &lock.lock_id, confirm)
            .await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release snapshot lock {}: {e}", lock.lock_id);
        } else {
            debug!("Released snapshot lock {}", lock.lock_id);
        }

        outcome
    }

    async fn run<F>(
        &self,
        decls: &[ResourceDecl],
        topology_hash: &str,
        operation: RunOperation,
        lock_id: &str,
        confirm: F,
    ) -> Result<RunOutcome>
    where
        F: FnOnce(&ProvisioningPlan) -> bool + Send,
    {
        let mut snapshot = self.load_snapshot().await?;
        let plan = self.synthesize(decls, &snapshot, topology_hash)?;

        if plan.is_empty() {
            info!("No changes required");
            if snapshot.topology_hash != topology_hash {
                // Dependency-only edits change the hash but not any property.
                for step in &plan.steps {
                    snapshot.refresh_dependencies(&step.node);
                }
                snapshot.topology_hash = topology_hash.to_string();
                self.store.renew_lock(lock_id).await?;
                self.store.save(&snapshot).await?;
            }
            return Ok(RunOutcome::UpToDate(plan));
        }

        if !confirm(&plan) {
            info!("Run cancelled");
            return Ok(RunOutcome::Cancelled(plan));
        }

        // Confirmation may have waited on a human; make sure the lease survived.
        self.store.renew_lock(lock_id).await?;

        let report = PlanApplier::new(self.provider)
            .with_operation(operation)
            .apply(&plan, &mut snapshot)
            .await?;

        self.store.renew_lock(lock_id).await?;
        self.store.save(&snapshot).await?;
        info!("Snapshot saved ({} resources)", snapshot.len());

        Ok(RunOutcome::Applied { plan, report })
    }

    /// Loads the snapshot, or starts an empty one.
    async fn load_snapshot(&self) -> Result<Snapshot> {
        let snapshot = self.store.load().await?.unwrap_or_else(|| {
            debug!("No snapshot found, starting from an empty one");
            Snapshot::new(&self.config.project.name, &self.config.project.environment)
        });
        Ok(snapshot)
    }

    fn synthesize(
        &self,
        decls: &[ResourceDecl],
        snapshot: &Snapshot,
        topology_hash: &str,
    ) -> Result<ProvisioningPlan> {
        let graph = GraphBuilder::new().build(decls)?;
        let diff = self.diff_engine.compute_diff(&graph, Some(snapshot));

        if diff.has_changes() {
            info!(
                "Diff: {} creates, {} updates, {} deletes, {} unchanged",
                diff.creates, diff.updates, diff.deletes, diff.unchanged
            );
        } else {
            debug!("All {} resources match the snapshot", diff.unchanged);
        }

        let plan = PlanSynthesizer::new()
            .with_guardrails(self.config.guardrails.clone())
            .synthesize(&graph, &diff, Some(snapshot), topology_hash)?;
        Ok(plan)
    }
}

impl std::fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("project", &self.config.project.name)
            .field("store", &self.store.backend_type())
            .field("provider", &self.provider.provider_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, ResourceDecl};
    use crate::error::{ApplyError, StackplanError, StateError};
    use crate::graph::ResourceKind;
    use crate::planner::ActionType;
    use crate::provider::LocalProvider;
    use crate::state::{LocalSnapshotStore, LockInfo};
    use tempfile::TempDir;

    const TOPOLOGY: &str = r"
project:
  name: xray-tracing
  environment: dev
resources:
  - id: net
    kind: network
    properties:
      nat_gateways: 1
  - id: db
    kind: database
    depends_on: [net]
    properties:
      engine: aurora-mysql
  - id: task
    kind: task_definition
    properties:
      memory_mib: 1024
    wiring:
      - property: rds_hostname
        from: db
        output: endpoint
  - id: svc
    kind: service
    depends_on: [net, task]
";

    fn config(yaml: &str) -> TopologyConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("config")
    }

    fn fixture() -> (TempDir, LocalSnapshotStore, LocalProvider) {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalSnapshotStore::with_base_dir(dir.path());
        let provider = LocalProvider::with_dir(dir.path());
        (dir, store, provider)
    }

    #[tokio::test]
    async fn test_apply_then_reapply_is_up_to_date() {
        let (_dir, store, provider) = fixture();
        let config = config(TOPOLOGY);
        let orchestrator = Orchestrator::new(&config, &store, &provider);

        let first = orchestrator.apply(|_| true).await.expect("first apply");
        assert!(first.is_success());
        assert_eq!(first.plan().order(), vec!["net", "db", "task", "svc"]);
        assert_eq!(first.plan().create_count(), 4);

        let snapshot = store.load().await.expect("load").expect("snapshot");
        assert_eq!(snapshot.len(), 4);
        assert!(!snapshot.topology_hash.is_empty());
        assert!(!store.is_locked().await.expect("lock state"));

        let second = orchestrator.apply(|_| panic!("nothing to confirm")).await.expect("second");
        assert!(matches!(second, RunOutcome::UpToDate(_)));
        assert!(second
            .plan()
            .steps
            .iter()
            .all(|s| s.action == ActionType::NoOp));
    }

    #[tokio::test]
    async fn test_plan_is_read_only() {
        let (_dir, store, provider) = fixture();
        let config = config(TOPOLOGY);
        let orchestrator = Orchestrator::new(&config, &store, &provider);

        let plan = orchestrator.plan().await.expect("plan");
        assert_eq!(plan.create_count(), 4);
        assert!(store.load().await.expect("load").is_none());
        assert_eq!(provider.resource_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_changes_nothing() {
        let (_dir, store, provider) = fixture();
        let config = config(TOPOLOGY);
        let orchestrator = Orchestrator::new(&config, &store, &provider);

        let outcome = orchestrator.apply(|_| false).await.expect("apply");
        assert!(matches!(outcome, RunOutcome::Cancelled(_)));
        assert!(store.load().await.expect("load").is_none());
        assert!(!store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_removed_resource_is_deleted() {
        let (_dir, store, provider) = fixture();
        let full = config(TOPOLOGY);
        Orchestrator::new(&full, &store, &provider)
            .apply(|_| true)
            .await
            .expect("apply");

        let mut reduced = full.clone();
        reduced.resources.retain(|r| r.id != "svc");
        let outcome = Orchestrator::new(&reduced, &store, &provider)
            .apply(|_| true)
            .await
            .expect("apply");

        assert_eq!(outcome.plan().delete_count(), 1);
        assert!(outcome.is_success());
        assert_eq!(provider.resource_count().await.expect("count"), 3);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let (_dir, store, provider) = fixture();
        let config = config(TOPOLOGY);
        let orchestrator = Orchestrator::new(&config, &store, &provider);
        orchestrator.apply(|_| true).await.expect("apply");

        let outcome = orchestrator.destroy(|_| true).await.expect("destroy");
        assert_eq!(outcome.plan().order(), vec!["svc", "task", "db", "net"]);
        assert!(outcome.is_success());

        let snapshot = store.load().await.expect("load").expect("snapshot");
        assert!(snapshot.is_empty());
        assert_eq!(
            snapshot.history.last().map(|h| h.operation),
            Some(RunOperation::Destroy)
        );
        assert_eq!(provider.resource_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_guardrails_abort_and_release_lock() {
        let (_dir, store, provider) = fixture();
        let config = config(TOPOLOGY);
        Orchestrator::new(&config, &store, &provider)
            .apply(|_| true)
            .await
            .expect("apply");

        let mut guarded = config.clone();
        guarded.guardrails = Some(crate::config::GuardrailsConfig {
            max_deletes: Some(1),
            ..Default::default()
        });
        let err = Orchestrator::new(&guarded, &store, &provider)
            .destroy(|_| true)
            .await
            .expect_err("guardrails");

        assert!(matches!(
            err,
            StackplanError::Apply(ApplyError::Aborted { .. })
        ));
        assert!(!store.is_locked().await.expect("lock state"));
        assert_eq!(provider.resource_count().await.expect("count"), 4);
    }

    const UNWIRED: &str = r"
project:
  name: xray-tracing
  environment: dev
resources:
  - id: db
    kind: database
  - id: task
    kind: task_definition
    depends_on: [db]
";

    #[tokio::test]
    async fn test_wiring_only_edits_reach_the_provider() {
        let (_dir, store, provider) = fixture();
        let unwired = config(UNWIRED);
        Orchestrator::new(&unwired, &store, &provider)
            .apply(|_| true)
            .await
            .expect("first apply");

        let wire_to = |output: &str| {
            let mut wired = unwired.clone();
            wired.resources[1] = ResourceDecl::new("task", ResourceKind::TaskDefinition)
                .wire("rds_hostname", "db", output);
            wired
        };

        for output in ["endpoint", "port"] {
            let wired = wire_to(output);
            let outcome = Orchestrator::new(&wired, &store, &provider)
                .apply(|_| true)
                .await
                .expect("rewire");
            assert!(matches!(outcome, RunOutcome::Applied { .. }), "{output}");
            assert!(outcome.is_success());
            let task = outcome.plan().step("task").expect("task step");
            assert_eq!(task.action, ActionType::Update);
            assert_eq!(outcome.plan().update_count(), 1);

            let snapshot = store.load().await.expect("load").expect("snapshot");
            let record = snapshot.get("task").expect("task record");
            assert_eq!(record.wiring.len(), 1);
            assert_eq!(record.wiring[0].output, output);
        }

        let again = Orchestrator::new(&wire_to("port"), &store, &provider)
            .apply(|_| panic!("nothing to confirm"))
            .await
            .expect("reapply");
        assert!(matches!(again, RunOutcome::UpToDate(_)));
    }

    #[tokio::test]
    async fn test_lock_taken_over_during_confirmation_stops_run() {
        let (dir, store, provider) = fixture();
        let config = config(TOPOLOGY);
        let lock_path = dir.path().join("snapshot.lock");
        let intruder = LockInfo::new("other-run");
        let document = intruder.encode().expect("encode");

        let err = Orchestrator::new(&config, &store, &provider)
            .apply(move |_| {
                std::fs::write(&lock_path, &document).expect("replace lock");
                true
            })
            .await
            .expect_err("lock lost");

        assert!(matches!(err, StackplanError::State(StateError::LockLost { .. })));
        assert!(store.load().await.expect("load").is_none());
        assert_eq!(provider.resource_count().await.expect("count"), 0);
        let holder = store.get_lock_info().await.expect("lock info").map(|l| l.lock_id);
        assert_eq!(holder, Some(intruder.lock_id));
    }

    #[tokio::test]
    async fn test_failed_step_becomes_step_failed_error() {
        let (_dir, store, provider) = fixture();
        let config = config(TOPOLOGY);
        Orchestrator::new(&config, &store, &provider)
            .apply(|_| true)
            .await
            .expect("first apply");

        // The local provider refuses in-place kind changes.
        let mut changed = config.clone();
        changed.resources[1].kind = ResourceKind::Role;
        let outcome = Orchestrator::new(&changed, &store, &provider)
            .apply(|_| true)
            .await
            .expect("run completes");
        assert!(!outcome.is_success());

        let err = outcome.into_result().expect_err("failed step");
        assert!(matches!(
            err,
            StackplanError::Apply(ApplyError::StepFailed { resource, .. }) if resource == "db"
        ));
    }

    #[tokio::test]
    async fn test_held_lock_blocks_apply() {
        let (_dir, store, provider) = fixture();
        let config = config(TOPOLOGY);
        let lock = store.acquire_lock("someone-else").await.expect("lock");

        let result = Orchestrator::new(&config, &store, &provider)
            .apply(|_| true)
            .await;
        assert!(result.is_err());

        store.release_lock(&lock.lock_id).await.expect("release");
    }
}
