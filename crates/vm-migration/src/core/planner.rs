//! Migration planning passes.

use log::{debug, info, warn};

use crate::core::collaborators::ClusterServices;
use crate::core::config::MigrationConfig;
use crate::core::destination::find_destination;
use crate::core::error::{MigrationError, MigrationResult};
use crate::core::ledger::{MigrationDecision, UsageLedger};
use crate::core::migration_policies::consolidation_overcommit::ConsolidationOvercommit;
use crate::core::migration_policies::overcommit::Overcommit;
use crate::core::migration_policy::{policy_for_kind, MigrationPolicy, MigrationPolicyKind};
use crate::core::usage::{NodeUsage, VmUsage};

/// Finds destination for a single VM using the overcommit policy and a fresh usage snapshot.
///
/// The snapshot and the decision are discarded after the call.
pub fn find_destination_single_run<S: ClusterServices + ?Sized>(vm: &str, services: &S) -> MigrationResult<String> {
    let policy = Overcommit::new();
    let mut ledger = services.compute_usage_snapshot().map_err(MigrationError::Snapshot)?;
    find_destination(vm, &policy, &mut ledger, services)
}

/// Returns the number of migrations a planning pass may produce, `None` means unlimited.
///
/// Manual passes and passes without configured throttle are unlimited. Otherwise the throttle is reduced by the number
/// of migrations which are already running.
pub fn migration_budget(ledger: &UsageLedger, is_manual: bool, throttle: Option<usize>) -> Option<usize> {
    if is_manual {
        return None;
    }
    throttle.map(|throttle| throttle.saturating_sub(ledger.running_migrations()))
}

/// Plans migrations of the specified kind over a fresh usage snapshot.
///
/// Consolidation is preceded by a consolidation overcommit pass over the same snapshot. Returns the decisions in the
/// order they were made.
pub fn plan_migrations<S: ClusterServices + ?Sized>(
    kind: MigrationPolicyKind,
    is_manual: bool,
    services: &S,
    config: &MigrationConfig,
) -> MigrationResult<Vec<MigrationDecision>> {
    let mut ledger = services.compute_usage_snapshot().map_err(MigrationError::Snapshot)?;

    let mut budget = migration_budget(&ledger, is_manual, config.migration_throttle);
    if budget == Some(0) {
        info!("migration throttle reached, no {} migrations planned", kind);
        return Ok(Vec::new());
    }

    if kind == MigrationPolicyKind::Consolidation {
        plan_typed_migrations(&ConsolidationOvercommit::new(), is_manual, &mut budget, &mut ledger, services)?;
    }
    let policy = policy_for_kind(kind);
    plan_typed_migrations(policy.as_ref(), is_manual, &mut budget, &mut ledger, services)?;

    let decisions = ledger.into_intended().into_vec();
    info!("planned {} migrations ({})", decisions.len(), kind);
    Ok(decisions)
}

fn budget_exhausted(budget: &Option<usize>) -> bool {
    *budget == Some(0)
}

/// Runs a single planning pass of the policy, recording decisions in the ledger.
///
/// Failures to place a single VM are logged and the pass continues, only internal inconsistencies abort it.
pub fn plan_typed_migrations<S: ClusterServices + ?Sized>(
    policy: &dyn MigrationPolicy,
    is_manual: bool,
    budget: &mut Option<usize>,
    ledger: &mut UsageLedger,
    services: &S,
) -> MigrationResult<()> {
    let mut sources: Vec<&NodeUsage> = ledger.nodes().collect();
    sources.sort_by(|a, b| policy.order_nodes(a, b));
    let sources: Vec<String> = sources.into_iter().map(|node| node.name.clone()).collect();
    debug!("{} pass over {} nodes", policy.kind(), sources.len());

    for source in sources {
        if budget_exhausted(budget) {
            debug!("migration budget exhausted");
            break;
        }
        let node = source_usage(ledger, &source)?;
        if policy.migrations_done(ledger, node) {
            debug!("{} pass done before node '{}'", policy.kind(), source);
            break;
        }
        if node.vms.is_empty() {
            continue;
        }
        if let Err(e) = policy.node_setup(ledger, node) {
            debug!("skipping node: {}", e);
            continue;
        }

        let mut vms: Vec<&VmUsage> = node.vms.iter().filter_map(|name| ledger.vm(name)).collect();
        vms.sort_by(|a, b| policy.order_vms(a, b));
        let vms: Vec<String> = vms.into_iter().map(|vm| vm.name.clone()).collect();

        for vm_name in vms {
            if budget_exhausted(budget) {
                break;
            }
            let node = source_usage(ledger, &source)?;
            let vm = ledger
                .vm(&vm_name)
                .ok_or_else(|| MigrationError::InternalInconsistency(format!("usage of vm '{}' disappeared", vm_name)))?;
            if policy.migrations_done_for_node(ledger, node, vm) {
                break;
            }
            if !is_eligible(vm, is_manual, ledger) {
                continue;
            }

            match find_destination(&vm_name, policy, ledger, services) {
                Ok(_) => {
                    if let Some(budget) = budget.as_mut() {
                        *budget = budget.saturating_sub(1);
                    }
                }
                Err(e @ MigrationError::InternalInconsistency(_)) => return Err(e),
                Err(e @ MigrationError::NoDestinationAvailable { .. }) => debug!("{}", e),
                Err(e) => warn!("{}", e),
            }
        }

        let reverted = policy.node_teardown(ledger, &source)?;
        if reverted > 0 {
            debug!("reverted {} migrations from node '{}'", reverted, source);
            if let Some(budget) = budget.as_mut() {
                *budget += reverted;
            }
        }
    }
    Ok(())
}

/// Returns true if the VM can be picked by a planning pass.
///
/// Load of a VM which reports neither CPUs nor memory is unknown, such VMs are moved by manual passes only.
fn is_eligible(vm: &VmUsage, is_manual: bool, ledger: &UsageLedger) -> bool {
    if !vm.migratable || ledger.is_migrating(vm) {
        return false;
    }
    is_manual || vm.cpu_allocated > 0 || vm.memory_allocated > 0
}

fn source_usage<'a>(ledger: &'a UsageLedger, source: &str) -> MigrationResult<&'a NodeUsage> {
    ledger
        .node(source)
        .ok_or_else(|| MigrationError::InternalInconsistency(format!("usage of node '{}' disappeared", source)))
}
