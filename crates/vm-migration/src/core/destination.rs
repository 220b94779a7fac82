//! Selection of migration destination for a VM.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use log::{debug, info};

use crate::core::collaborators::{ClusterServices, JobGuard, RepresentativeJob};
use crate::core::error::{MigrationError, MigrationResult};
use crate::core::ledger::{MigrationDecision, UsageLedger};
use crate::core::migration_policy::MigrationPolicy;
use crate::core::overcommit::overcommit_violation;
use crate::core::usage::{NodeUsage, PowerState, VmUsage};

/// Reason why a node was rejected as a migration destination.
///
/// Variants are declared in the order reasons are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectReason {
    /// Node would exceed its thresholds with the VM added.
    Overcommit,
    /// VM does not fit into the feasibility window because of a reservation.
    Reservation,
    /// Node is powered off.
    Power,
    /// Node cannot host the VM.
    Hypervisor,
    /// Node lacks features required by the VM.
    Feature,
    /// Migration policy forbids the node.
    Policy,
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RejectReason::Overcommit => write!(f, "Overcommit"),
            RejectReason::Reservation => write!(f, "Reservation"),
            RejectReason::Power => write!(f, "Power"),
            RejectReason::Hypervisor => write!(f, "Hypervisor"),
            RejectReason::Feature => write!(f, "Feature"),
            RejectReason::Policy => write!(f, "Policy"),
        }
    }
}

/// Set of rejection reasons collected over all candidate nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RejectReasons {
    reasons: BTreeSet<RejectReason>,
}

impl RejectReasons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reason: RejectReason) {
        self.reasons.insert(reason);
    }

    pub fn contains(&self, reason: RejectReason) -> bool {
        self.reasons.contains(&reason)
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RejectReason> + '_ {
        self.reasons.iter().copied()
    }
}

impl FromIterator<RejectReason> for RejectReasons {
    fn from_iter<T: IntoIterator<Item = RejectReason>>(iter: T) -> Self {
        Self {
            reasons: iter.into_iter().collect(),
        }
    }
}

impl Display for RejectReasons {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let names: Vec<String> = self.reasons.iter().map(|reason| reason.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Finds destination for the VM according to the migration policy.
///
/// Candidates are all ledger nodes except the current node of the VM, examined in the policy destination order.
/// The first acceptable node is returned: the VM demand stays added to its usage, is subtracted from the source
/// usage and the decision is recorded in the intended migrations. Usages of rejected nodes are left as they were
/// before the call. A VM with a running or intended migration is refused without examining candidates.
pub fn find_destination<S: ClusterServices + ?Sized>(
    vm_name: &str,
    policy: &dyn MigrationPolicy,
    ledger: &mut UsageLedger,
    services: &S,
) -> MigrationResult<String> {
    let vm = ledger
        .vm(vm_name)
        .cloned()
        .ok_or_else(|| MigrationError::VmNotFound(vm_name.to_string()))?;
    if let Some(destination) = ledger.current_destination(&vm) {
        return Err(MigrationError::AlreadyMigrating {
            vm: vm.name.clone(),
            destination: destination.to_string(),
        });
    }

    let mut candidates: Vec<&NodeUsage> = ledger.nodes().filter(|node| node.name != vm.node).collect();
    if candidates.is_empty() {
        return Err(MigrationError::NoCandidates(vm.name));
    }
    candidates.sort_by(|a, b| policy.order_destinations(a, b));
    let candidates: Vec<String> = candidates.into_iter().map(|node| node.name.clone()).collect();

    let job = services
        .build_representative_job(&vm.name)
        .map_err(|reason| MigrationError::ConstructionFailure {
            vm: vm.name.clone(),
            reason,
        })?;
    let guard = JobGuard::new(services, job);

    let mut reasons = RejectReasons::new();
    for node in candidates {
        match evaluate_candidate(&vm, &node, policy, ledger, services, guard.job())? {
            Some(reason) => {
                reasons.insert(reason);
            }
            None => {
                ledger.commit_migration(MigrationDecision {
                    vm: vm.name.clone(),
                    source: vm.node.clone(),
                    destination: node.clone(),
                    policy: policy.kind(),
                })?;
                info!(
                    "vm '{}' will be migrated from '{}' to '{}' ({})",
                    vm.name,
                    vm.node,
                    node,
                    policy.kind()
                );
                return Ok(node);
            }
        }
    }

    debug!("no destination for vm '{}': {}", vm.name, reasons);
    Err(MigrationError::NoDestinationAvailable { vm: vm.name, reasons })
}

/// Checks the candidate node, returns the rejection reason or `None` if the node is accepted.
///
/// The accepted node keeps the VM demand added to its usage.
fn evaluate_candidate<S: ClusterServices + ?Sized>(
    vm: &VmUsage,
    node: &str,
    policy: &dyn MigrationPolicy,
    ledger: &mut UsageLedger,
    services: &S,
    job: &RepresentativeJob,
) -> MigrationResult<Option<RejectReason>> {
    if !services.is_valid_migration_destination(&vm.name, node) {
        debug!("node '{}' is not a valid destination for vm '{}'", node, vm.name);
        return Ok(Some(RejectReason::Hypervisor));
    }
    if !services.check_feature_compatibility(job, node) {
        debug!("node '{}' lacks features required by vm '{}'", node, vm.name);
        return Ok(Some(RejectReason::Feature));
    }
    if services.power_state(node) == PowerState::Off {
        debug!("node '{}' is powered off", node);
        return Ok(Some(RejectReason::Power));
    }

    let usage = ledger
        .node(node)
        .ok_or_else(|| MigrationError::InternalInconsistency(format!("usage of node '{}' disappeared", node)))?;
    if !policy.node_can_be_destination(ledger, usage, vm) {
        debug!("{} policy does not allow migration of vm '{}' to '{}'", policy.kind(), vm.name, node);
        return Ok(Some(RejectReason::Policy));
    }

    let snapshot = usage.clone();
    let usage = ledger
        .node_mut(node)
        .ok_or_else(|| MigrationError::InternalInconsistency(format!("usage of node '{}' disappeared", node)))?;
    usage.add_vm(vm);
    if let Some(violation) = overcommit_violation(usage, true) {
        debug!("node '{}' would be overcommitted with vm '{}': {}", node, vm.name, violation);
        ledger.restore_node(snapshot)?;
        return Ok(Some(RejectReason::Overcommit));
    }

    let now = services.current_time();
    match services.check_feasibility_window(job, node, now, services.feasibility_horizon()) {
        Ok(window) if window.blocking_reservation.is_none() && window.earliest_start == now => Ok(None),
        Ok(window) => {
            debug!(
                "vm '{}' cannot start on node '{}' before {} (reservation {:?})",
                vm.name, node, window.earliest_start, window.blocking_reservation
            );
            ledger.restore_node(snapshot)?;
            Ok(Some(RejectReason::Reservation))
        }
        Err(e) => {
            debug!("cannot check feasibility of vm '{}' on node '{}': {}", vm.name, node, e);
            ledger.restore_node(snapshot)?;
            Ok(Some(RejectReason::Reservation))
        }
    }
}
