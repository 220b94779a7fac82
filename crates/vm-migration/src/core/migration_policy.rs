//! VM migration policies.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{MigrationError, MigrationResult};
use crate::core::ledger::UsageLedger;
use crate::core::migration_policies::consolidation::Consolidation;
use crate::core::migration_policies::consolidation_overcommit::ConsolidationOvercommit;
use crate::core::migration_policies::overcommit::Overcommit;
use crate::core::usage::{NodeUsage, VmUsage};

/// Kind of migration policy, also used to tag migration decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationPolicyKind {
    Consolidation,
    Overcommit,
    ConsolidationOvercommit,
}

impl Display for MigrationPolicyKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MigrationPolicyKind::Consolidation => write!(f, "Consolidation"),
            MigrationPolicyKind::Overcommit => write!(f, "Overcommit"),
            MigrationPolicyKind::ConsolidationOvercommit => write!(f, "ConsolidationOvercommit"),
        }
    }
}

impl FromStr for MigrationPolicyKind {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Consolidation" => Ok(MigrationPolicyKind::Consolidation),
            "Overcommit" => Ok(MigrationPolicyKind::Overcommit),
            "ConsolidationOvercommit" => Ok(MigrationPolicyKind::ConsolidationOvercommit),
            _ => Err(MigrationError::UnknownPolicy(s.to_string())),
        }
    }
}

/// Trait for implementation of VM migration policies.
///
/// The policy defines in which order source nodes, VMs and destination nodes are examined by a planning pass, when
/// the pass stops, and which nodes may take part in it. Comparators put the element which should be processed first
/// at the front when passed to `sort_by`.
///
/// Policies hold no state, all planning state lives in the [`UsageLedger`] passed to the hooks.
pub trait MigrationPolicy {
    fn kind(&self) -> MigrationPolicyKind;

    /// Order of source nodes.
    fn order_nodes(&self, a: &NodeUsage, b: &NodeUsage) -> Ordering;

    /// Order of VMs on a source node.
    fn order_vms(&self, a: &VmUsage, b: &VmUsage) -> Ordering;

    /// Order of candidate destinations.
    fn order_destinations(&self, a: &NodeUsage, b: &NodeUsage) -> Ordering;

    /// Returns true if the pass should stop before processing the next source node.
    fn migrations_done(&self, ledger: &UsageLedger, next_source: &NodeUsage) -> bool;

    /// Returns true if no more VMs should be migrated from the source node.
    fn migrations_done_for_node(&self, ledger: &UsageLedger, source: &NodeUsage, next_vm: &VmUsage) -> bool;

    /// Called before VMs of the source node are processed, an error skips the node.
    fn node_setup(&self, _ledger: &UsageLedger, _source: &NodeUsage) -> MigrationResult<()> {
        Ok(())
    }

    /// Called after VMs of the source node are processed, may revert decisions made for the node.
    ///
    /// Returns the number of reverted decisions.
    fn node_teardown(&self, _ledger: &mut UsageLedger, _source: &str) -> MigrationResult<usize> {
        Ok(0)
    }

    /// Returns false if the policy forbids migrating the VM to the candidate node.
    fn node_can_be_destination(&self, _ledger: &UsageLedger, _candidate: &NodeUsage, _vm: &VmUsage) -> bool {
        true
    }
}

/// Creates policy of the specified kind.
pub fn policy_for_kind(kind: MigrationPolicyKind) -> Box<dyn MigrationPolicy> {
    match kind {
        MigrationPolicyKind::Consolidation => Box::new(Consolidation::new()),
        MigrationPolicyKind::Overcommit => Box::new(Overcommit::new()),
        MigrationPolicyKind::ConsolidationOvercommit => Box::new(ConsolidationOvercommit::new()),
    }
}

/// Creates policy by its name.
pub fn migration_policy_resolver(config_str: &str) -> MigrationResult<Box<dyn MigrationPolicy>> {
    Ok(policy_for_kind(config_str.parse()?))
}
