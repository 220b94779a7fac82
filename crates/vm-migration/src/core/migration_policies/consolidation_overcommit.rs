//! Consolidation overcommit policy.

use std::cmp::Ordering;

use crate::core::ledger::UsageLedger;
use crate::core::migration_policy::{MigrationPolicy, MigrationPolicyKind};
use crate::core::ordering::{order_nodes_high_to_low_load, order_nodes_most_overcommitted, order_vms_big_to_small};
use crate::core::overcommit::is_overcommitted;
use crate::core::usage::{NodeUsage, VmUsage};

/// Relieves overcommitted nodes like [`Overcommit`](super::overcommit::Overcommit), but moves VMs to the most loaded
/// nodes which can still take them.
///
/// Runs before the consolidation pass so that consolidation starts from a cluster without overcommitted nodes.
pub struct ConsolidationOvercommit;

impl ConsolidationOvercommit {
    pub fn new() -> Self {
        Self {}
    }
}

impl MigrationPolicy for ConsolidationOvercommit {
    fn kind(&self) -> MigrationPolicyKind {
        MigrationPolicyKind::ConsolidationOvercommit
    }

    fn order_nodes(&self, a: &NodeUsage, b: &NodeUsage) -> Ordering {
        order_nodes_most_overcommitted(a, b)
    }

    fn order_vms(&self, a: &VmUsage, b: &VmUsage) -> Ordering {
        order_vms_big_to_small(a, b)
    }

    fn order_destinations(&self, a: &NodeUsage, b: &NodeUsage) -> Ordering {
        order_nodes_high_to_low_load(a, b)
    }

    fn migrations_done(&self, _ledger: &UsageLedger, next_source: &NodeUsage) -> bool {
        !is_overcommitted(next_source, false)
    }

    fn migrations_done_for_node(&self, _ledger: &UsageLedger, source: &NodeUsage, _next_vm: &VmUsage) -> bool {
        !is_overcommitted(source, false)
    }
}
