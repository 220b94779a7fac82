//! Consolidation policy.

use std::cmp::Ordering;

use log::debug;

use crate::core::error::{MigrationError, MigrationResult};
use crate::core::ledger::UsageLedger;
use crate::core::migration_policy::{MigrationPolicy, MigrationPolicyKind};
use crate::core::ordering::{order_nodes_high_to_low_load, order_nodes_low_to_high_load, order_vms_big_to_small};
use crate::core::usage::{NodeUsage, VmUsage};

/// Tries to empty the least loaded nodes by packing their VMs onto the most loaded ones.
///
/// A node is worth emptying only if all of its VMs leave, so decisions made for a node are reverted when some VM
/// stays on it. Nodes which receive VMs are never emptied, and VMs are never moved to nodes which are going to be
/// empty.
pub struct Consolidation;

impl Consolidation {
    pub fn new() -> Self {
        Self {}
    }
}

impl MigrationPolicy for Consolidation {
    fn kind(&self) -> MigrationPolicyKind {
        MigrationPolicyKind::Consolidation
    }

    fn order_nodes(&self, a: &NodeUsage, b: &NodeUsage) -> Ordering {
        order_nodes_low_to_high_load(a, b)
    }

    fn order_vms(&self, a: &VmUsage, b: &VmUsage) -> Ordering {
        order_vms_big_to_small(a, b)
    }

    fn order_destinations(&self, a: &NodeUsage, b: &NodeUsage) -> Ordering {
        order_nodes_high_to_low_load(a, b)
    }

    fn migrations_done(&self, _ledger: &UsageLedger, _next_source: &NodeUsage) -> bool {
        false
    }

    fn migrations_done_for_node(&self, _ledger: &UsageLedger, _source: &NodeUsage, _next_vm: &VmUsage) -> bool {
        false
    }

    fn node_setup(&self, ledger: &UsageLedger, source: &NodeUsage) -> MigrationResult<()> {
        if ledger.has_inbound_vms(&source.name) {
            return Err(MigrationError::SourceRejected {
                node: source.name.clone(),
                reason: "node is a migration destination".to_string(),
            });
        }
        Ok(())
    }

    fn node_teardown(&self, ledger: &mut UsageLedger, source: &str) -> MigrationResult<usize> {
        let node = ledger.node(source).ok_or_else(|| {
            MigrationError::InternalInconsistency(format!("cannot find usage of source node '{}'", source))
        })?;
        if !ledger.has_staying_vms(node) && !ledger.has_inbound_vms(source) {
            return Ok(0);
        }

        let reverted: Vec<String> = ledger
            .intended()
            .iter()
            .filter(|decision| decision.source == source && decision.policy == MigrationPolicyKind::Consolidation)
            .map(|decision| decision.vm.clone())
            .collect();
        for vm in reverted.iter() {
            let decision = ledger.revert_migration(vm)?;
            debug!(
                "reverted migration of vm '{}' from '{}' to '{}': node '{}' cannot be emptied",
                decision.vm, decision.source, decision.destination, source
            );
        }
        Ok(reverted.len())
    }

    fn node_can_be_destination(&self, ledger: &UsageLedger, candidate: &NodeUsage, _vm: &VmUsage) -> bool {
        ledger.has_staying_vms(candidate) || ledger.has_inbound_vms(&candidate.name)
    }
}
