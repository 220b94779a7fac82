//! Usage ledger of a planning pass.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::core::error::{MigrationError, MigrationResult};
use crate::core::migration_policy::MigrationPolicyKind;
use crate::core::usage::{NodeUsage, VmUsage};

/// Tentative decision to migrate a VM, produced during a planning pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MigrationDecision {
    pub vm: String,
    pub source: String,
    pub destination: String,
    /// Policy which produced the decision.
    pub policy: MigrationPolicyKind,
}

/// Migration decisions keyed by VM name, in the order they were made.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IntendedMigrations {
    decisions: IndexMap<String, MigrationDecision>,
}

impl IntendedMigrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the decision made for the specified VM.
    pub fn get(&self, vm: &str) -> Option<&MigrationDecision> {
        self.decisions.get(vm)
    }

    pub fn contains(&self, vm: &str) -> bool {
        self.decisions.contains_key(vm)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Returns an iterator over decisions in the order they were made.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationDecision> {
        self.decisions.values()
    }

    /// Converts into a list of decisions in the order they were made.
    pub fn into_vec(self) -> Vec<MigrationDecision> {
        self.decisions.into_values().collect()
    }

    fn insert(&mut self, decision: MigrationDecision) {
        self.decisions.insert(decision.vm.clone(), decision);
    }

    fn remove(&mut self, vm: &str) -> Option<MigrationDecision> {
        self.decisions.shift_remove(vm)
    }
}

/// Stores node and VM usages together with the migrations intended so far.
///
/// Every intended migration is reflected in node usages: the VM demand is added to the destination and subtracted
/// from the source. Decisions are committed and reverted only through [`commit_migration`](Self::commit_migration)
/// and [`revert_migration`](Self::revert_migration), which keep this invariant.
#[derive(Clone, Debug, Default)]
pub struct UsageLedger {
    nodes: BTreeMap<String, NodeUsage>,
    vms: BTreeMap<String, VmUsage>,
    intended: IntendedMigrations,
    // demand actually removed from the source of each intended migration
    released: BTreeMap<String, VmUsage>,
}

impl UsageLedger {
    /// Creates empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds node usage (replaces the existing one with the same name).
    pub fn add_node(&mut self, usage: NodeUsage) {
        self.nodes.insert(usage.name.clone(), usage);
    }

    /// Adds VM usage (replaces the existing one with the same name).
    pub fn add_vm(&mut self, usage: VmUsage) {
        self.vms.insert(usage.name.clone(), usage);
    }

    pub fn node(&self, name: &str) -> Option<&NodeUsage> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut NodeUsage> {
        self.nodes.get_mut(name)
    }

    pub fn vm(&self, name: &str) -> Option<&VmUsage> {
        self.vms.get(name)
    }

    /// Returns an iterator over node usages ordered by node name.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeUsage> {
        self.nodes.values()
    }

    /// Returns an iterator over VM usages ordered by VM name.
    pub fn vms(&self) -> impl Iterator<Item = &VmUsage> {
        self.vms.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn intended(&self) -> &IntendedMigrations {
        &self.intended
    }

    /// Consumes the ledger and returns the intended migrations.
    pub fn into_intended(self) -> IntendedMigrations {
        self.intended
    }

    /// Returns the node the VM is going to, either by an already running migration or by an intended one.
    pub fn current_destination<'a>(&'a self, vm: &'a VmUsage) -> Option<&'a str> {
        vm.migrating_to
            .as_deref()
            .or_else(|| self.intended.get(&vm.name).map(|decision| decision.destination.as_str()))
    }

    /// Returns true if the VM has a running or intended migration.
    pub fn is_migrating(&self, vm: &VmUsage) -> bool {
        self.current_destination(vm).is_some()
    }

    /// Returns true if some VM from another node is migrating (or intended to migrate) to the specified node.
    pub fn has_inbound_vms(&self, node: &str) -> bool {
        self.vms
            .values()
            .any(|vm| vm.node != node && self.current_destination(vm) == Some(node))
    }

    /// Returns true if the node hosts a VM which is not migrating away from it.
    ///
    /// VMs listed on the node but missing from the ledger are considered staying.
    pub fn has_staying_vms(&self, node: &NodeUsage) -> bool {
        node.vms.iter().any(|name| match self.vms.get(name) {
            Some(vm) => match self.current_destination(vm) {
                Some(destination) => destination == node.name,
                None => true,
            },
            None => true,
        })
    }

    /// Returns the number of VMs with migrations running outside of the planning pass.
    pub fn running_migrations(&self) -> usize {
        self.vms.values().filter(|vm| vm.migrating_to.is_some()).count()
    }

    /// Replaces node usage with a previously taken copy.
    pub fn restore_node(&mut self, snapshot: NodeUsage) -> MigrationResult<()> {
        match self.nodes.get_mut(&snapshot.name) {
            Some(usage) => {
                *usage = snapshot;
                Ok(())
            }
            None => Err(MigrationError::InternalInconsistency(format!(
                "cannot restore usage of unknown node '{}'",
                snapshot.name
            ))),
        }
    }

    /// Records the decision whose VM demand has already been added to the destination usage.
    ///
    /// The demand is subtracted from the source node (if it is present in the ledger). A VM can have at most one
    /// running or intended migration.
    pub fn commit_migration(&mut self, decision: MigrationDecision) -> MigrationResult<()> {
        let vm = self.vms.get(&decision.vm).ok_or_else(|| {
            MigrationError::InternalInconsistency(format!("cannot commit migration of unknown vm '{}'", decision.vm))
        })?;
        if let Some(destination) = self.current_destination(vm) {
            return Err(MigrationError::InternalInconsistency(format!(
                "cannot commit migration of vm '{}' which is already migrating to '{}'",
                decision.vm, destination
            )));
        }
        if !self.nodes.contains_key(&decision.destination) {
            return Err(MigrationError::InternalInconsistency(format!(
                "cannot commit migration of vm '{}' to unknown node '{}'",
                decision.vm, decision.destination
            )));
        }
        if let Some(source) = self.nodes.get_mut(&decision.source) {
            let released = source.subtract_vm(vm);
            self.released.insert(decision.vm.clone(), released);
        }
        self.intended.insert(decision);
        Ok(())
    }

    /// Removes the decision made for the VM, moving its demand from the destination back to the source.
    ///
    /// The source gets back exactly the demand that was removed from it on commit.
    pub fn revert_migration(&mut self, vm_name: &str) -> MigrationResult<MigrationDecision> {
        let decision = self.intended.remove(vm_name).ok_or_else(|| {
            MigrationError::InternalInconsistency(format!("no intended migration for vm '{}'", vm_name))
        })?;
        let vm = self.vms.get(vm_name).ok_or_else(|| {
            MigrationError::InternalInconsistency(format!("cannot revert migration of unknown vm '{}'", vm_name))
        })?;
        let destination = self.nodes.get_mut(&decision.destination).ok_or_else(|| {
            MigrationError::InternalInconsistency(format!(
                "cannot revert migration of vm '{}' from unknown node '{}'",
                vm_name, decision.destination
            ))
        })?;
        destination.subtract_vm(vm);
        let released = self.released.remove(vm_name);
        if let (Some(source), Some(released)) = (self.nodes.get_mut(&decision.source), released) {
            source.add_vm(&released);
        }
        Ok(decision)
    }
}
