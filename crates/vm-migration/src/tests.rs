use crate::core::destination::{RejectReason, RejectReasons};
use crate::core::error::MigrationError;
use crate::core::ledger::{MigrationDecision, UsageLedger};
use crate::core::migration_policy::MigrationPolicyKind;
use crate::core::usage::{GMetric, NodeUsage, VmUsage};

fn ledger_with_two_nodes() -> UsageLedger {
    let mut ledger = UsageLedger::new();
    let mut n1 = NodeUsage::new("n1", 8, 8192);
    let mut n2 = NodeUsage::new("n2", 8, 8192);
    let vm = VmUsage::new("vm1", "n1", 2, 1024);
    n1.add_vm(&vm);
    n1.vms.push("vm1".to_string());
    n2.add_vm(&VmUsage::new("vm2", "n2", 1, 512));
    n2.vms.push("vm2".to_string());
    ledger.add_node(n1);
    ledger.add_node(n2);
    ledger.add_vm(vm);
    ledger.add_vm(VmUsage::new("vm2", "n2", 1, 512));
    ledger
}

fn decision(vm: &str, source: &str, destination: &str) -> MigrationDecision {
    MigrationDecision {
        vm: vm.to_string(),
        source: source.to_string(),
        destination: destination.to_string(),
        policy: MigrationPolicyKind::Consolidation,
    }
}

#[test]
fn test_add_and_subtract_vm() {
    let mut node = NodeUsage::new("n1", 4, 4096);
    node.gmetrics.insert(
        "temp".to_string(),
        GMetric {
            load: Some(10.),
            threshold: Some(50.),
        },
    );
    node.gmetrics.insert(
        "power".to_string(),
        GMetric {
            load: None,
            threshold: Some(100.),
        },
    );
    let mut vm = VmUsage::new("vm1", "n2", 2, 1024);
    vm.cpu_load = 1.5;
    vm.memory_load = 700;
    vm.gmetrics.insert("temp".to_string(), 5.);
    vm.gmetrics.insert("power".to_string(), 20.);

    node.add_vm(&vm);
    assert_eq!(node.memory_load, 700);
    assert_eq!(node.memory_allocated, 1024);
    assert_eq!(node.cpu_load, 1.5);
    assert_eq!(node.cpu_allocated, 2);
    assert_eq!(node.gmetrics["temp"].load, Some(15.));
    assert_eq!(node.gmetrics["power"].load, None);

    node.subtract_vm(&vm);
    assert_eq!(node.memory_load, 0);
    assert_eq!(node.memory_allocated, 0);
    assert_eq!(node.cpu_load, 0.);
    assert_eq!(node.cpu_allocated, 0);
    assert_eq!(node.gmetrics["temp"].load, Some(10.));
}

#[test]
fn test_subtract_saturates_at_zero() {
    let mut node = NodeUsage::new("n1", 4, 4096);
    node.memory_load = 100;
    node.cpu_load = 0.5;
    let before = node.clone();
    let removed = node.subtract_vm(&VmUsage::new("vm1", "n1", 2, 1024));
    assert_eq!(node.memory_load, 0);
    assert_eq!(node.memory_allocated, 0);
    assert_eq!(node.cpu_load, 0.);
    assert_eq!(node.cpu_allocated, 0);

    assert_eq!(removed.memory_load, 100);
    assert_eq!(removed.memory_allocated, 0);
    assert_eq!(removed.cpu_load, 0.5);
    node.add_vm(&removed);
    assert_eq!(node, before);
}

#[test]
fn test_ratios_of_zero_capacity_node() {
    let mut node = NodeUsage::new("n1", 0, 0);
    node.memory_load = 2;
    node.cpu_allocated = 3;
    assert_eq!(node.memory_load_ratio(), 2.);
    assert_eq!(node.cpu_allocation_ratio(), 3.);
}

#[test]
fn test_commit_and_revert_migration() {
    let mut ledger = ledger_with_two_nodes();
    let n1_before = ledger.node("n1").unwrap().clone();
    let n2_before = ledger.node("n2").unwrap().clone();

    let vm = ledger.vm("vm1").unwrap().clone();
    ledger.node_mut("n2").unwrap().add_vm(&vm);
    ledger.commit_migration(decision("vm1", "n1", "n2")).unwrap();

    assert_eq!(ledger.node("n1").unwrap().memory_allocated, 0);
    assert_eq!(ledger.node("n2").unwrap().memory_allocated, 1536);
    assert_eq!(ledger.intended().len(), 1);
    assert_eq!(ledger.current_destination(&vm), Some("n2"));
    assert!(ledger.has_inbound_vms("n2"));
    assert!(!ledger.has_staying_vms(ledger.node("n1").unwrap()));

    let reverted = ledger.revert_migration("vm1").unwrap();
    assert_eq!(reverted.destination, "n2");
    assert!(ledger.intended().is_empty());
    assert_eq!(ledger.node("n1").unwrap(), &n1_before);
    assert_eq!(ledger.node("n2").unwrap(), &n2_before);
}

#[test]
fn test_revert_unknown_migration() {
    let mut ledger = ledger_with_two_nodes();
    assert!(ledger.revert_migration("vm1").is_err());
}

#[test]
fn test_commit_to_unknown_node() {
    let mut ledger = ledger_with_two_nodes();
    assert!(ledger.commit_migration(decision("vm1", "n1", "n3")).is_err());
    assert!(ledger.intended().is_empty());
}

#[test]
fn test_commit_of_migrating_vm() {
    let mut ledger = ledger_with_two_nodes();
    let vm = ledger.vm("vm1").unwrap().clone();
    ledger.node_mut("n2").unwrap().add_vm(&vm);
    ledger.commit_migration(decision("vm1", "n1", "n2")).unwrap();
    let committed = ledger.clone();

    let result = ledger.commit_migration(decision("vm1", "n1", "n2"));
    assert!(matches!(result, Err(MigrationError::InternalInconsistency(_))));
    assert_eq!(ledger.node("n1"), committed.node("n1"));
    assert_eq!(ledger.intended().len(), 1);

    let mut ledger = ledger_with_two_nodes();
    let mut vm = ledger.vm("vm2").unwrap().clone();
    vm.migrating_to = Some("n1".to_string());
    ledger.add_vm(vm);
    assert!(ledger.commit_migration(decision("vm2", "n2", "n1")).is_err());
    assert!(ledger.intended().is_empty());
}

#[test]
fn test_restore_unknown_node() {
    let mut ledger = ledger_with_two_nodes();
    assert!(ledger.restore_node(NodeUsage::new("n3", 1, 1)).is_err());
}

#[test]
fn test_running_migrations() {
    let mut ledger = ledger_with_two_nodes();
    let mut vm = VmUsage::new("vm3", "n1", 1, 256);
    vm.migrating_to = Some("n2".to_string());
    ledger.add_vm(vm);
    assert_eq!(ledger.running_migrations(), 1);
    assert!(ledger.has_inbound_vms("n2"));
    assert!(!ledger.has_inbound_vms("n1"));
}

#[test]
fn test_intended_migrations_keep_order() {
    let mut ledger = ledger_with_two_nodes();
    ledger.add_vm(VmUsage::new("vm0", "n2", 1, 256));
    ledger.commit_migration(decision("vm1", "n1", "n2")).unwrap();
    ledger.commit_migration(decision("vm0", "n2", "n1")).unwrap();
    let order: Vec<String> = ledger.intended().iter().map(|d| d.vm.clone()).collect();
    assert_eq!(order, vec!["vm1", "vm0"]);
}

#[test]
fn test_reject_reasons_display() {
    let reasons: RejectReasons = [
        RejectReason::Policy,
        RejectReason::Power,
        RejectReason::Overcommit,
        RejectReason::Feature,
        RejectReason::Hypervisor,
        RejectReason::Reservation,
        RejectReason::Power,
    ]
    .into_iter()
    .collect();
    assert_eq!(reasons.to_string(), "Overcommit,Reservation,Power,Hypervisor,Feature,Policy");
    assert_eq!(RejectReasons::new().to_string(), "");
}

#[test]
fn test_policy_kind_from_str() {
    assert_eq!(
        "ConsolidationOvercommit".parse::<MigrationPolicyKind>().unwrap(),
        MigrationPolicyKind::ConsolidationOvercommit
    );
    assert_eq!(" Overcommit ".parse::<MigrationPolicyKind>().unwrap(), MigrationPolicyKind::Overcommit);
    assert!("FirstFit".parse::<MigrationPolicyKind>().is_err());
}
