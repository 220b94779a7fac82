use std::cmp::Ordering;

use vm_migration::core::error::MigrationError;
use vm_migration::core::ledger::{MigrationDecision, UsageLedger};
use vm_migration::core::migration_policies::consolidation::Consolidation;
use vm_migration::core::migration_policies::consolidation_overcommit::ConsolidationOvercommit;
use vm_migration::core::migration_policies::overcommit::Overcommit;
use vm_migration::core::migration_policy::{migration_policy_resolver, MigrationPolicy, MigrationPolicyKind};
use vm_migration::core::usage::{GMetric, LoadThresholds, NodeUsage, VmUsage};

fn loaded_node(name: &str, memory_load: u64, cpu_load: f64) -> NodeUsage {
    let mut node = NodeUsage::new(name, 8, 8192);
    node.memory_load = memory_load;
    node.memory_allocated = memory_load;
    node.cpu_load = cpu_load;
    node.cpu_allocated = cpu_load.ceil() as u32;
    node.thresholds = LoadThresholds { memory: 0.8, cpu: 0.8 };
    node
}

fn empty_ledger(nodes: &[&str]) -> UsageLedger {
    let mut ledger = UsageLedger::new();
    for name in nodes {
        let mut node = NodeUsage::new(name, 8, 8192);
        node.thresholds = LoadThresholds { memory: 0.8, cpu: 0.8 };
        ledger.add_node(node);
    }
    ledger
}

fn place(ledger: &mut UsageLedger, vm: VmUsage) {
    let node = ledger.node_mut(&vm.node).unwrap();
    node.add_vm(&vm);
    node.vms.push(vm.name.clone());
    ledger.add_vm(vm);
}

fn commit(ledger: &mut UsageLedger, vm: &str, destination: &str, policy: MigrationPolicyKind) {
    let vm = ledger.vm(vm).unwrap().clone();
    ledger.node_mut(destination).unwrap().add_vm(&vm);
    ledger
        .commit_migration(MigrationDecision {
            vm: vm.name.clone(),
            source: vm.node.clone(),
            destination: destination.to_string(),
            policy,
        })
        .unwrap();
}

fn sorted_names(mut nodes: Vec<NodeUsage>, compare: impl Fn(&NodeUsage, &NodeUsage) -> Ordering) -> Vec<String> {
    nodes.sort_by(|a, b| compare(a, b));
    nodes.into_iter().map(|node| node.name).collect()
}

fn assorted_nodes() -> Vec<NodeUsage> {
    let mut nodes = vec![
        loaded_node("idle", 0, 0.),
        loaded_node("light", 1000, 1.),
        loaded_node("light-cpu", 1000, 2.),
        loaded_node("mem-over", 7000, 1.),
        loaded_node("mem-over-more", 7800, 1.),
        loaded_node("cpu-over", 2000, 7.),
        loaded_node("both-over", 7000, 7.5),
    ];
    let mut alloc_over = loaded_node("alloc-over", 3000, 2.);
    alloc_over.memory_allocated = 9000;
    nodes.push(alloc_over);
    let mut gmetric_over = loaded_node("gmetric-over", 3000, 2.);
    gmetric_over.gmetrics.insert(
        "temp".to_string(),
        GMetric {
            load: Some(90.),
            threshold: Some(80.),
        },
    );
    nodes.push(gmetric_over);
    let mut gmetric_ok = loaded_node("gmetric-ok", 3000, 2.);
    gmetric_ok.gmetrics.insert(
        "temp".to_string(),
        GMetric {
            load: Some(40.),
            threshold: Some(80.),
        },
    );
    nodes.push(gmetric_ok);
    nodes.push(loaded_node("light-twin", 1000, 1.));
    nodes
}

fn assert_strict_weak_ordering(nodes: &[NodeUsage], compare: impl Fn(&NodeUsage, &NodeUsage) -> Ordering) {
    for a in nodes {
        assert_eq!(compare(a, a), Ordering::Equal, "{} is not equivalent to itself", a.name);
        for b in nodes {
            assert_eq!(compare(a, b), compare(b, a).reverse(), "{} and {}", a.name, b.name);
            for c in nodes {
                if compare(a, b) != Ordering::Greater && compare(b, c) != Ordering::Greater {
                    assert_ne!(compare(a, c), Ordering::Greater, "{}, {}, {}", a.name, b.name, c.name);
                }
            }
        }
    }
}

#[test]
fn test_orderings_are_strict_weak() {
    let nodes = assorted_nodes();
    let policies: Vec<Box<dyn MigrationPolicy>> = vec![
        Box::new(Overcommit::new()),
        Box::new(ConsolidationOvercommit::new()),
        Box::new(Consolidation::new()),
    ];
    for policy in policies.iter() {
        assert_strict_weak_ordering(&nodes, |a, b| policy.order_nodes(a, b));
        assert_strict_weak_ordering(&nodes, |a, b| policy.order_destinations(a, b));
    }
}

#[test]
fn test_overcommit_source_order() {
    let policy = Overcommit::new();
    let names = sorted_names(assorted_nodes(), |a, b| policy.order_nodes(a, b));
    assert_eq!(
        names,
        vec![
            "mem-over-more",
            "both-over",
            "mem-over",
            "cpu-over",
            "alloc-over",
            "gmetric-over",
            "gmetric-ok",
            "light-cpu",
            "light",
            "light-twin",
            "idle",
        ]
    );
}

#[test]
fn test_destination_orders() {
    let nodes = vec![
        loaded_node("medium", 4000, 2.),
        loaded_node("light", 1000, 1.),
        loaded_node("heavy", 6000, 4.),
    ];
    let overcommit = Overcommit::new();
    assert_eq!(
        sorted_names(nodes.clone(), |a, b| overcommit.order_destinations(a, b)),
        vec!["light", "medium", "heavy"]
    );
    let consolidation_overcommit = ConsolidationOvercommit::new();
    assert_eq!(
        sorted_names(nodes.clone(), |a, b| consolidation_overcommit.order_destinations(a, b)),
        vec!["heavy", "medium", "light"]
    );
    let consolidation = Consolidation::new();
    assert_eq!(
        sorted_names(nodes.clone(), |a, b| consolidation.order_destinations(a, b)),
        vec!["heavy", "medium", "light"]
    );
    assert_eq!(
        sorted_names(nodes, |a, b| consolidation.order_nodes(a, b)),
        vec!["light", "medium", "heavy"]
    );
}

#[test]
fn test_vms_big_to_small() {
    let mut small = VmUsage::new("small", "n1", 1, 512);
    small.cpu_load = 0.5;
    let big = VmUsage::new("big", "n1", 1, 4096);
    let busy = VmUsage::new("busy", "n1", 4, 512);
    let mut vms = vec![small, big, busy];
    let policy = Overcommit::new();
    vms.sort_by(|a, b| policy.order_vms(a, b));
    let names: Vec<&str> = vms.iter().map(|vm| vm.name.as_str()).collect();
    assert_eq!(names, vec!["big", "busy", "small"]);
}

#[test]
fn test_migrations_done() {
    let ledger = UsageLedger::new();
    let overloaded = loaded_node("n1", 7000, 1.);
    let fine = loaded_node("n2", 1000, 1.);
    let vm = VmUsage::new("vm1", "n1", 1, 512);

    let overcommit = Overcommit::new();
    assert!(!overcommit.migrations_done(&ledger, &overloaded));
    assert!(overcommit.migrations_done(&ledger, &fine));
    assert!(!overcommit.migrations_done_for_node(&ledger, &overloaded, &vm));
    assert!(overcommit.migrations_done_for_node(&ledger, &fine, &vm));

    let consolidation_overcommit = ConsolidationOvercommit::new();
    assert!(consolidation_overcommit.migrations_done(&ledger, &fine));

    let consolidation = Consolidation::new();
    assert!(!consolidation.migrations_done(&ledger, &fine));
    assert!(!consolidation.migrations_done_for_node(&ledger, &fine, &vm));
}

#[test]
fn test_consolidation_rejects_destination_as_source() {
    let mut ledger = empty_ledger(&["n1", "n2", "n3"]);
    place(&mut ledger, VmUsage::new("vm1", "n1", 1, 1024));
    place(&mut ledger, VmUsage::new("vm2", "n2", 1, 1024));
    let mut vm3 = VmUsage::new("vm3", "n3", 1, 1024);
    vm3.migrating_to = Some("n1".to_string());
    place(&mut ledger, vm3);
    commit(&mut ledger, "vm2", "n3", MigrationPolicyKind::Consolidation);

    let policy = Consolidation::new();
    // in-flight migration
    assert!(matches!(
        policy.node_setup(&ledger, ledger.node("n1").unwrap()),
        Err(MigrationError::SourceRejected { .. })
    ));
    // intended migration
    assert!(policy.node_setup(&ledger, ledger.node("n3").unwrap()).is_err());
    assert!(policy.node_setup(&ledger, ledger.node("n2").unwrap()).is_ok());

    let overcommit = Overcommit::new();
    assert!(overcommit.node_setup(&ledger, ledger.node("n1").unwrap()).is_ok());
}

#[test]
fn test_consolidation_destinations() {
    let mut ledger = empty_ledger(&["n1", "n2", "n3", "n4"]);
    let vm = VmUsage::new("vm1", "n1", 1, 1024);
    place(&mut ledger, vm.clone());
    place(&mut ledger, VmUsage::new("vm2", "n2", 1, 1024));
    let mut vm3 = VmUsage::new("vm3", "n3", 1, 1024);
    vm3.migrating_to = Some("n4".to_string());
    place(&mut ledger, vm3);

    let policy = Consolidation::new();
    // node with a staying VM
    assert!(policy.node_can_be_destination(&ledger, ledger.node("n2").unwrap(), &vm));
    // node whose only VM is leaving
    assert!(!policy.node_can_be_destination(&ledger, ledger.node("n3").unwrap(), &vm));
    // empty node receiving a VM
    assert!(policy.node_can_be_destination(&ledger, ledger.node("n4").unwrap(), &vm));

    let mut ledger = empty_ledger(&["n1", "n2"]);
    place(&mut ledger, vm.clone());
    assert!(!policy.node_can_be_destination(&ledger, ledger.node("n2").unwrap(), &vm));
    assert!(Overcommit::new().node_can_be_destination(&ledger, ledger.node("n2").unwrap(), &vm));
}

#[test]
fn test_consolidation_teardown_reverts_partial_evacuation() {
    let mut ledger = empty_ledger(&["n1", "n2"]);
    place(&mut ledger, VmUsage::new("vm1", "n1", 2, 1024));
    place(&mut ledger, VmUsage::new("vm2", "n1", 1, 512));
    place(&mut ledger, VmUsage::new("vm3", "n2", 2, 2048));
    let n1_before = ledger.node("n1").unwrap().clone();
    let n2_before = ledger.node("n2").unwrap().clone();

    commit(&mut ledger, "vm1", "n2", MigrationPolicyKind::Consolidation);
    assert_eq!(ledger.node("n2").unwrap().memory_allocated, 3072);

    let policy = Consolidation::new();
    assert_eq!(policy.node_teardown(&mut ledger, "n1").unwrap(), 1);
    assert!(ledger.intended().is_empty());
    assert_eq!(ledger.node("n1").unwrap(), &n1_before);
    assert_eq!(ledger.node("n2").unwrap(), &n2_before);
}

#[test]
fn test_teardown_restores_source_with_reported_load_below_demand() {
    let mut ledger = empty_ledger(&["n1", "n2"]);
    place(&mut ledger, VmUsage::new("vm1", "n1", 1, 500));
    place(&mut ledger, VmUsage::new("vm2", "n1", 1, 256));
    place(&mut ledger, VmUsage::new("vm3", "n2", 2, 2048));
    let n1 = ledger.node_mut("n1").unwrap();
    n1.memory_load = 100;
    n1.cpu_load = 0.5;
    let n1_before = ledger.node("n1").unwrap().clone();
    let n2_before = ledger.node("n2").unwrap().clone();

    commit(&mut ledger, "vm1", "n2", MigrationPolicyKind::Consolidation);
    assert_eq!(ledger.node("n1").unwrap().memory_load, 0);
    assert_eq!(ledger.node("n1").unwrap().cpu_load, 0.);

    assert_eq!(Consolidation::new().node_teardown(&mut ledger, "n1").unwrap(), 1);
    assert_eq!(ledger.node("n1").unwrap(), &n1_before);
    assert_eq!(ledger.node("n2").unwrap(), &n2_before);
}

#[test]
fn test_consolidation_teardown_keeps_full_evacuation() {
    let mut ledger = empty_ledger(&["n1", "n2"]);
    place(&mut ledger, VmUsage::new("vm1", "n1", 2, 1024));
    place(&mut ledger, VmUsage::new("vm3", "n2", 2, 2048));
    commit(&mut ledger, "vm1", "n2", MigrationPolicyKind::Consolidation);

    let policy = Consolidation::new();
    assert_eq!(policy.node_teardown(&mut ledger, "n1").unwrap(), 0);
    assert_eq!(ledger.intended().len(), 1);
    assert_eq!(ledger.node("n1").unwrap().memory_allocated, 0);
}

#[test]
fn test_consolidation_teardown_reverts_own_decisions_only() {
    let mut ledger = empty_ledger(&["n1", "n2"]);
    place(&mut ledger, VmUsage::new("vm1", "n1", 1, 1024));
    place(&mut ledger, VmUsage::new("vm2", "n1", 1, 1024));
    place(&mut ledger, VmUsage::new("vm5", "n1", 1, 1024));
    place(&mut ledger, VmUsage::new("vm3", "n2", 1, 1024));
    commit(&mut ledger, "vm1", "n2", MigrationPolicyKind::ConsolidationOvercommit);
    commit(&mut ledger, "vm2", "n2", MigrationPolicyKind::Consolidation);

    let policy = Consolidation::new();
    assert_eq!(policy.node_teardown(&mut ledger, "n1").unwrap(), 1);
    let remaining: Vec<&str> = ledger.intended().iter().map(|d| d.vm.as_str()).collect();
    assert_eq!(remaining, vec!["vm1"]);
    assert_eq!(ledger.node("n1").unwrap().memory_allocated, 2048);
    assert_eq!(ledger.node("n2").unwrap().memory_allocated, 2048);
}

#[test]
fn test_teardown_of_other_policies_is_noop() {
    let mut ledger = empty_ledger(&["n1", "n2"]);
    place(&mut ledger, VmUsage::new("vm1", "n1", 1, 1024));
    place(&mut ledger, VmUsage::new("vm2", "n1", 1, 1024));
    commit(&mut ledger, "vm1", "n2", MigrationPolicyKind::Overcommit);
    assert_eq!(Overcommit::new().node_teardown(&mut ledger, "n1").unwrap(), 0);
    assert_eq!(ledger.intended().len(), 1);
}

#[test]
fn test_policy_resolver() {
    for kind in [
        MigrationPolicyKind::Consolidation,
        MigrationPolicyKind::Overcommit,
        MigrationPolicyKind::ConsolidationOvercommit,
    ] {
        assert_eq!(migration_policy_resolver(&kind.to_string()).unwrap().kind(), kind);
    }
    assert!(matches!(
        migration_policy_resolver("Spread"),
        Err(MigrationError::UnknownPolicy(name)) if name == "Spread"
    ));
}
