use contextrt::{Config, Properties, Runtime, ScopeMask, TypeTag, Variant};

fn rt(automerge: bool) -> Runtime {
    Runtime::for_test(Config { automerge })
}

#[test]
fn nested_begin_end_builds_and_unwinds_a_single_path() {
    let rt = rt(true);
    let region = rt.create_attribute("region", TypeTag::String, Properties::empty());

    rt.begin(&region, Variant::from_str("A")).unwrap();
    rt.begin(&region, Variant::from_str("B")).unwrap();

    let mut snap = contextrt::Snapshot::new();
    rt.pull_snapshot(ScopeMask::ALL, None, &mut snap);
    assert_eq!(snap.nodes.len(), 1);

    rt.end(&region).unwrap();
    match rt.get(&region).unwrap() {
        contextrt::Entry::Node(n) => assert_eq!(rt.tree().node(n).value, Variant::from_str("A")),
        _ => panic!("region is node-valued"),
    }

    rt.end(&region).unwrap();
    assert!(rt.get(&region).is_none());
}

#[test]
fn asvalue_set_and_exchange() {
    let rt = rt(true);
    let iter = rt.create_attribute("iter", TypeTag::Int, Properties::ASVALUE | Properties::SCOPE_PROCESS);
    rt.set(&iter, Variant::Int(7)).unwrap();

    let mut snap = contextrt::Snapshot::new();
    rt.pull_snapshot(ScopeMask::ALL, None, &mut snap);
    assert_eq!(snap.values[0].value, Variant::Int(7));

    assert_eq!(rt.exchange(&iter, Variant::Int(8)).unwrap(), Variant::Int(7));

    let mut snap2 = contextrt::Snapshot::new();
    rt.pull_snapshot(ScopeMask::ALL, None, &mut snap2);
    assert_eq!(snap2.values[0].value, Variant::Int(8));
}

#[test]
fn auto_merge_sharing_across_distinct_attributes() {
    let rt = rt(true);
    let phase = rt.create_attribute("phase", TypeTag::String, Properties::empty());
    let func = rt.create_attribute("func", TypeTag::String, Properties::empty());

    rt.begin(&phase, Variant::from_str("init")).unwrap();
    rt.begin(&func, Variant::from_str("f")).unwrap();

    let mut snap = contextrt::Snapshot::new();
    rt.pull_snapshot(ScopeMask::ALL, None, &mut snap);
    assert_eq!(snap.nodes.len(), 1, "phase and func must share one node_map key");

    let leaf = rt.tree().node(snap.nodes[0]);
    assert_eq!(leaf.value, Variant::from_str("f"));
    let parent = rt.tree().node(leaf.parent.unwrap());
    assert_eq!(parent.value, Variant::from_str("init"));
}

#[test]
fn disabling_automerge_keeps_attributes_on_separate_keys() {
    let rt = rt(false);
    let phase = rt.create_attribute("phase", TypeTag::String, Properties::empty());
    let func = rt.create_attribute("func", TypeTag::String, Properties::empty());

    rt.begin(&phase, Variant::from_str("init")).unwrap();
    rt.begin(&func, Variant::from_str("f")).unwrap();

    let mut snap = contextrt::Snapshot::new();
    rt.pull_snapshot(ScopeMask::ALL, None, &mut snap);
    assert_eq!(snap.nodes.len(), 2, "with automerge off each attribute keeps its own node_map key");
}

#[test]
fn cross_thread_isolation_for_thread_scoped_attributes() {
    use std::sync::Arc;

    let rt = Arc::new(rt(true));
    let region = rt.create_attribute("region", TypeTag::String, Properties::empty());
    rt.begin(&region, Variant::from_str("X")).unwrap();

    let rt2 = Arc::clone(&rt);
    let other_thread_nodes = std::thread::spawn(move || {
        let mut snap = contextrt::Snapshot::new();
        rt2.pull_snapshot(ScopeMask::THREAD, None, &mut snap);
        snap.nodes.len()
    })
    .join()
    .unwrap();

    assert_eq!(other_thread_nodes, 0, "a second thread must not see the first thread's annotation");
}

#[test]
fn process_scope_is_shared_across_threads() {
    use std::sync::Arc;

    let rt = Arc::new(rt(true));
    let cfg = rt.create_attribute("cfg", TypeTag::String, Properties::SCOPE_PROCESS);
    rt.set(&cfg, Variant::from_str("v")).unwrap();

    let rt2 = Arc::clone(&rt);
    let seen = std::thread::spawn(move || {
        let mut snap = contextrt::Snapshot::new();
        rt2.pull_snapshot(ScopeMask::PROCESS, None, &mut snap);
        snap.nodes.len()
    })
    .join()
    .unwrap();

    assert_eq!(seen, 1);
}

#[test]
fn concurrent_create_attribute_converges_on_one_id() {
    use std::sync::Arc;

    let rt = Arc::new(rt(true));
    let handles: Vec<_> = (0..100)
        .map(|_| {
            let rt = Arc::clone(&rt);
            std::thread::spawn(move || rt.create_attribute("x", TypeTag::Int, Properties::empty()).id())
        })
        .collect();

    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]), "every thread must resolve the same attribute id");
}

#[test]
fn write_new_nodes_precedes_process_snapshot_for_every_referenced_node() {
    use contextrt::event::Service;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct OrderCheckingWriter {
        seen_nodes: Mutex<std::collections::HashSet<u64>>,
        violations: AtomicUsize,
    }

    impl Service for OrderCheckingWriter {
        fn write_record(&self, node: &contextrt::tree::Node) {
            self.seen_nodes.lock().unwrap().insert(node.id.raw());
        }

        fn process_snapshot(&self, _rt: &Runtime, _trigger: Option<&contextrt::Entry>, snapshot: &contextrt::Snapshot) {
            let seen = self.seen_nodes.lock().unwrap();
            for node_id in &snapshot.nodes {
                if !seen.contains(&node_id.raw()) {
                    self.violations.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    let writer = Arc::new(OrderCheckingWriter { seen_nodes: Mutex::new(Default::default()), violations: AtomicUsize::new(0) });
    let rt = Runtime::with_services(Config { automerge: true }, vec![writer.clone()]);

    let region = rt.create_attribute("region", TypeTag::String, Properties::empty());
    rt.begin(&region, Variant::from_str("A")).unwrap();
    rt.push_snapshot(ScopeMask::ALL, None);

    assert_eq!(writer.violations.load(Ordering::SeqCst), 0);
}
