use std::sync::{Arc, Barrier};
use std::thread;

use tollgate::{EntryType, Node, ResourceWrapper, Tollgate};

#[test]
fn test_one_cluster_node_under_concurrent_first_entry() {
    let gate = Tollgate::new();
    let threads = 32;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let gate = gate.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut ctx = gate.enter(format!("ctx-{}", i % 4), "");
                barrier.wait();
                let entry = ctx.entry("shared").unwrap();
                let node = ctx.cur_node().unwrap();
                ctx.exit(entry).unwrap();
                node
            })
        })
        .collect();
    let nodes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(gate.cluster_nodes().len(), 1);
    let cluster = gate.cluster_node("shared").unwrap();
    for node in &nodes {
        assert!(Arc::ptr_eq(node.cluster_node().unwrap(), &cluster));
    }
    assert_eq!(cluster.total_request(), threads as u64);
    assert_eq!(cluster.cur_thread_num(), 0);
}

#[test]
fn test_contexts_share_cluster_node_but_not_default_node() {
    let gate = Tollgate::new();
    let mut web = gate.enter("web", "");
    let mut rpc = gate.enter("rpc", "");

    let a = web.entry("getUser").unwrap();
    let web_node = web.cur_node().unwrap();
    let b = rpc.entry("getUser").unwrap();
    let rpc_node = rpc.cur_node().unwrap();

    assert!(!Arc::ptr_eq(&web_node, &rpc_node));
    assert!(Arc::ptr_eq(
        web_node.cluster_node().unwrap(),
        rpc_node.cluster_node().unwrap()
    ));

    let cluster = gate.cluster_node("getUser").unwrap();
    assert_eq!(web_node.pass_qps(), 1.0);
    assert_eq!(rpc_node.pass_qps(), 1.0);
    assert_eq!(cluster.pass_qps(), 2.0);
    assert_eq!(cluster.cur_thread_num(), 2);

    web.exit(a).unwrap();
    rpc.exit(b).unwrap();
    assert_eq!(cluster.cur_thread_num(), 0);
    assert_eq!(cluster.success_qps(), 2.0);
}

#[test]
fn test_entrance_aggregates_children() {
    let gate = Tollgate::new();
    let mut ctx = gate.enter("aggregate", "");
    for resource in ["a", "b", "b"] {
        let e = ctx.entry(resource).unwrap();
        ctx.exit(e).unwrap();
    }
    let entrance = Arc::clone(ctx.entrance_node().unwrap());
    assert_eq!(entrance.children().len(), 2);
    assert_eq!(entrance.pass_qps(), 3.0);
    assert_eq!(entrance.total_request(), 3);
}

#[test]
fn test_cur_node_tracks_nesting() {
    let gate = Tollgate::new();
    let mut ctx = gate.enter("nesting", "");
    let entrance = Arc::clone(ctx.entrance_node().unwrap());
    assert!(Arc::ptr_eq(&ctx.cur_node().unwrap(), &entrance));

    let outer = ctx.entry(ResourceWrapper::inbound("http")).unwrap();
    let outer_node = ctx.cur_node().unwrap();
    assert_eq!(outer_node.resource().entry_type(), EntryType::In);

    let inner = ctx.entry("db").unwrap();
    let inner_node = ctx.cur_node().unwrap();
    assert!(outer_node
        .children()
        .iter()
        .any(|c| Arc::ptr_eq(c, &inner_node)));

    ctx.exit(inner).unwrap();
    assert!(Arc::ptr_eq(&ctx.cur_node().unwrap(), &outer_node));
    ctx.exit(outer).unwrap();
    assert!(Arc::ptr_eq(&ctx.cur_node().unwrap(), &entrance));
}
