use std::sync::{Arc, Mutex};

use tollgate::{
    BlockError, Context, DefaultNode, FlowRule, Invocation, Next, Node, ProcessorSlot,
    ResourceWrapper, SlotRegistry, Tollgate,
};

type Trace = Arc<Mutex<Vec<String>>>;

/// Records entry and exit, optionally vetoing every request.
struct Probe {
    name: &'static str,
    trace: Trace,
    veto: bool,
}

impl ProcessorSlot for Probe {
    fn name(&self) -> &str {
        self.name
    }

    fn entry(
        &self,
        ctx: &mut Context,
        inv: &Invocation<'_>,
        node: Option<&Arc<DefaultNode>>,
        next: Next<'_>,
    ) -> Result<(), BlockError> {
        self.trace.lock().unwrap().push(format!("entry {}", self.name));
        if self.veto {
            return Err(BlockError::slot(self.name, "vetoed"));
        }
        next.fire_entry(ctx, inv, node)
    }

    fn exit(&self, ctx: &mut Context, inv: &Invocation<'_>, next: Next<'_>) {
        self.trace.lock().unwrap().push(format!("exit {}", self.name));
        next.fire_exit(ctx, inv)
    }
}

fn probe(name: &'static str, trace: &Trace, veto: bool) -> Arc<dyn ProcessorSlot> {
    Arc::new(Probe {
        name,
        trace: Arc::clone(trace),
        veto,
    })
}

fn gate_with(registry: SlotRegistry) -> Tollgate {
    Tollgate::builder().slot_registry(registry).build().unwrap()
}

#[test]
fn test_entry_ascending_exit_reverse() {
    let trace: Trace = Arc::default();
    let gate = gate_with(
        SlotRegistry::new()
            .register_singleton("p2000", -2000, probe("p2000", &trace, false))
            .register_singleton("p9000", -9000, probe("p9000", &trace, false))
            .register_singleton("p7000", -7000, probe("p7000", &trace, false)),
    );

    let mut ctx = gate.enter("order", "");
    let entry = ctx.entry("resource").unwrap();
    ctx.exit(entry).unwrap();

    assert_eq!(
        *trace.lock().unwrap(),
        vec![
            "entry p9000",
            "entry p7000",
            "entry p2000",
            "exit p2000",
            "exit p7000",
            "exit p9000",
        ]
    );
}

#[test]
fn test_block_exits_only_forwarding_stages() {
    let trace: Trace = Arc::default();
    let gate = gate_with(
        SlotRegistry::new()
            .register_singleton("first", -9000, probe("first", &trace, false))
            .register_singleton("veto", -7000, probe("veto", &trace, true))
            .register_singleton("never", -2000, probe("never", &trace, false)),
    );

    let mut ctx = gate.enter("symmetry", "");
    let err = ctx.entry("resource").unwrap_err();
    let block = err.as_block().unwrap();
    assert!(block.to_string().contains("vetoed"));
    assert!(block.rule().is_none());
    assert_eq!(ctx.depth(), 0);

    assert_eq!(
        *trace.lock().unwrap(),
        vec!["entry first", "entry veto", "exit first"]
    );
}

#[test]
fn test_user_stage_runs_between_defaults() {
    let trace: Trace = Arc::default();
    let gate = gate_with(
        SlotRegistry::with_defaults().register_singleton(
            "audit",
            -5000,
            probe("audit", &trace, false),
        ),
    );
    let chain = gate
        .chain_for(&ResourceWrapper::outbound("resource"))
        .unwrap();
    assert_eq!(
        chain.names(),
        vec!["node-selector", "cluster-builder", "log", "statistic", "audit", "flow"]
    );
}

#[test]
fn test_flow_block_is_counted_not_admitted() {
    let gate = Tollgate::new();
    gate.flow_rules()
        .load_rules(vec![FlowRule::new("guarded").with_count(0.0)]);

    let mut ctx = gate.enter("counting", "appA");
    let mut ran = false;
    let err = ctx.run("guarded", |_| ran = true).unwrap_err();
    assert!(!ran);
    let block = err.as_block().unwrap();
    assert_eq!(block.limit_app(), Some("default"));
    assert_eq!(block.rule().unwrap().resource, "guarded");

    let cluster = gate.cluster_node("guarded").unwrap();
    assert_eq!(cluster.block_qps(), 1.0);
    assert_eq!(cluster.pass_qps(), 0.0);
    assert_eq!(cluster.cur_thread_num(), 0);
    let origin = cluster.origin_node("appA").unwrap();
    assert_eq!(origin.block_qps(), 1.0);
}
