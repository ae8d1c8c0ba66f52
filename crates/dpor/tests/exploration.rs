//! Properties every explored execution must satisfy, checked over randomly
//! generated two-thread programs.

use std::collections::HashMap;

use proptest::prelude::*;

use c11_dpor::{
    run_model, MemoryOrder, ModelConfig, Op, Operand, Outcome, Program, ThreadId,
};

const X: u64 = 0x10;
const Y: u64 = 0x20;

fn config() -> ModelConfig {
    ModelConfig {
        max_executions: Some(500),
        ..ModelConfig::default()
    }
}

fn arb_addr() -> impl Strategy<Value = u64> {
    prop_oneof![Just(X), Just(Y)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    let load_order = prop_oneof![
        Just(MemoryOrder::Relaxed),
        Just(MemoryOrder::Acquire),
        Just(MemoryOrder::SeqCst),
    ];
    let store_order = prop_oneof![
        Just(MemoryOrder::Relaxed),
        Just(MemoryOrder::Release),
        Just(MemoryOrder::SeqCst),
    ];
    let rmw_order = prop_oneof![
        Just(MemoryOrder::Relaxed),
        Just(MemoryOrder::AcqRel),
        Just(MemoryOrder::SeqCst),
    ];
    prop_oneof![
        (arb_addr(), load_order, 0usize..2)
            .prop_map(|(addr, order, dst)| Op::Load { addr, order, dst }),
        (arb_addr(), store_order, 1u64..3).prop_map(|(addr, order, v)| Op::Store {
            addr,
            order,
            value: Operand::Const(v),
        }),
        (arb_addr(), rmw_order).prop_map(|(addr, order)| Op::FetchAdd {
            addr,
            order,
            operand: 1,
            dst: 2,
        }),
    ]
}

fn arb_program() -> impl Strategy<Value = Program> {
    let body = || proptest::collection::vec(arb_op(), 1..=3);
    (body(), body()).prop_map(|(first, second)| {
        let init = |addr| Op::Store {
            addr,
            order: MemoryOrder::Relaxed,
            value: Operand::Const(0),
        };
        let mut program = Program::new(vec![
            init(X),
            init(Y),
            Op::Spawn { body: 1 },
            Op::Spawn { body: 2 },
            Op::Join { body: 1 },
            Op::Join { body: 2 },
        ]);
        program.add_thread(first);
        program.add_thread(second);
        program
    })
}

/// Consistency checks on one finished execution. Returns a description of
/// the first violation found.
fn check_execution(o: &Outcome<'_>) -> Result<(), String> {
    let mc = o.checker;

    if !mc.is_feasible() || !mc.is_final_feasible() {
        return Err(format!("feasible verdict {:?} but checker disagrees", o.verdict));
    }
    if !mc.promises().is_empty() {
        return Err(format!("{} promises left unresolved", mc.promises().len()));
    }

    let graph = mc.mo_graph();
    if graph.has_cycles() {
        return Err("modification order has a cycle".into());
    }
    for (from, to) in graph.edges() {
        if graph.is_reachable(to, from) {
            return Err(format!("edge {from:?} -> {to:?} closes a cycle"));
        }
    }

    let mut last_cv: HashMap<ThreadId, _> = HashMap::new();
    for action in mc.action_trace() {
        if let Some(prev) = last_cv.insert(action.tid(), action.cv().clone()) {
            if !prev.partial_le(action.cv()) {
                return Err(format!("clock of {action} went backwards"));
            }
        }
        if action.is_read() {
            let Some(rf) = action.reads_from() else {
                return Err(format!("{action} has no write to read from"));
            };
            let write = mc.action(rf);
            if !write.is_write() || write.location() != action.location() {
                return Err(format!("{action} reads from unrelated {write}"));
            }
            if action.happens_before(write) {
                return Err(format!("{action} reads from {write}, which happens after it"));
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

    #[test]
    fn feasible_executions_are_consistent(program in arb_program()) {
        let mut violations = Vec::new();
        let result = run_model(&program, config(), |o| {
            if let Err(msg) = check_execution(o) {
                violations.push(msg);
            }
            true
        });
        let result = result.map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(violations.is_empty(), "{:?}", violations);
        prop_assert!(result.feasible_executions <= result.executions_explored);
        prop_assert!(result.feasible_executions >= 1);
    }

    #[test]
    fn exploration_is_reproducible(program in arb_program()) {
        let summarize = |program: &Program| {
            let mut executions = Vec::new();
            let result = run_model(program, config(), |o| {
                let trace: Vec<_> = o
                    .checker
                    .action_trace()
                    .map(|a| (a.tid(), a.kind(), a.location(), a.value()))
                    .collect();
                let edges = o.checker.mo_graph().edges();
                executions.push((o.schedule.to_vec(), trace, edges));
                true
            });
            result.map(|r| (r.executions_explored, r.feasible_executions, executions))
        };
        let first = summarize(&program).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let second = summarize(&program).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(first, second);
    }

    #[test]
    fn joined_threads_are_visible_to_main(program in arb_program()) {
        // After both joins, main happens after every action in the trace.
        let mut violations = 0usize;
        run_model(&program, config(), |o| {
            let mc = o.checker;
            if let Some(last) = mc.get_last_action(0) {
                let main = mc.action(last);
                let unordered = mc
                    .action_trace()
                    .filter(|a| a.tid() != 0)
                    .any(|a| !a.happens_before(main));
                if unordered && mc.thread(0).map(|t| t.is_complete()).unwrap_or(false) {
                    violations += 1;
                }
            }
            true
        })
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(violations, 0);
    }
}
