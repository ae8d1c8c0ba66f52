//! Straight-line thread programs and a driver that explores them.
//!
//! A [`Program`] is a set of thread bodies; body 0 is the initial thread,
//! the others run once spawned. Each body is a list of [`Op`]s operating on
//! atomic locations (through the checker), plain locations (checked for data
//! races) and thread-local registers. [`run_model`] replays the program once
//! per execution the checker asks for and evaluates an invariant at the end
//! of every feasible execution.

use std::collections::HashMap;

use crate::action::{Action, ActionKind, Location, MemoryOrder, ThreadId, VALUE_NONE};
use crate::config::ModelConfig;
use crate::engine::ModelChecker;
use crate::error::{Diagnostic, ModelError, ModelResult, Verdict};

/// Index of a thread-local register.
pub type Register = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Const(u64),
    Reg(Register),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Load {
        addr: u64,
        order: MemoryOrder,
        dst: Register,
    },
    Store {
        addr: u64,
        order: MemoryOrder,
        value: Operand,
    },
    /// Atomic add; `dst` receives the previous value.
    FetchAdd {
        addr: u64,
        order: MemoryOrder,
        operand: u64,
        dst: Register,
    },
    /// Strong compare-exchange; `dst` receives the observed value.
    CompareExchange {
        addr: u64,
        order: MemoryOrder,
        expected: u64,
        desired: u64,
        dst: Register,
    },
    PlainRead {
        addr: u64,
        dst: Register,
    },
    PlainWrite {
        addr: u64,
        value: Operand,
    },
    /// Start the thread running body `body`. Each body is spawned at most once.
    Spawn {
        body: usize,
    },
    Join {
        body: usize,
    },
    /// Raise a bug, stopping exploration, unless register `reg` holds
    /// `expected`.
    AssertEq {
        reg: Register,
        expected: u64,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    bodies: Vec<Vec<Op>>,
}

impl Program {
    pub fn new(main: Vec<Op>) -> Self {
        Self { bodies: vec![main] }
    }

    /// Add a thread body and return its index for `Spawn` and `Join`.
    pub fn add_thread(&mut self, body: Vec<Op>) -> usize {
        self.bodies.push(body);
        self.bodies.len() - 1
    }

    pub fn body(&self, index: usize) -> Option<&[Op]> {
        self.bodies.get(index).map(Vec::as_slice)
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }
}

/// Result of exploring all executions of a program.
#[derive(Clone, Debug, Default)]
pub struct ExplorationResult {
    /// Total number of executions explored.
    pub executions_explored: u64,
    /// Executions that were feasible and had no unresolved promises.
    pub feasible_executions: u64,
    /// Whether every feasible execution passed the invariant and no bug was
    /// asserted.
    pub all_passed: bool,
    /// Each entry is (execution_number, schedule_trace).
    pub failures: Vec<(u64, Vec<ThreadId>)>,
    /// Bugs asserted by the checker (data races).
    pub bugs: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// The end state of one execution, handed to the invariant.
pub struct Outcome<'a> {
    pub checker: &'a ModelChecker,
    pub verdict: Verdict,
    /// Thread chosen at each step.
    pub schedule: &'a [ThreadId],
    registers: &'a [Vec<u64>],
    plain: &'a HashMap<u64, u64>,
}

impl Outcome<'_> {
    /// Register `reg` of the thread running `body` (`VALUE_NONE` if unset).
    pub fn reg(&self, body: usize, reg: Register) -> u64 {
        self.registers
            .get(body)
            .and_then(|regs| regs.get(reg))
            .copied()
            .unwrap_or(VALUE_NONE)
    }

    pub fn plain(&self, addr: u64) -> Option<u64> {
        self.plain.get(&addr).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Start,
    Running,
    /// The read half of an RMW returned `old`; the completion is next.
    Rmw { old: u64 },
    Done,
}

#[derive(Clone, Debug)]
struct ThreadCtx {
    body: usize,
    pc: usize,
    stage: Stage,
}

fn thread_action(
    mc: &mut ModelChecker,
    tid: ThreadId,
    kind: ActionKind,
    target: ThreadId,
) -> Action {
    mc.new_action(tid, kind, MemoryOrder::SeqCst, Location::Thread(target), VALUE_NONE)
}

/// Interpreter state for one execution.
struct Run<'p> {
    program: &'p Program,
    threads: Vec<ThreadCtx>,
    spawned: HashMap<usize, ThreadId>,
    registers: Vec<Vec<u64>>,
    plain: HashMap<u64, u64>,
    schedule: Vec<ThreadId>,
}

impl<'p> Run<'p> {
    fn new(program: &'p Program) -> Self {
        Self {
            program,
            threads: Vec::new(),
            spawned: HashMap::new(),
            registers: vec![Vec::new(); program.num_bodies()],
            plain: HashMap::new(),
            schedule: Vec::new(),
        }
    }

    fn add_thread(&mut self, tid: ThreadId, body: usize) {
        if self.threads.len() <= tid {
            self.threads.resize(
                tid + 1,
                ThreadCtx {
                    body: 0,
                    pc: 0,
                    stage: Stage::Done,
                },
            );
        }
        self.threads[tid] = ThreadCtx {
            body,
            pc: 0,
            stage: Stage::Start,
        };
        self.spawned.insert(body, tid);
    }

    fn ctx(&self, tid: ThreadId) -> ModelResult<&ThreadCtx> {
        self.threads.get(tid).ok_or(ModelError::UnknownThread(tid))
    }

    fn set_reg(&mut self, body: usize, reg: Register, value: u64) {
        let Some(regs) = self.registers.get_mut(body) else {
            return;
        };
        if regs.len() <= reg {
            regs.resize(reg + 1, VALUE_NONE);
        }
        regs[reg] = value;
    }

    fn eval(&self, body: usize, operand: Operand) -> u64 {
        match operand {
            Operand::Const(v) => v,
            Operand::Reg(r) => self
                .registers
                .get(body)
                .and_then(|regs| regs.get(r))
                .copied()
                .unwrap_or(VALUE_NONE),
        }
    }

    fn current_op(&self, tid: ThreadId) -> ModelResult<Option<&'p Op>> {
        let ctx = self.ctx(tid)?;
        let body = self
            .program
            .body(ctx.body)
            .ok_or(ModelError::UnknownThread(ctx.body))?;
        Ok(body.get(ctx.pc))
    }

    fn join_target(&self, body: usize) -> ModelResult<ThreadId> {
        self.spawned
            .get(&body)
            .copied()
            .ok_or(ModelError::UnknownThread(body))
    }

    /// Run `tid` up to its next checker-visible action. Plain accesses and
    /// assertions on the way are executed locally; `None` means the thread
    /// raised a bug.
    fn next_action(&mut self, mc: &mut ModelChecker, tid: ThreadId) -> ModelResult<Option<Action>> {
        loop {
            let ctx = self.ctx(tid)?.clone();
            match ctx.stage {
                Stage::Start => {
                    return Ok(Some(thread_action(mc, tid, ActionKind::ThreadStart, tid)));
                }
                Stage::Done => return Err(ModelError::ThreadNotRunnable(tid)),
                Stage::Rmw { old } => {
                    let Some(op) = self.current_op(tid)? else {
                        return Err(ModelError::UnmatchedRmw { thread: tid });
                    };
                    return Ok(Some(match *op {
                        Op::FetchAdd { addr, order, operand, .. } => mc.new_action(
                            tid,
                            ActionKind::AtomicRmw,
                            order,
                            Location::Memory(addr),
                            old.wrapping_add(operand),
                        ),
                        Op::CompareExchange {
                            addr,
                            order,
                            expected,
                            desired,
                            ..
                        } if old == expected => mc.new_action(
                            tid,
                            ActionKind::AtomicRmw,
                            order,
                            Location::Memory(addr),
                            desired,
                        ),
                        Op::CompareExchange { addr, order, .. } => mc.new_action(
                            tid,
                            ActionKind::AtomicRmwCompareFail,
                            order,
                            Location::Memory(addr),
                            VALUE_NONE,
                        ),
                        _ => return Err(ModelError::UnmatchedRmw { thread: tid }),
                    }));
                }
                Stage::Running => {}
            }

            let Some(op) = self.current_op(tid)? else {
                return Ok(Some(thread_action(mc, tid, ActionKind::ThreadFinish, tid)));
            };
            let body = ctx.body;
            let action = match *op {
                Op::PlainRead { addr, dst } => {
                    mc.record_plain_read(tid, Location::Memory(addr))?;
                    let value = self.plain.get(&addr).copied().unwrap_or(VALUE_NONE);
                    self.set_reg(body, dst, value);
                    self.threads[tid].pc += 1;
                    continue;
                }
                Op::PlainWrite { addr, value } => {
                    mc.record_plain_write(tid, Location::Memory(addr))?;
                    let value = self.eval(body, value);
                    self.plain.insert(addr, value);
                    self.threads[tid].pc += 1;
                    continue;
                }
                Op::AssertEq { reg, expected } => {
                    let actual = self.eval(body, Operand::Reg(reg));
                    if actual != expected {
                        mc.assert_bug(format!(
                            "thread {tid}: register {reg} is {actual}, expected {expected}"
                        ));
                        return Ok(None);
                    }
                    self.threads[tid].pc += 1;
                    continue;
                }
                Op::Load { addr, order, .. } => {
                    let location = Location::Memory(addr);
                    mc.new_action(tid, ActionKind::AtomicRead, order, location, VALUE_NONE)
                }
                Op::Store { addr, order, value } => {
                    let (location, value) = (Location::Memory(addr), self.eval(body, value));
                    mc.new_action(tid, ActionKind::AtomicWrite, order, location, value)
                }
                Op::FetchAdd { addr, order, .. } | Op::CompareExchange { addr, order, .. } => {
                    let location = Location::Memory(addr);
                    mc.new_action(tid, ActionKind::AtomicRmwRead, order, location, VALUE_NONE)
                }
                Op::Spawn { body: child_body } => {
                    if self.program.body(child_body).is_none() {
                        return Err(ModelError::UnknownThread(child_body));
                    }
                    let child = mc.spawn_thread(tid)?;
                    self.add_thread(child, child_body);
                    thread_action(mc, tid, ActionKind::ThreadCreate, child)
                }
                Op::Join { body: target } => {
                    let target = self.join_target(target)?;
                    thread_action(mc, tid, ActionKind::ThreadJoin, target)
                }
            };
            return Ok(Some(action));
        }
    }

    /// Consume the checker's answer to the action `tid` just issued.
    fn after_step(&mut self, mc: &ModelChecker, tid: ThreadId) -> ModelResult<()> {
        let ctx = self.ctx(tid)?.clone();
        let returned = mc.return_value(tid)?;
        let advance = match ctx.stage {
            Stage::Start => {
                self.threads[tid].stage = Stage::Running;
                return Ok(());
            }
            Stage::Done => return Ok(()),
            Stage::Rmw { old } => {
                let op = self.current_op(tid)?;
                if let Some(Op::FetchAdd { dst, .. } | Op::CompareExchange { dst, .. }) = op {
                    self.set_reg(ctx.body, *dst, old);
                }
                self.threads[tid].stage = Stage::Running;
                true
            }
            Stage::Running => match self.current_op(tid)? {
                None => {
                    self.threads[tid].stage = Stage::Done;
                    false
                }
                Some(Op::Load { dst, .. }) => {
                    self.set_reg(ctx.body, *dst, returned);
                    true
                }
                Some(Op::FetchAdd { .. } | Op::CompareExchange { .. }) => {
                    self.threads[tid].stage = Stage::Rmw { old: returned };
                    false
                }
                // A blocked join is reissued once the target finishes.
                Some(Op::Join { .. }) => !mc.thread(tid)?.is_blocked(),
                Some(_) => true,
            },
        };
        if advance {
            self.threads[tid].pc += 1;
        }
        Ok(())
    }
}

/// Explore every execution of `program`, checking `invariant` at the end of
/// each feasible one.
pub fn run_model(
    program: &Program,
    config: ModelConfig,
    mut invariant: impl FnMut(&Outcome<'_>) -> bool,
) -> ModelResult<ExplorationResult> {
    let mut checker = ModelChecker::new(config);
    let mut result = ExplorationResult {
        all_passed: true,
        ..ExplorationResult::default()
    };

    loop {
        let mut run = Run::new(program);
        let main = checker.start_execution()?;
        run.add_thread(main, 0);

        let mut next = Some(main);
        while let Some(tid) = next {
            run.schedule.push(tid);
            let Some(action) = run.next_action(&mut checker, tid)? else {
                break;
            };
            if checker.has_asserted() {
                break;
            }
            next = checker.step(action)?;
            run.after_step(&checker, tid)?;
        }

        let verdict = checker.verdict();
        if verdict.is_feasible() && !checker.has_asserted() {
            result.feasible_executions += 1;
            let outcome = Outcome {
                checker: &checker,
                verdict,
                schedule: &run.schedule,
                registers: &run.registers,
                plain: &run.plain,
            };
            if !invariant(&outcome) {
                result.all_passed = false;
                result
                    .failures
                    .push((checker.num_executions() + 1, run.schedule.clone()));
            }
        }

        if !checker.next_execution() {
            break;
        }
    }

    let stats = checker.shutdown();
    result.executions_explored = stats.executions;
    if !stats.bugs.is_empty() {
        result.all_passed = false;
    }
    result.bugs = stats.bugs;
    result.diagnostics = stats.diagnostics;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: u64 = 0x10;
    const Y: u64 = 0x20;

    fn relaxed_store(addr: u64, value: u64) -> Op {
        Op::Store {
            addr,
            order: MemoryOrder::Relaxed,
            value: Operand::Const(value),
        }
    }

    #[test]
    fn test_single_thread_single_execution() {
        let program = Program::new(vec![
            relaxed_store(X, 1),
            Op::Load { addr: X, order: MemoryOrder::Relaxed, dst: 0 },
        ]);
        let result = run_model(&program, ModelConfig::default(), |o| o.reg(0, 0) == 1).unwrap();
        assert!(result.all_passed);
        assert_eq!(result.executions_explored, 1);
        assert_eq!(result.feasible_executions, 1);
    }

    #[test]
    fn test_fetch_add_returns_old_value() {
        let program = Program::new(vec![
            relaxed_store(X, 5),
            Op::FetchAdd { addr: X, order: MemoryOrder::AcqRel, operand: 3, dst: 0 },
            Op::Load { addr: X, order: MemoryOrder::Relaxed, dst: 1 },
        ]);
        let result = run_model(&program, ModelConfig::default(), |o| {
            o.reg(0, 0) == 5 && o.reg(0, 1) == 8
        })
        .unwrap();
        assert!(result.all_passed);
    }

    #[test]
    fn test_failed_compare_exchange_leaves_value() {
        let program = Program::new(vec![
            relaxed_store(X, 5),
            Op::CompareExchange {
                addr: X,
                order: MemoryOrder::SeqCst,
                expected: 4,
                desired: 9,
                dst: 0,
            },
            Op::Load { addr: X, order: MemoryOrder::Relaxed, dst: 1 },
        ]);
        let result = run_model(&program, ModelConfig::default(), |o| {
            o.reg(0, 0) == 5 && o.reg(0, 1) == 5
        })
        .unwrap();
        assert!(result.all_passed);
    }

    #[test]
    fn test_plain_accesses_use_local_memory() {
        let program = Program::new(vec![
            Op::PlainWrite { addr: Y, value: Operand::Const(3) },
            Op::PlainRead { addr: Y, dst: 0 },
        ]);
        let result = run_model(&program, ModelConfig::default(), |o| {
            o.reg(0, 0) == 3 && o.plain(Y) == Some(3)
        })
        .unwrap();
        assert!(result.all_passed);
        assert!(result.bugs.is_empty());
    }

    #[test]
    fn test_failed_assertion_stops_exploration() {
        let program = Program::new(vec![
            relaxed_store(X, 1),
            Op::Load { addr: X, order: MemoryOrder::Relaxed, dst: 0 },
            Op::AssertEq { reg: 0, expected: 2 },
        ]);
        let result = run_model(&program, ModelConfig::default(), |_| true).unwrap();
        assert!(!result.all_passed);
        assert_eq!(result.bugs.len(), 1);
        assert_eq!(result.feasible_executions, 0);
        assert_eq!(result.executions_explored, 1);
    }

    #[test]
    fn test_join_of_unspawned_body_is_an_error() {
        let program = Program::new(vec![Op::Join { body: 1 }]);
        assert!(matches!(
            run_model(&program, ModelConfig::default(), |_| true),
            Err(ModelError::UnknownThread(1))
        ));
    }

    #[test]
    fn test_spawn_of_missing_body_is_an_error() {
        let program = Program::new(vec![Op::Spawn { body: 7 }]);
        assert!(matches!(
            run_model(&program, ModelConfig::default(), |_| true),
            Err(ModelError::UnknownThread(7))
        ));
    }

    #[test]
    fn test_spawned_thread_sees_parent_writes() {
        let mut program = Program::new(vec![relaxed_store(X, 1)]);
        let child = program.add_thread(vec![Op::Load {
            addr: X,
            order: MemoryOrder::Relaxed,
            dst: 0,
        }]);
        program.bodies[0].push(Op::Spawn { body: child });
        program.bodies[0].push(Op::Join { body: child });
        let result = run_model(&program, ModelConfig::default(), |o| o.reg(child, 0) == 1).unwrap();
        assert!(result.all_passed);
        assert_eq!(result.executions_explored, 1);
    }
}
