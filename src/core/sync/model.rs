/*!
 * Reference Model
 *
 * The acquire/release protocol of `RawAdaptiveMutex` rewritten as an explicit
 * per-thread program counter machine, plus an exhaustive breadth-first
 * explorer over every interleaving.
 *
 * Each transition performs exactly one shared-memory action (an atomic
 * operation on the lock word, or a park/wake call) together with the local
 * bookkeeping that follows it, so the explored interleavings are exactly the
 * ones real threads can produce.
 *
 * # Checked Properties
 *
 * - **Mutual exclusion**: at most one thread holds the lock, and a holder
 *   implies `LOCKED`
 * - **Spin privilege**: at most one thread holds it, and exactly when
 *   `SPINNING` is set
 * - **No deadlock**: every final state has all threads done
 * - **No lost wakeup**: from every reachable state, completion (all cycles
 *   done, nobody parked) is still reachable
 * - **Bounded liveness**: completed runs count exactly threads x cycles
 *   acquisitions
 *
 * The OS sleep set is modelled faithfully: `wait` compares and blocks in one
 * step, `wake(1)` may pick any parked thread, and spurious wakeups can be
 * switched on. Leave them off when checking for lost wakeups, since a
 * spurious wake would mask one.
 */

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

const L: u8 = 1;
const S: u8 = 2;
const P: u8 = 4;

pub const MAX_THREADS: usize = 7;
pub const MAX_CYCLES: u8 = 15;
pub const MAX_SPIN_ITERATIONS: u8 = 7;

const HEADER_BITS: u32 = 10;
const THREAD_BITS: u32 = 16;

/// Model parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub threads: usize,
    /// Lock/unlock cycles per thread
    pub cycles: u8,
    pub spin_iterations: u8,
    pub spurious_wakeups: bool,
    /// Abort exploration past this many distinct states
    pub max_states: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            cycles: 2,
            spin_iterations: 1,
            spurious_wakeups: false,
            max_states: 8_000_000,
        }
    }
}

impl ModelConfig {
    pub fn new(threads: usize, cycles: u8, spin_iterations: u8) -> Self {
        Self {
            threads,
            cycles,
            spin_iterations,
            ..Self::default()
        }
    }

    pub fn with_spurious_wakeups(mut self, spurious_wakeups: bool) -> Self {
        self.spurious_wakeups = spurious_wakeups;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(ModelError::InvalidConfig(format!(
                "threads must be in 1..={MAX_THREADS}"
            )));
        }
        if self.cycles == 0 || self.cycles > MAX_CYCLES {
            return Err(ModelError::InvalidConfig(format!(
                "cycles must be in 1..={MAX_CYCLES}"
            )));
        }
        if self.spin_iterations > MAX_SPIN_ITERATIONS {
            return Err(ModelError::InvalidConfig(format!(
                "spin_iterations must be at most {MAX_SPIN_ITERATIONS}"
            )));
        }
        Ok(())
    }

    fn total_acquisitions(&self) -> u8 {
        // Bounded by validate: 7 * 15 fits
        self.threads as u8 * self.cycles
    }
}

/// Property broken by a model execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViolationKind {
    #[error("mutual exclusion violated")]
    MutualExclusion,
    #[error("spin privilege not unique or out of sync with the spinning flag")]
    SpinPrivilege,
    #[error("execution stopped before every thread finished")]
    Deadlock,
    #[error("completion unreachable: a parked thread can never be woken")]
    LostWakeup,
    #[error("completed run did not count threads x cycles acquisitions")]
    AcquisitionCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{kind} (trace of {} states)", trace.len())]
    Violation {
        kind: ViolationKind,
        /// Rendered states from the initial state to the offending one
        trace: Vec<String>,
    },

    #[error("state space exceeds {0} states")]
    StateLimit(usize),

    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
}

/// Summary of a complete exploration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationReport {
    pub states: usize,
    pub transitions: usize,
    pub final_states: usize,
    /// Largest sleep set seen in any state
    pub max_parked: usize,
}

/// Summary of one simulated schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub steps: usize,
    pub acquisitions: u8,
    pub finished: bool,
}

/// Next shared-memory action of a thread
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pc {
    Grab,
    RestoreSleeping,
    CasAcquire,
    XchgAcquire,
    SetSleepBit,
    ClaimSpin,
    SpinReload,
    DropSpin,
    SleepReload,
    Park,
    Parked,
    WakeReload,
    Critical,
    WakeCheck,
    Wake,
    Done,
}

const PCS: [Pc; 16] = [
    Pc::Grab,
    Pc::RestoreSleeping,
    Pc::CasAcquire,
    Pc::XchgAcquire,
    Pc::SetSleepBit,
    Pc::ClaimSpin,
    Pc::SpinReload,
    Pc::DropSpin,
    Pc::SleepReload,
    Pc::Park,
    Pc::Parked,
    Pc::WakeReload,
    Pc::Critical,
    Pc::WakeCheck,
    Pc::Wake,
    Pc::Done,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ThreadState {
    pc: Pc,
    snapshot: u8,
    we_spin: bool,
    iteration: u8,
    completed: u8,
}

impl ThreadState {
    const fn new() -> Self {
        Self {
            pc: Pc::Grab,
            snapshot: 0,
            we_spin: false,
            iteration: 0,
            completed: 0,
        }
    }

    fn holds_lock(&self) -> bool {
        matches!(self.pc, Pc::RestoreSleeping | Pc::Critical)
    }

    /// Decide the next acquire attempt from the snapshot
    fn dispatch(&mut self) {
        self.pc = if self.snapshot & L != 0 {
            Pc::SetSleepBit
        } else if self.we_spin {
            Pc::CasAcquire
        } else {
            Pc::XchgAcquire
        };
    }

    fn spin_or_drop(&mut self, spin_iterations: u8) {
        self.pc = if self.iteration < spin_iterations {
            Pc::SpinReload
        } else {
            Pc::DropSpin
        };
    }

    fn finish_cycle(&mut self, cycles: u8) {
        self.completed += 1;
        self.pc = if self.completed == cycles {
            Pc::Done
        } else {
            Pc::Grab
        };
    }

    fn encode(&self) -> u16 {
        (self.pc as u16)
            | (u16::from(self.snapshot) << 4)
            | (u16::from(self.we_spin) << 7)
            | (u16::from(self.iteration) << 8)
            | (u16::from(self.completed) << 11)
    }

    fn decode(bits: u16) -> Self {
        Self {
            pc: PCS[usize::from(bits & 0xf)],
            snapshot: ((bits >> 4) & 0x7) as u8,
            we_spin: (bits >> 7) & 1 != 0,
            iteration: ((bits >> 8) & 0x7) as u8,
            completed: ((bits >> 11) & 0xf) as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelState {
    word: u8,
    acquisitions: u8,
    threads: Vec<ThreadState>,
}

impl ModelState {
    fn initial(config: &ModelConfig) -> Self {
        Self {
            word: 0,
            acquisitions: 0,
            threads: vec![ThreadState::new(); config.threads],
        }
    }

    fn encode(&self) -> u128 {
        let mut code = u128::from(self.word) | (u128::from(self.acquisitions) << 3);
        for (i, thread) in self.threads.iter().enumerate() {
            code |= u128::from(thread.encode()) << (HEADER_BITS + THREAD_BITS * i as u32);
        }
        code
    }

    fn decode(code: u128, threads: usize) -> Self {
        Self {
            word: (code & 0x7) as u8,
            acquisitions: ((code >> 3) & 0x7f) as u8,
            threads: (0..threads)
                .map(|i| {
                    let bits = (code >> (HEADER_BITS + THREAD_BITS * i as u32)) & 0xffff;
                    ThreadState::decode(bits as u16)
                })
                .collect(),
        }
    }

    fn all_done(&self) -> bool {
        self.threads.iter().all(|t| t.pc == Pc::Done)
    }

    fn parked(&self) -> usize {
        self.threads.iter().filter(|t| t.pc == Pc::Parked).count()
    }

    fn check_safety(&self, config: &ModelConfig) -> Option<ViolationKind> {
        let holders = self.threads.iter().filter(|t| t.holds_lock()).count();
        if holders > 1 || (holders == 1 && self.word & L == 0) {
            return Some(ViolationKind::MutualExclusion);
        }

        let spinners = self.threads.iter().filter(|t| t.we_spin).count();
        if spinners > 1 || (spinners == 1) != (self.word & P != 0) {
            return Some(ViolationKind::SpinPrivilege);
        }

        if self.acquisitions > config.total_acquisitions() {
            return Some(ViolationKind::AcquisitionCount);
        }
        None
    }

    /// Push every state reachable by one action of thread `t`
    fn step(&self, t: usize, config: &ModelConfig, out: &mut Vec<ModelState>) {
        let mut next = self.clone();
        let word = self.word;
        let me = &mut next.threads[t];

        match me.pc {
            Pc::Done => return,
            Pc::Parked => {
                if config.spurious_wakeups {
                    me.pc = Pc::WakeReload;
                    out.push(next);
                }
                return;
            }
            Pc::Grab => {
                next.word = (word & P) | L;
                if word & L == 0 {
                    next.acquisitions += 1;
                    me.pc = if word & S != 0 {
                        Pc::RestoreSleeping
                    } else {
                        Pc::Critical
                    };
                } else {
                    me.snapshot = L;
                    me.we_spin = false;
                    me.iteration = 0;
                    me.dispatch();
                }
            }
            Pc::RestoreSleeping => {
                next.word = word | S;
                me.pc = Pc::Critical;
            }
            Pc::CasAcquire => {
                if word == me.snapshot {
                    next.word = L | S;
                    next.acquisitions += 1;
                    me.we_spin = false;
                    me.pc = Pc::Critical;
                } else {
                    me.snapshot = word;
                    me.dispatch();
                }
            }
            Pc::XchgAcquire => {
                next.word = (word & P) | L | S;
                if word & L == 0 {
                    next.acquisitions += 1;
                    me.pc = Pc::Critical;
                } else {
                    me.snapshot = word;
                    me.dispatch();
                }
            }
            Pc::SetSleepBit => {
                next.word = word | S;
                if me.we_spin {
                    me.spin_or_drop(config.spin_iterations);
                } else {
                    me.pc = Pc::ClaimSpin;
                }
            }
            Pc::ClaimSpin => {
                next.word = word | P;
                if word & P == 0 {
                    me.we_spin = true;
                    me.spin_or_drop(config.spin_iterations);
                } else {
                    me.pc = Pc::SleepReload;
                }
            }
            Pc::SpinReload => {
                me.snapshot = word;
                me.iteration += 1;
                me.dispatch();
            }
            Pc::DropSpin => {
                next.word = word & !P;
                me.we_spin = false;
                me.pc = Pc::SleepReload;
            }
            Pc::SleepReload => {
                me.snapshot = word;
                if word & L == 0 || word & S == 0 {
                    me.dispatch();
                } else {
                    me.pc = Pc::Park;
                }
            }
            Pc::Park => {
                me.pc = if word == me.snapshot {
                    Pc::Parked
                } else {
                    Pc::WakeReload
                };
            }
            Pc::WakeReload => {
                me.iteration = 0;
                me.snapshot = word;
                me.dispatch();
            }
            Pc::Critical => {
                next.word = word & !(L | S);
                if word & S != 0 {
                    me.pc = Pc::WakeCheck;
                } else {
                    me.finish_cycle(config.cycles);
                }
            }
            Pc::WakeCheck => {
                if word & P != 0 {
                    me.finish_cycle(config.cycles);
                } else {
                    me.pc = Pc::Wake;
                }
            }
            Pc::Wake => {
                me.finish_cycle(config.cycles);
                let sleepers: Vec<usize> = (0..next.threads.len())
                    .filter(|&i| next.threads[i].pc == Pc::Parked)
                    .collect();
                if sleepers.is_empty() {
                    out.push(next);
                } else {
                    // wake(1) may pick any sleeper
                    for u in sleepers {
                        let mut woken = next.clone();
                        woken.threads[u].pc = Pc::WakeReload;
                        out.push(woken);
                    }
                }
                return;
            }
        }

        out.push(next);
    }

    fn successors(&self, config: &ModelConfig, out: &mut Vec<ModelState>) {
        out.clear();
        for t in 0..self.threads.len() {
            self.step(t, config, out);
        }
    }

    fn render(&self) -> String {
        let threads: Vec<String> = self
            .threads
            .iter()
            .map(|t| {
                format!(
                    "{:?}(snap={:03b},spin={},it={},done={})",
                    t.pc, t.snapshot, t.we_spin, t.iteration, t.completed
                )
            })
            .collect();
        format!(
            "word={:03b} acq={} [{}]",
            self.word,
            self.acquisitions,
            threads.join(", ")
        )
    }
}

fn violation(
    kind: ViolationKind,
    id: u32,
    states: &[u128],
    parent: &[u32],
    threads: usize,
) -> ModelError {
    let mut trace = Vec::new();
    let mut cursor = id;
    loop {
        trace.push(ModelState::decode(states[cursor as usize], threads).render());
        let up = parent[cursor as usize];
        if up == u32::MAX {
            break;
        }
        cursor = up;
    }
    trace.reverse();
    ModelError::Violation { kind, trace }
}

/// Exhaustively explore every interleaving allowed by `config`
pub fn explore(config: &ModelConfig) -> Result<ExplorationReport, ModelError> {
    config.validate()?;
    let n = config.threads;
    let total = config.total_acquisitions();

    let mut index: AHashMap<u128, u32> = AHashMap::new();
    let mut states: Vec<u128> = Vec::new();
    let mut parent: Vec<u32> = Vec::new();
    // (to, from) pairs; turned into reverse adjacency for the liveness pass
    let mut edges: Vec<(u32, u32)> = Vec::new();
    let mut queue = VecDeque::new();

    let initial = ModelState::initial(config).encode();
    index.insert(initial, 0);
    states.push(initial);
    parent.push(u32::MAX);
    queue.push_back(0u32);

    let mut final_states = 0;
    let mut max_parked = 0;
    let mut succ = Vec::new();

    while let Some(id) = queue.pop_front() {
        let state = ModelState::decode(states[id as usize], n);
        if let Some(kind) = state.check_safety(config) {
            return Err(violation(kind, id, &states, &parent, n));
        }
        max_parked = max_parked.max(state.parked());

        state.successors(config, &mut succ);
        if succ.is_empty() {
            final_states += 1;
            if !state.all_done() {
                return Err(violation(ViolationKind::Deadlock, id, &states, &parent, n));
            }
            if state.acquisitions != total {
                return Err(violation(
                    ViolationKind::AcquisitionCount,
                    id,
                    &states,
                    &parent,
                    n,
                ));
            }
        }

        for next in succ.drain(..) {
            let code = next.encode();
            let next_id = match index.get(&code) {
                Some(&existing) => existing,
                None => {
                    if states.len() >= config.max_states {
                        return Err(ModelError::StateLimit(config.max_states));
                    }
                    let fresh = states.len() as u32;
                    index.insert(code, fresh);
                    states.push(code);
                    parent.push(id);
                    queue.push_back(fresh);
                    fresh
                }
            };
            edges.push((next_id, id));
        }
    }
    drop(index);

    // Reverse reachability from the completed states
    edges.sort_unstable();
    let mut offsets = vec![0usize; states.len() + 1];
    for &(to, _) in &edges {
        offsets[to as usize + 1] += 1;
    }
    for i in 1..offsets.len() {
        offsets[i] += offsets[i - 1];
    }

    let mut can_finish = vec![false; states.len()];
    let mut stack: Vec<u32> = Vec::new();
    for (id, &code) in states.iter().enumerate() {
        if ModelState::decode(code, n).all_done() {
            can_finish[id] = true;
            stack.push(id as u32);
        }
    }
    while let Some(id) = stack.pop() {
        let id = id as usize;
        for &(_, from) in &edges[offsets[id]..offsets[id + 1]] {
            if !can_finish[from as usize] {
                can_finish[from as usize] = true;
                stack.push(from);
            }
        }
    }
    if let Some(stuck) = can_finish.iter().position(|ok| !ok) {
        return Err(violation(
            ViolationKind::LostWakeup,
            stuck as u32,
            &states,
            &parent,
            n,
        ));
    }

    let report = ExplorationReport {
        states: states.len(),
        transitions: edges.len(),
        final_states,
        max_parked,
    };
    debug!(?config, ?report, "Model exploration complete");
    Ok(report)
}

/// Run a single schedule, resolving each nondeterministic choice with the
/// next entry of `choices` (modulo the number of enabled transitions)
///
/// Safety is checked after every step; the run stops when `choices` runs
/// out or no transition is enabled.
pub fn simulate(config: &ModelConfig, choices: &[usize]) -> Result<SimulationReport, ModelError> {
    config.validate()?;
    let mut state = ModelState::initial(config);
    let mut trace = vec![state.render()];
    let mut succ = Vec::new();
    let mut steps = 0;

    let fail = |kind, trace: Vec<String>| ModelError::Violation { kind, trace };

    for &choice in choices {
        state.successors(config, &mut succ);
        if succ.is_empty() {
            break;
        }
        state = succ.swap_remove(choice % succ.len());
        steps += 1;
        trace.push(state.render());
        if let Some(kind) = state.check_safety(config) {
            return Err(fail(kind, trace));
        }
    }

    state.successors(config, &mut succ);
    let finished = succ.is_empty();
    if finished {
        if !state.all_done() {
            return Err(fail(ViolationKind::Deadlock, trace));
        }
        if state.acquisitions != config.total_acquisitions() {
            return Err(fail(ViolationKind::AcquisitionCount, trace));
        }
    }

    Ok(SimulationReport {
        steps,
        acquisitions: state.acquisitions,
        finished,
    })
}
