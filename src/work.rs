//! The scheduler: drives the dirty subgraph to completion in dependency
//! order, dispatching onto a bounded worker pool with critical-path
//! priority.

use crate::canon::CanonCache;
use crate::db::{Db, Entry};
use crate::fs;
use crate::graph::{Graph, RuleId, TargetId};
use crate::hash;
use crate::process::Termination;
use crate::progress::{build_message, Progress};
use crate::signal;
use crate::task::{FinishedTask, Runner, TaskSpec};
use crate::trace;
use anyhow::{bail, Result};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

/// States a scheduled rule moves through.  Rules found clean start out
/// Done and never run; Skipped marks transitive dependents of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Waiting,
    Ready,
    Running,
    Done,
    Failed,
    Skipped,
}
const STATE_COUNT: usize = 6;

/// Counts of rules in each state, handed to progress reporters.
#[derive(Clone, Debug, Default)]
pub struct StateCounts([usize; STATE_COUNT]);

impl StateCounts {
    pub fn add(&mut self, state: BuildState, delta: isize) {
        let slot = &mut self.0[state as usize];
        *slot = (*slot as isize + delta) as usize;
    }
    pub fn get(&self, state: BuildState) -> usize {
        self.0[state as usize]
    }
    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
    /// Rules not yet resolved one way or the other.
    pub fn remaining(&self) -> usize {
        self.get(BuildState::Waiting) + self.get(BuildState::Ready) + self.get(BuildState::Running)
    }
}

/// How one whole build invocation ended.
#[derive(Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Everything reached Done; carries the number of commands executed.
    Success(usize),
    /// At least one rule Failed or was Skipped.
    Failed,
    /// Interrupt received; dispatch stopped and in-flight work was cleaned
    /// up.
    Interrupted,
}

/// A rule in the ready set.  Ordered by priority, then first-queued-first
/// for determinism between equals.
struct ReadyJob {
    priority: u32,
    seq: usize,
    id: RuleId,
}

impl PartialEq for ReadyJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for ReadyJob {}
impl PartialOrd for ReadyJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ReadyJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap pops the max: highest priority wins, lowest seq
        // breaks ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Work<'a> {
    graph: &'a mut Graph,
    db: &'a mut Db,
    progress: &'a mut dyn Progress,
    cache: Arc<CanonCache>,

    states: Vec<BuildState>,
    /// Whether the rule is part of this build at all (dirty or clean).
    scheduled: Vec<bool>,
    /// Per-rule count of dirty rules it still waits on.
    pending: Vec<usize>,
    /// Per-rule list of dirty dependents to unblock or skip.
    dependents: Vec<Vec<RuleId>>,
    counts: StateCounts,

    ready: BinaryHeap<ReadyJob>,
    seq: usize,
    runner: Runner,
    tasks_run: usize,
    failed: bool,
    cancelled: bool,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: &'a mut Graph,
        db: &'a mut Db,
        progress: &'a mut dyn Progress,
        parallelism: usize,
        cache: Arc<CanonCache>,
        dirty: Vec<RuleId>,
        clean: Vec<RuleId>,
    ) -> Work<'a> {
        let n = graph.num_rules();
        let mut work = Work {
            graph,
            db,
            progress,
            cache,
            states: vec![BuildState::Done; n],
            scheduled: vec![false; n],
            pending: vec![0; n],
            dependents: vec![Vec::new(); n],
            counts: StateCounts::default(),
            ready: BinaryHeap::new(),
            seq: 0,
            runner: Runner::new(parallelism.max(1)),
            tasks_run: 0,
            failed: false,
            cancelled: false,
        };

        for &id in &clean {
            work.scheduled[id.index()] = true;
            work.states[id.index()] = BuildState::Done;
            work.counts.add(BuildState::Done, 1);
        }
        for &id in &dirty {
            work.scheduled[id.index()] = true;
            work.states[id.index()] = BuildState::Waiting;
            work.counts.add(BuildState::Waiting, 1);
        }
        // Wire the gating edges between dirty rules: a rule waits on each
        // distinct dirty producer among its inputs of any kind.
        for &id in &dirty {
            let mut waits_on: Vec<RuleId> = work
                .graph
                .rule(id)
                .gating_ins()
                .filter_map(|input| work.graph.target(input).producer)
                .filter(|&producer| {
                    // A depfile can name the rule's own output; a rule never
                    // waits on itself.
                    producer != id
                        && work.scheduled[producer.index()]
                        && work.states[producer.index()] == BuildState::Waiting
                })
                .collect();
            waits_on.sort();
            waits_on.dedup();
            work.pending[id.index()] = waits_on.len();
            for producer in waits_on {
                work.dependents[producer.index()].push(id);
            }
            if work.pending[id.index()] == 0 {
                work.make_ready(id);
            }
        }
        work
    }

    fn make_ready(&mut self, id: RuleId) {
        self.counts.add(self.states[id.index()], -1);
        self.states[id.index()] = BuildState::Ready;
        self.counts.add(BuildState::Ready, 1);
        self.ready.push(ReadyJob {
            priority: self.graph.priority(id),
            seq: self.seq,
            id,
        });
        self.seq += 1;
    }

    fn set_state(&mut self, id: RuleId, state: BuildState) {
        self.counts.add(self.states[id.index()], -1);
        self.states[id.index()] = state;
        self.counts.add(state, 1);
    }

    /// Run the build to completion: dispatch ready rules while any remain,
    /// harvest finished tasks, and propagate completions and failures.
    pub fn run(&mut self) -> Result<BuildOutcome> {
        self.progress.update(&self.counts);
        loop {
            if signal::interrupted() && !self.cancelled {
                self.cancel();
            }
            while !self.cancelled && self.runner.can_start_more() {
                match self.ready.pop() {
                    Some(job) => self.start(job.id),
                    None => break,
                }
            }
            if !self.runner.is_running() {
                if self.counts.remaining() == 0 || self.cancelled {
                    break;
                }
                // Nothing running, nothing ready, rules still waiting:
                // discovered deps recorded by an earlier run must have
                // closed a loop over the current graph.
                bail!(
                    "build stuck: {} rules waiting but nothing is runnable",
                    self.counts.get(BuildState::Waiting)
                );
            }
            if let Some(task) = self.runner.wait(Duration::from_millis(500)) {
                self.finish(task)?;
                self.progress.update(&self.counts);
            }
        }
        Ok(if self.cancelled {
            BuildOutcome::Interrupted
        } else if self.failed {
            BuildOutcome::Failed
        } else {
            BuildOutcome::Success(self.tasks_run)
        })
    }

    fn start(&mut self, id: RuleId) {
        let rule = self.graph.rule(id);
        let spec = TaskSpec {
            id,
            cmdline: rule.cmdline.clone(),
            cwd: rule.cwd.clone(),
            outs: rule
                .outs()
                .iter()
                .map(|&out| self.graph.target(out).name.clone())
                .collect(),
            depfile: rule.depfile.clone(),
            deps_prefix: rule.deps_prefix.clone(),
            filters: rule.filters.clone(),
            highlights: rule.highlights.clone(),
        };
        self.set_state(id, BuildState::Running);
        self.progress.task_started(id, self.graph.rule(id));
        self.runner.start(spec, self.cache.clone());
        self.tasks_run += 1;
    }

    fn finish(&mut self, task: FinishedTask) -> Result<()> {
        let id = task.id;
        trace::write_task(build_message(self.graph.rule(id)), task.tid, task.span);
        match task.result.termination {
            Termination::Success => {
                if let Some(deps) = &task.result.discovered {
                    let ids: Vec<TargetId> =
                        deps.iter().map(|dep| self.graph.target_id(dep)).collect();
                    self.graph.rule_mut(id).update_discovered(ids);
                }
                self.record_success(id)?;
                self.set_state(id, BuildState::Done);
                for dependent in self.dependents[id.index()].clone() {
                    self.pending[dependent.index()] -= 1;
                    if self.pending[dependent.index()] == 0
                        && self.states[dependent.index()] == BuildState::Waiting
                    {
                        self.make_ready(dependent);
                    }
                }
            }
            Termination::Failure | Termination::Interrupted => {
                // The worker already deleted the rule's outputs.
                self.failed = true;
                self.set_state(id, BuildState::Failed);
                self.skip_dependents(id);
            }
        }
        self.progress
            .task_finished(id, self.graph.rule(id), &task.result);
        Ok(())
    }

    /// Write the state store entry for a rule that just built.
    fn record_success(&mut self, id: RuleId) -> Result<()> {
        let entry = {
            let graph = &*self.graph;
            let rule = graph.rule(id);
            let name = |&target: &TargetId| graph.target(target).name.clone();
            let mut hard: Vec<String> = rule.ins().iter().map(name).collect();
            hard.sort();
            hard.dedup();
            let mut discovered: Vec<String> = rule.discovered().iter().map(name).collect();
            discovered.sort();
            Entry {
                hash: hash::signature(graph, id).0,
                finished: fs::now(),
                outs: rule.outs().iter().map(name).collect(),
                hard,
                discovered,
            }
        };
        self.db.record(entry)
    }

    /// A failed rule takes every transitive dependent with it, without
    /// running their commands.
    fn skip_dependents(&mut self, id: RuleId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            for dependent in self.dependents[id.index()].clone() {
                if self.states[dependent.index()] == BuildState::Waiting {
                    self.set_state(dependent, BuildState::Skipped);
                    stack.push(dependent);
                }
            }
        }
    }

    /// Interrupt: stop dispatching, drop everything queued, and let the
    /// in-flight tasks drain.
    fn cancel(&mut self) {
        self.cancelled = true;
        self.progress
            .log("m2: interrupt, waiting for running tasks");
        while let Some(job) = self.ready.pop() {
            self.set_state(job.id, BuildState::Skipped);
        }
        for id in self.graph.rule_ids().collect::<Vec<_>>() {
            if self.scheduled[id.index()] && self.states[id.index()] == BuildState::Waiting {
                self.set_state(id, BuildState::Skipped);
            }
        }
    }
}
