//! The build graph, a graph between target files and the rules that
//! produce them.

use crate::canon::canon_path;
use crate::fs::{self, MTime};
use anyhow::{anyhow, bail, Result};
use rayon::prelude::*;
use regex::bytes::Regex;
use rustc_hash::FxHashMap;
use std::rc::Rc;

const UNIT_SEPARATOR: char = '\u{1f}';

/// A rule as handed over by a front-end.  Paths are raw; the graph owns
/// canonicalization and identity.  This struct is the whole of the
/// front-end contract: anything that can produce a list of these can drive
/// the engine.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    /// Paths this rule writes.  Non-empty; no other rule may claim them.
    pub outs: Vec<String>,
    /// Inputs whose changes make the outputs stale.
    pub ins: Vec<String>,
    /// Inputs that must exist before the rule runs but never dirty it.
    pub order_only: Vec<String>,
    /// Shell command to run.
    pub cmdline: String,
    /// Human message shown instead of the command line.
    pub desc: Option<String>,
    /// Working directory for the command; also the base for relative
    /// discovered dependency paths.
    pub cwd: Option<String>,
    /// Path of a Make-style ".d" file the command writes.
    pub depfile: Option<String>,
    /// Marker prefix of include-trace lines in the command's output.
    pub deps_prefix: Option<String>,
    /// Output lines matching any of these patterns are dropped.
    pub filters: Vec<String>,
    /// Output lines matching any of these patterns are flagged for the
    /// reporter.
    pub highlights: Vec<String>,
    /// Expected relative duration, folded into scheduling priority.
    pub latency: u32,
    pub location: FileLoc,
}

impl Default for RuleSpec {
    fn default() -> Self {
        RuleSpec {
            outs: Vec::new(),
            ins: Vec::new(),
            order_only: Vec::new(),
            cmdline: String::new(),
            desc: None,
            cwd: None,
            depfile: None,
            deps_prefix: None,
            filters: Vec::new(),
            highlights: Vec::new(),
            latency: 1,
            location: FileLoc::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileLoc {
    pub filename: Rc<String>,
    pub line: usize,
}
impl std::fmt::Display for FileLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TargetId(usize);
impl TargetId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(usize);
impl RuleId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A file tracked by the graph: either a source file or the output of
/// exactly one rule.
#[derive(Debug)]
pub struct Target {
    /// Canonical path; the target's identity everywhere.
    pub name: String,
    /// The rule that writes this file, if any.
    pub producer: Option<RuleId>,
    /// Rules that take this file as an input of any kind.
    pub dependents: Vec<RuleId>,
}

#[derive(Debug)]
pub struct Rule {
    pub location: FileLoc,
    pub cmdline: String,
    pub desc: Option<String>,
    pub cwd: Option<String>,
    pub depfile: Option<String>,
    pub deps_prefix: Option<String>,
    pub filters: Vec<Regex>,
    pub highlights: Vec<Regex>,
    pub latency: u32,
    ins: Vec<TargetId>,
    order_only: Vec<TargetId>,
    discovered: Vec<TargetId>,
    outs: Vec<TargetId>,
}

impl Rule {
    pub fn ins(&self) -> &[TargetId] {
        &self.ins
    }
    pub fn order_only(&self) -> &[TargetId] {
        &self.order_only
    }
    /// Inputs recorded from a previous build's depfile or include trace.
    pub fn discovered(&self) -> &[TargetId] {
        &self.discovered
    }
    pub fn outs(&self) -> &[TargetId] {
        &self.outs
    }

    /// Inputs that, if changed, make the outputs stale.
    pub fn dirtying_ins(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.ins.iter().chain(self.discovered.iter()).copied()
    }

    /// Inputs that must be finished before this rule may run.
    pub fn gating_ins(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.ins
            .iter()
            .chain(self.order_only.iter())
            .chain(self.discovered.iter())
            .copied()
    }

    /// Replace the discovered dep set, dropping entries already declared.
    /// Returns true if the set changed.
    pub fn update_discovered(&mut self, mut deps: Vec<TargetId>) -> bool {
        deps.retain(|id| !self.ins.contains(id) && !self.order_only.contains(id));
        deps.sort();
        deps.dedup();
        if deps == self.discovered {
            return false;
        }
        self.discovered = deps;
        true
    }
}

pub struct Graph {
    targets: Vec<Target>,
    rules: Vec<Rule>,
    by_name: FxHashMap<String, TargetId>,
    /// Per-rule critical-path priority; filled during construction.
    priority: Vec<u32>,
}

impl Graph {
    /// Build and validate the graph from a front-end's rule list.
    /// Fails on an empty output set, a duplicate producer, a bad filter
    /// pattern, or a dependency cycle; nothing runs after any of these.
    pub fn from_rules(specs: Vec<RuleSpec>) -> Result<Graph> {
        let mut graph = Graph {
            targets: Vec::new(),
            rules: Vec::new(),
            by_name: FxHashMap::default(),
            priority: Vec::new(),
        };

        for spec in specs {
            let id = RuleId(graph.rules.len());
            if spec.outs.is_empty() {
                bail!("{}: rule has no outputs", spec.location);
            }
            if spec.cmdline.is_empty() {
                bail!("{}: rule has no command", spec.location);
            }

            let mut outs = Vec::with_capacity(spec.outs.len());
            for out in &spec.outs {
                let target = graph.target_id(out);
                if outs.contains(&target) {
                    bail!(
                        "{}: output '{}' is repeated in output list",
                        spec.location,
                        graph.target(target).name
                    );
                }
                outs.push(target);
            }
            for &out in &outs {
                let target = &mut graph.targets[out.index()];
                match target.producer {
                    Some(prev) => bail!(
                        "{}: multiple rules produce '{}' (first at {})",
                        spec.location,
                        target.name,
                        graph.rules[prev.index()].location
                    ),
                    None => target.producer = Some(id),
                }
            }

            let link = |graph: &mut Graph, paths: &[String]| -> Vec<TargetId> {
                let mut ids = Vec::with_capacity(paths.len());
                for path in paths {
                    let target = graph.target_id(path);
                    ids.push(target);
                    let dependents = &mut graph.targets[target.index()].dependents;
                    if !dependents.contains(&id) {
                        dependents.push(id);
                    }
                }
                ids
            };
            let ins = link(&mut graph, &spec.ins);
            let order_only = link(&mut graph, &spec.order_only);

            let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
                patterns
                    .iter()
                    .map(|pattern| {
                        Regex::new(pattern).map_err(|err| {
                            anyhow!("{}: bad pattern {:?}: {}", spec.location, pattern, err)
                        })
                    })
                    .collect()
            };
            let filters = compile(&spec.filters)?;
            let highlights = compile(&spec.highlights)?;

            graph.rules.push(Rule {
                location: spec.location,
                cmdline: spec.cmdline,
                desc: spec.desc,
                cwd: spec.cwd,
                depfile: spec.depfile,
                deps_prefix: spec.deps_prefix,
                filters,
                highlights,
                latency: spec.latency,
                ins,
                order_only,
                discovered: Vec::new(),
                outs,
            });
        }

        let postorder = graph.check_cycles()?;
        graph.compute_priorities(&postorder);
        Ok(graph)
    }

    /// Intern a path, creating the target node on first sight.
    pub fn target_id(&mut self, path: &str) -> TargetId {
        let canon = canon_path(path);
        match self.by_name.get(&canon) {
            Some(&id) => id,
            None => {
                let id = TargetId(self.targets.len());
                self.targets.push(Target {
                    name: canon.clone(),
                    producer: None,
                    dependents: Vec::new(),
                });
                self.by_name.insert(canon, id);
                id
            }
        }
    }

    /// Look a path up without creating anything.
    pub fn lookup(&self, path: &str) -> Option<TargetId> {
        self.by_name.get(&canon_path(path)).copied()
    }

    pub fn target(&self, id: TargetId) -> &Target {
        &self.targets[id.index()]
    }
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.index()]
    }
    pub fn rule_mut(&mut self, id: RuleId) -> &mut Rule {
        &mut self.rules[id.index()]
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }
    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }
    pub fn rule_ids(&self) -> impl Iterator<Item = RuleId> {
        (0..self.rules.len()).map(RuleId)
    }

    /// The state store key for a rule: its canonical output set.
    pub fn db_key(&self, id: RuleId) -> String {
        let names: Vec<&str> = self.rules[id.index()]
            .outs
            .iter()
            .map(|&out| self.targets[out.index()].name.as_str())
            .collect();
        names.join(&UNIT_SEPARATOR.to_string())
    }

    pub fn priority(&self, id: RuleId) -> u32 {
        self.priority[id.index()]
    }

    /// Rules that consume any output of `id`.
    fn dependent_rules(&self, id: RuleId) -> Vec<RuleId> {
        let mut deps = Vec::new();
        for &out in &self.rules[id.index()].outs {
            for &dependent in &self.targets[out.index()].dependents {
                if !deps.contains(&dependent) {
                    deps.push(dependent);
                }
            }
        }
        deps
    }

    /// Depth-first cycle check over declared edges, iterative so deep
    /// graphs cannot blow the stack.  Returns rules in postorder
    /// (dependencies before dependents) for the priority pass.
    fn check_cycles(&self) -> Result<Vec<RuleId>> {
        const UNSEEN: u8 = 0;
        const OPEN: u8 = 1;
        const CLOSED: u8 = 2;
        let mut state = vec![UNSEEN; self.rules.len()];
        let mut postorder = Vec::with_capacity(self.rules.len());

        let gating = |id: RuleId| {
            self.rules[id.index()]
                .gating_ins()
                .collect::<Vec<TargetId>>()
                .into_iter()
        };
        for root in self.rule_ids() {
            if state[root.index()] != UNSEEN {
                continue;
            }
            // Stack of (rule, remaining input edges to follow).
            let mut stack = vec![(root, gating(root))];
            state[root.index()] = OPEN;
            while let Some((id, edges)) = stack.last_mut() {
                let id = *id;
                match edges.next() {
                    None => {
                        state[id.index()] = CLOSED;
                        postorder.push(id);
                        stack.pop();
                    }
                    Some(input) => {
                        let producer = match self.targets[input.index()].producer {
                            None => continue,
                            Some(producer) => producer,
                        };
                        match state[producer.index()] {
                            CLOSED => {}
                            UNSEEN => {
                                state[producer.index()] = OPEN;
                                stack.push((producer, gating(producer)));
                            }
                            _ => {
                                let first_out = |rule: RuleId| {
                                    self.targets[self.rules[rule.index()].outs[0].index()]
                                        .name
                                        .as_str()
                                };
                                let mut names: Vec<&str> = stack
                                    .iter()
                                    .skip_while(|(open, _)| *open != producer)
                                    .map(|(open, _)| first_out(*open))
                                    .collect();
                                names.push(first_out(producer));
                                bail!("dependency cycle: {}", names.join(" -> "));
                            }
                        }
                    }
                }
            }
        }
        Ok(postorder)
    }

    /// Priority of a rule = its latency plus the longest chain of
    /// dependents still downstream of it.  Finishing high-priority rules
    /// first keeps the critical path moving and avoids end-of-build core
    /// starvation.  One pass over the reversed postorder visits every rule
    /// after all of its dependents.
    fn compute_priorities(&mut self, postorder: &[RuleId]) {
        let mut priority = vec![0u32; self.rules.len()];
        for &id in postorder.iter().rev() {
            let downstream = self
                .dependent_rules(id)
                .iter()
                .map(|dependent| priority[dependent.index()])
                .max()
                .unwrap_or(0);
            priority[id.index()] = self.rules[id.index()].latency + downstream;
        }
        self.priority = priority;
    }
}

/// Cached per-target mtimes for one build invocation.
pub struct MTimes {
    mtimes: Vec<Option<MTime>>,
}

impl MTimes {
    pub fn new(graph: &Graph) -> MTimes {
        MTimes {
            mtimes: vec![None; graph.num_targets()],
        }
    }

    /// stat() every target up front, in parallel; the graph-wide stat pass
    /// dominates startup on large builds.
    pub fn prefetch(&mut self, graph: &Graph) -> Result<()> {
        let names: Vec<&str> = graph.targets.iter().map(|t| t.name.as_str()).collect();
        let stats: Vec<std::io::Result<MTime>> =
            names.par_iter().map(|name| fs::stat(name)).collect();
        for (index, stat) in stats.into_iter().enumerate() {
            self.mtimes[index] =
                Some(stat.map_err(|err| anyhow!("stat {}: {}", names[index], err))?);
        }
        Ok(())
    }

    pub fn get(&self, id: TargetId) -> MTime {
        self.mtimes
            .get(id.index())
            .and_then(|slot| *slot)
            .unwrap_or(MTime::Missing)
    }
}
