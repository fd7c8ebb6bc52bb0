//! Deciding which targets need rebuilding.
//!
//! The scan walks bottom-up from the requested targets: dependencies are
//! visited before dependents, so a dirty dependency propagates upward
//! exactly once per rule and each rule is decided in one place.

use crate::db::Db;
use crate::fs::MTime;
use crate::graph::{Graph, MTimes, RuleId, TargetId};
use crate::hash;
use anyhow::{bail, Result};

pub struct Scan<'a> {
    graph: &'a Graph,
    db: &'a Db,
    mtimes: &'a MTimes,
    /// Per-rule memo of the dirty decision.
    decided: Vec<Option<bool>>,
    /// Rules that must run, in the order they were decided.
    dirty: Vec<RuleId>,
    /// Rules visited and found up to date.
    clean: Vec<RuleId>,
}

impl<'a> Scan<'a> {
    pub fn new(graph: &'a Graph, db: &'a Db, mtimes: &'a MTimes) -> Scan<'a> {
        Scan {
            graph,
            db,
            mtimes,
            decided: vec![None; graph.num_rules()],
            dirty: Vec::new(),
            clean: Vec::new(),
        }
    }

    pub fn into_plan(self) -> (Vec<RuleId>, Vec<RuleId>) {
        (self.dirty, self.clean)
    }

    /// Visit a target, returning whether it is dirty.  Source targets are
    /// never dirty by definition; their mtimes enter dependents' checks.
    pub fn want_target(&mut self, id: TargetId) -> Result<bool> {
        match self.graph.target(id).producer {
            None => Ok(false),
            Some(rule) => self.want_rule(rule),
        }
    }

    fn want_rule(&mut self, id: RuleId) -> Result<bool> {
        if let Some(dirty) = self.decided[id.index()] {
            return Ok(dirty);
        }
        // Discovered deps recorded by an earlier run can form a loop the
        // construction-time cycle check never saw; treating re-entry as
        // clean terminates the walk.
        self.decided[id.index()] = Some(false);

        let rule = self.graph.rule(id);

        let mut dep_dirty = false;
        for &dep in rule.ins() {
            dep_dirty |= self.want_target(dep)?;
            if self.graph.target(dep).producer.is_none()
                && self.mtimes.get(dep) == MTime::Missing
            {
                bail!(
                    "'{}' needed by '{}' does not exist and no rule builds it",
                    self.graph.target(dep).name,
                    self.graph.target(rule.outs()[0]).name
                );
            }
        }
        // Order-only deps gate execution but never the dirtiness decision.
        for &dep in rule.order_only() {
            self.want_target(dep)?;
        }
        for &dep in rule.discovered() {
            dep_dirty |= self.want_target(dep)?;
        }

        let dirty = dep_dirty || self.rule_stale(id)?;
        self.decided[id.index()] = Some(dirty);
        if dirty {
            self.dirty.push(id);
        } else {
            self.clean.push(id);
        }
        Ok(dirty)
    }

    /// The per-rule staleness decision, assuming no dependency was dirty.
    fn rule_stale(&self, id: RuleId) -> Result<bool> {
        let rule = self.graph.rule(id);

        // Any declared output missing?
        for &out in rule.outs() {
            if self.mtimes.get(out) == MTime::Missing {
                return Ok(true);
            }
        }

        // Never built, or built by a different command?
        let entry = match self.db.get(&self.graph.db_key(id)) {
            None => return Ok(true),
            Some(entry) => entry,
        };
        if entry.hash != hash::signature(self.graph, id).0 {
            return Ok(true);
        }

        // Declared dependency set changed since the recorded build?
        let mut current: Vec<&str> = rule
            .ins()
            .iter()
            .map(|&dep| self.graph.target(dep).name.as_str())
            .collect();
        current.sort_unstable();
        current.dedup();
        if current != entry.hard {
            return Ok(true);
        }

        // Any dep touched after we finished?  A discovered dep that has
        // vanished also forces a rebuild (unlike a declared one, which is
        // an error handled in the walk above).
        for dep in rule.dirtying_ins() {
            match self.mtimes.get(dep) {
                MTime::Missing => return Ok(true),
                MTime::Stamp(mtime) => {
                    if mtime > entry.finished {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }
}
