//! The m2 database stores information about previous builds for deciding
//! which targets are up to date, and drives cleanup of outputs whose rules
//! have vanished.
//!
//! On disk it is a line-oriented store: a version header, then one record
//! per output set holding the command signature, the completion time, and
//! the dependency set (declared and discovered kept apart) used for that
//! build.  During a build records are appended as rules finish, with later
//! records superseding earlier ones for the same key; the file is compacted
//! once at startup.  A missing store is empty; an unreadable one degrades
//! to empty (everything dirty), never an error.

use crate::fs;
use crate::graph::{Graph, TargetId};
use anyhow::{anyhow, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufWriter, Write};

pub const DB_FILENAME: &str = ".m2_db";
const DB_HEADER: &str = "#m2 1";

/// What we knew about one output set the last time it built successfully.
#[derive(Debug, Clone)]
pub struct Entry {
    pub hash: u64,
    /// Completion time, seconds since the epoch.
    pub finished: u64,
    pub outs: Vec<String>,
    /// Declared inputs at the time of the build, sorted.
    pub hard: Vec<String>,
    /// Inputs discovered from the depfile or include trace, sorted.
    pub discovered: Vec<String>,
}

impl Entry {
    pub fn key(&self) -> String {
        self.outs.join("\u{1f}")
    }
}

pub struct Db {
    path: String,
    entries: FxHashMap<String, Entry>,
    w: Option<BufWriter<File>>,
    /// Set when the on-disk store was unreadable and we started fresh.
    pub recovered: bool,
}

impl Db {
    pub fn open(path: &str) -> Db {
        let (entries, recovered) = match std::fs::read_to_string(path) {
            Ok(text) => match parse(&text) {
                Some(entries) => (entries, false),
                None => (FxHashMap::default(), true),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                (FxHashMap::default(), false)
            }
            Err(_) => (FxHashMap::default(), true),
        };
        Db {
            path: path.to_string(),
            entries,
            w: None,
            recovered,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Reattach recorded discovered deps to the graph's rules, so the
    /// staleness scan and the scheduler see them.
    pub fn restore_discovered(&self, graph: &mut Graph) {
        for id in graph.rule_ids().collect::<Vec<_>>() {
            if let Some(entry) = self.entries.get(&graph.db_key(id)) {
                let ids: Vec<TargetId> = entry
                    .discovered
                    .iter()
                    .map(|path| graph.target_id(path))
                    .collect();
                graph.rule_mut(id).update_discovered(ids);
            }
        }
    }

    /// Drop every entry whose output set no longer has a rule in the
    /// graph, deleting the orphaned outputs from disk (best effort), then
    /// compact the store.  Returns the paths that were deleted.
    pub fn prune(&mut self, graph: &Graph) -> Result<Vec<String>> {
        let live: FxHashSet<String> = graph.rule_ids().map(|id| graph.db_key(id)).collect();
        let mut deleted = Vec::new();
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|key| !live.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(entry) = self.entries.remove(&key) {
                for out in entry.outs {
                    if fs::stat(&out).unwrap_or(fs::MTime::Missing) != fs::MTime::Missing
                        && fs::remove_path(&out).is_ok()
                    {
                        deleted.push(out);
                    }
                }
            }
        }
        self.compact()?;
        Ok(deleted)
    }

    /// Rewrite the store from the in-memory map and keep the handle open
    /// for appending.
    fn compact(&mut self) -> Result<()> {
        let file = File::create(&self.path)
            .map_err(|err| anyhow!("create {}: {}", self.path, err))?;
        let mut w = BufWriter::new(file);
        writeln!(w, "{}", DB_HEADER)?;
        for entry in self.entries.values() {
            write_entry(&mut w, entry)?;
        }
        w.flush()?;
        self.w = Some(w);
        Ok(())
    }

    /// Record a successful build of one output set.  Called once per
    /// completion, by the scheduler; a rule's entry is never touched by
    /// anything but its own completion.
    pub fn record(&mut self, entry: Entry) -> Result<()> {
        if self.w.is_none() {
            self.compact()?;
        }
        if let Some(w) = self.w.as_mut() {
            write_entry(w, &entry)?;
            w.flush()?;
        }
        self.entries.insert(entry.key(), entry);
        Ok(())
    }
}

fn write_entry(w: &mut impl Write, entry: &Entry) -> std::io::Result<()> {
    write!(
        w,
        "{:016x} {} {} {} {}",
        entry.hash,
        entry.finished,
        entry.outs.len(),
        entry.hard.len(),
        entry.discovered.len()
    )?;
    for path in entry
        .outs
        .iter()
        .chain(entry.hard.iter())
        .chain(entry.discovered.iter())
    {
        write!(w, "\t{}", path)?;
    }
    writeln!(w)
}

/// Parse the whole store; None means corrupt.
fn parse(text: &str) -> Option<FxHashMap<String, Entry>> {
    let mut lines = text.lines();
    if lines.next()? != DB_HEADER {
        return None;
    }
    let mut entries = FxHashMap::default();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(2, '\t');
        let head = fields.next()?;
        let paths = fields.next()?;
        let mut head = head.split_whitespace();
        let hash = u64::from_str_radix(head.next()?, 16).ok()?;
        let finished: u64 = head.next()?.parse().ok()?;
        let nouts: usize = head.next()?.parse().ok()?;
        let nhard: usize = head.next()?.parse().ok()?;
        let ndiscovered: usize = head.next()?.parse().ok()?;
        let mut paths: Vec<String> = paths.split('\t').map(|p| p.to_string()).collect();
        if paths.len() != nouts + nhard + ndiscovered || nouts == 0 {
            return None;
        }
        let discovered = paths.split_off(nouts + nhard);
        let hard = paths.split_off(nouts);
        let entry = Entry {
            hash,
            finished,
            outs: paths,
            hard,
            discovered,
        };
        entries.insert(entry.key(), entry);
    }
    Some(entries)
}
