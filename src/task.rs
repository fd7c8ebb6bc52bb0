//! Runs build tasks, potentially in parallel.
//! Unaware of the build graph or scheduling; one task in, one result out.

use crate::canon::CanonCache;
use crate::depfile;
use crate::fs;
use crate::graph::RuleId;
use crate::process::{self, Termination};
use crate::scanner::Scanner;
use anyhow::{anyhow, Result};
use regex::bytes::Regex;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

/// Everything a worker needs to execute one rule, detached from the graph
/// so it can cross the thread boundary.
pub struct TaskSpec {
    pub id: RuleId,
    pub cmdline: String,
    pub cwd: Option<String>,
    pub outs: Vec<String>,
    pub depfile: Option<String>,
    pub deps_prefix: Option<String>,
    pub filters: Vec<Regex>,
    pub highlights: Vec<Regex>,
}

pub struct FinishedTask {
    /// A (faked) "thread id", used to put different finished tasks in
    /// different tracks of a performance trace.
    pub tid: usize,
    pub id: RuleId,
    pub span: (Instant, Instant),
    pub result: TaskResult,
}

/// The result of executing one rule's command.
pub struct TaskResult {
    pub termination: Termination,
    /// Combined stdout/stderr, after suppression filters.
    pub output: Vec<u8>,
    /// Output lines matched by the rule's highlight patterns.
    pub highlights: Vec<String>,
    /// Canonicalized deps discovered from the depfile or include trace.
    pub discovered: Option<Vec<String>>,
}

/// Reads dependencies from a .d file path.
fn read_depfile(path: &str) -> Result<Vec<String>> {
    let mut bytes = std::fs::read(path).map_err(|err| anyhow!("read {}: {}", path, err))?;
    bytes.push(0);
    let mut scanner = Scanner::new(&bytes);
    let deps = depfile::parse(&mut scanner)
        .map_err(|err| anyhow!(scanner.format_parse_error(path, err)))?;
    Ok(deps.into_iter().map(str::to_owned).collect())
}

/// Drop suppressed lines, collect highlighted ones.
fn apply_filters(raw: Vec<u8>, filters: &[Regex], highlights: &[Regex]) -> (Vec<u8>, Vec<String>) {
    if filters.is_empty() && highlights.is_empty() {
        return (raw, Vec::new());
    }
    let mut kept = Vec::with_capacity(raw.len());
    let mut flagged = Vec::new();
    for line in raw.split_inclusive(|&b| b == b'\n') {
        let text = match line.split_last() {
            Some((&b'\n', head)) => match head.split_last() {
                Some((&b'\r', head)) => head,
                _ => head,
            },
            _ => line,
        };
        if filters.iter().any(|re| re.is_match(text)) {
            continue;
        }
        if highlights.iter().any(|re| re.is_match(text)) {
            flagged.push(String::from_utf8_lossy(text).into_owned());
        }
        kept.extend_from_slice(line);
    }
    (kept, flagged)
}

fn delete_outputs(outs: &[String]) {
    for out in outs {
        let _ = fs::remove_path(out);
    }
}

/// Executes a build task as a subprocess.
/// Returns an Err() only when we failed outside of the process itself.
fn run_task(spec: &TaskSpec, cache: &CanonCache) -> Result<TaskResult> {
    for out in &spec.outs {
        if let Some(parent) = Path::new(out).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| anyhow!("mkdir {:?}: {}", parent, err))?;
            }
        }
        // Clobber stale outputs first, so an interrupted or failed command
        // can never leave a previous run's artifact looking current.
        fs::remove_path(out).map_err(|err| anyhow!("remove {}: {}", out, err))?;
    }

    let (mut termination, raw) = process::run_command(&spec.cmdline, spec.cwd.as_deref())?;

    let mut output = raw;
    let mut discovered = None;
    if termination == Termination::Success {
        let mut deps = Vec::new();
        if let Some(marker) = &spec.deps_prefix {
            let (rest, found) = depfile::extract_show_includes(output, marker);
            output = rest;
            deps.extend(found);
        }
        if let Some(path) = &spec.depfile {
            deps.extend(read_depfile(path)?);
        }
        if !deps.is_empty() || spec.depfile.is_some() || spec.deps_prefix.is_some() {
            discovered = Some(
                deps.iter()
                    .map(|dep| cache.resolve(spec.cwd.as_deref(), dep))
                    .collect(),
            );
        }
    }

    let (mut output, highlights) = apply_filters(output, &spec.filters, &spec.highlights);

    if termination == Termination::Success {
        for out in &spec.outs {
            if fs::stat(out)? == fs::MTime::Missing {
                termination = Termination::Failure;
                output.extend_from_slice(
                    format!("m2: declared output '{}' missing after command succeeded\n", out)
                        .as_bytes(),
                );
            }
        }
    }
    if termination != Termination::Success {
        // Never leave partial artifacts behind.
        delete_outputs(&spec.outs);
    }

    Ok(TaskResult {
        termination,
        output,
        highlights,
        discovered,
    })
}

/// Tracks faked "thread ids" -- integers assigned to running tasks so a
/// performance trace can show parallelism on stable tracks.
struct ThreadIds {
    /// An entry is true while claimed.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn new() -> Self {
        ThreadIds { slots: Vec::new() }
    }

    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                self.slots.push(true);
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

/// The bounded worker pool.  Each started task gets a thread that blocks on
/// the child process and reports back over a channel; the scheduler is the
/// only consumer.
pub struct Runner {
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    running: usize,
    tids: ThreadIds,
    parallelism: usize,
}

impl Runner {
    pub fn new(parallelism: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            finished_send: tx,
            finished_recv: rx,
            running: 0,
            tids: ThreadIds::new(),
            parallelism,
        }
    }

    pub fn can_start_more(&self) -> bool {
        self.running < self.parallelism
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn start(&mut self, spec: TaskSpec, cache: Arc<CanonCache>) {
        let tid = self.tids.claim();
        let tx = self.finished_send.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let result = run_task(&spec, &cache).unwrap_or_else(|err| {
                delete_outputs(&spec.outs);
                TaskResult {
                    termination: Termination::Failure,
                    output: err.to_string().into_bytes(),
                    highlights: Vec::new(),
                    discovered: None,
                }
            });
            let finish = Instant::now();

            let task = FinishedTask {
                tid,
                id: spec.id,
                span: (start, finish),
                result,
            };
            // The send only fails if the receiver disappeared, e.g. during
            // shutdown.
            let _ = tx.send(task);
        });
        self.running += 1;
    }

    /// Wait for a task to complete, with a timeout.
    /// If the timeout elapses, returns None.
    pub fn wait(&mut self, dur: Duration) -> Option<FinishedTask> {
        let task = match self.finished_recv.recv_timeout(dur) {
            Err(mpsc::RecvTimeoutError::Timeout) => return None,
            // The unwrap() checks the recv() call, to panic on mpsc errors.
            r => r.unwrap(),
        };
        self.tids.release(task.tid);
        self.running -= 1;
        Some(task)
    }
}
