//! Command line entry: flag parsing and the top-level build orchestration.

use crate::canon::CanonCache;
use crate::db::{Db, DB_FILENAME};
use crate::fs::MTime;
use crate::graph::{Graph, MTimes};
use crate::load;
use crate::progress::{DumbConsoleProgress, Progress};
use crate::signal;
use crate::stale::Scan;
use crate::trace;
use crate::work::{BuildOutcome, Work};
use anyhow::{anyhow, bail};
use std::path::Path;
use std::sync::Arc;

#[derive(argh::FromArgs)]
/// m2, a parallel incremental build engine.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// input manifest [default=build.m2]
    #[argh(option, short = 'f', default = "load::MANIFEST_FILENAME.to_string()")]
    file: String,

    /// parallelism [default: logical core count]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// write a performance trace to trace.json
    #[argh(switch)]
    trace: bool,

    /// targets to build [default: the manifest's defaults]
    #[argh(positional)]
    targets: Vec<String>,
}

fn build(args: &Args) -> anyhow::Result<BuildOutcome> {
    let load::Manifest { rules, defaults } = trace::scope("load", || load::read(&args.file))?;
    let mut graph = trace::scope("graph", || Graph::from_rules(rules))?;

    let mut progress = DumbConsoleProgress::new(args.verbose);

    let mut db = Db::open(DB_FILENAME);
    if db.recovered {
        progress.log("m2: state db unreadable, rebuilding from scratch");
    }
    db.restore_discovered(&mut graph);
    for path in db.prune(&graph)? {
        progress.log(&format!("m2: deleted stale output '{}'", path));
    }

    let requested = if args.targets.is_empty() {
        &defaults
    } else {
        &args.targets
    };
    if requested.is_empty() {
        bail!("no targets specified and no defaults in {}", args.file);
    }
    let mut targets = Vec::new();
    for name in requested {
        match graph.lookup(name) {
            Some(id) => targets.push(id),
            None => bail!("unknown target {:?}", name),
        }
    }

    let mut mtimes = MTimes::new(&graph);
    trace::scope("stat", || mtimes.prefetch(&graph))?;

    for &target in &targets {
        if graph.target(target).producer.is_none() && mtimes.get(target) == MTime::Missing {
            bail!("no rule to build '{}'", graph.target(target).name);
        }
    }

    let (dirty, clean) = {
        let mut scan = Scan::new(&graph, &db, &mtimes);
        trace::scope("scan", || -> anyhow::Result<()> {
            for &target in &targets {
                scan.want_target(target)?;
            }
            Ok(())
        })?;
        scan.into_plan()
    };

    let parallelism = args.jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1)
    });
    let cache = Arc::new(CanonCache::new());
    let mut work = Work::new(
        &mut graph,
        &mut db,
        &mut progress,
        parallelism,
        cache,
        dirty,
        clean,
    );
    trace::scope("build", || work.run())
}

fn run_impl() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();

    if let Some(dir) = &args.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }
    if args.trace {
        trace::open("trace.json")?;
    }
    signal::install();

    Ok(match build(&args)? {
        BuildOutcome::Success(0) => {
            // Special case: don't print numbers when no work was done.
            println!("m2: no work to do");
            0
        }
        BuildOutcome::Success(n) => {
            println!("m2: ran {} task{}, now up to date", n, if n == 1 { "" } else { "s" });
            0
        }
        BuildOutcome::Failed => {
            // No summary; the failing task's output is the news.
            1
        }
        BuildOutcome::Interrupted => {
            println!("m2: interrupted");
            130
        }
    })
}

pub fn run() -> anyhow::Result<i32> {
    let result = run_impl();
    trace::close()?;
    result
}
