//! Chrome trace output, viewable in chrome://tracing or Perfetto.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_event(
        &mut self,
        name: &str,
        tid: usize,
        start: Instant,
        end: Instant,
    ) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ph\": \"X\", \"ts\": {}, \"dur\": {} }}",
            tid,
            name,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros(),
        )
    }

    fn write_complete(
        &mut self,
        name: &str,
        tid: usize,
        start: Instant,
        end: Instant,
    ) -> std::io::Result<()> {
        self.write_event(name, tid, start, end)?;
        writeln!(self.w, ",")
    }

    fn close(&mut self) -> std::io::Result<()> {
        let start = self.start;
        self.write_event("main", 0, start, Instant::now())?;
        writeln!(self.w, "\n]")?;
        self.w.flush()
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    *TRACE.lock().unwrap() = Some(trace);
    Ok(())
}

/// Time a phase of the build, when tracing is on.
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if TRACE.lock().unwrap().is_none() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    let end = Instant::now();
    if let Some(trace) = TRACE.lock().unwrap().as_mut() {
        let _ = trace.write_complete(name, 0, start, end);
    }
    result
}

/// Record one finished task on its worker's track.
pub fn write_task(name: &str, tid: usize, span: (Instant, Instant)) {
    if let Some(trace) = TRACE.lock().unwrap().as_mut() {
        // Track 0 is the scheduler's.
        let _ = trace.write_complete(name, tid + 1, span.0, span.1);
    }
}

pub fn close() -> std::io::Result<()> {
    if let Some(trace) = TRACE.lock().unwrap().as_mut() {
        return trace.close();
    }
    Ok(())
}
