//! The command signature recorded per output set, compared across runs to
//! catch rules whose command changed even when no input did.

use crate::graph::{Graph, RuleId};
use rustc_hash::FxHasher;
use std::hash::Hasher;

/// Signature of one rule's command as configured; compared against the
/// state store's recorded value to decide staleness.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Signature(pub u64);

const UNIT_SEPARATOR: u8 = 0x1F;

/// Hash the parts of a rule that determine its outputs' content: the
/// command line, where it runs, how discovered deps are extracted, and the
/// output set itself.  Order-only deps and output filters are excluded;
/// they cannot change what the command writes.  Input mtimes are excluded
/// too: the staleness evaluator compares those separately.
pub fn signature(graph: &Graph, id: RuleId) -> Signature {
    let rule = graph.rule(id);
    let mut hasher = FxHasher::default();
    for &out in rule.outs() {
        hasher.write(graph.target(out).name.as_bytes());
        hasher.write_u8(UNIT_SEPARATOR);
    }
    hasher.write(rule.cmdline.as_bytes());
    hasher.write_u8(UNIT_SEPARATOR);
    hasher.write(rule.cwd.as_deref().unwrap_or("").as_bytes());
    hasher.write_u8(UNIT_SEPARATOR);
    hasher.write(rule.depfile.as_deref().unwrap_or("").as_bytes());
    hasher.write_u8(UNIT_SEPARATOR);
    hasher.write(rule.deps_prefix.as_deref().unwrap_or("").as_bytes());
    Signature(hasher.finish())
}
