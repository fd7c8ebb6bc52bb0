//! Path canonicalization.
//!
//! Every path entering the engine passes through here, so two spellings of
//! the same file always collapse to a single identity; graph lookups and
//! state store keys use nothing else.

use dashmap::DashMap;

#[cfg(windows)]
fn fold(path: &str) -> String {
    // Case-insensitive filesystem: one case, one separator.
    path.replace('\\', "/").to_ascii_lowercase()
}

#[cfg(not(windows))]
fn fold(path: &str) -> String {
    path.to_string()
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    if bytes.first() == Some(&b'/') || bytes.first() == Some(&b'\\') {
        return true;
    }
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Lexically canonicalize a path: collapse `.` and `..` components and
/// repeated slashes.  Does not touch the disk, so symlinks are taken at
/// face value; these spellings mostly show up from front-ends gluing
/// directories onto relative paths.
pub fn canon_path(path: &str) -> String {
    let path = fold(path);
    let rooted = path.starts_with('/');
    let mut components: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => match components.last() {
                None | Some(&"..") => {
                    if !rooted {
                        components.push("..");
                    }
                }
                Some(_) => {
                    components.pop();
                }
            },
            _ => components.push(comp),
        }
    }
    let mut out = String::with_capacity(path.len());
    if rooted {
        out.push('/');
    }
    out.push_str(&components.join("/"));
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// Canonicalize `path`, resolving it against `base` when it is relative.
/// `base` itself is relative to the engine's invocation root, as are all
/// returned paths.
pub fn resolve_path(base: Option<&str>, path: &str) -> String {
    match base {
        Some(base) if !is_absolute(path) => canon_path(&format!("{}/{}", base, path)),
        _ => canon_path(path),
    }
}

/// Memo of resolve_path results, shared with worker threads.
///
/// Discovered dependency sets repeat the same header paths across many
/// rules, and workers canonicalize them as depfiles are parsed; one
/// concurrent cache keeps that from being quadratic string work.
pub struct CanonCache {
    map: DashMap<String, String>,
}

impl CanonCache {
    pub fn new() -> Self {
        CanonCache {
            map: DashMap::new(),
        }
    }

    pub fn resolve(&self, base: Option<&str>, path: &str) -> String {
        let key = match base {
            Some(base) => format!("{}\u{1f}{}", base, path),
            None => path.to_string(),
        };
        if let Some(hit) = self.map.get(&key) {
            return hit.clone();
        }
        let canon = resolve_path(base, path);
        self.map.insert(key, canon.clone());
        canon
    }
}
