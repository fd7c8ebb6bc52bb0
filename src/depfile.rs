//! The two sources of discovered dependencies: Make-style ".d" files and
//! compiler include-trace output.

use crate::scanner::{ParseResult, Scanner};

/// Skip spaces and backslashed line continuations.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.read() {
            ' ' => {}
            '\\' => match scanner.read() {
                '\n' => {}
                '\r' => scanner.expect('\n')?,
                _ => return scanner.parse_error("invalid backslash escape"),
            },
            _ => {
                scanner.back();
                break;
            }
        }
    }
    Ok(())
}

/// Like skip_spaces, but also crosses blank lines between stanzas.
fn skip_blank(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        skip_spaces(scanner)?;
        match scanner.read() {
            '\n' | '\r' => {}
            _ => {
                scanner.back();
                return Ok(());
            }
        }
    }
}

fn read_path<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Option<&'a str>> {
    skip_spaces(scanner)?;
    let start = scanner.ofs;
    loop {
        match scanner.read() {
            '\0' | ' ' | ':' | '\n' | '\r' => {
                scanner.back();
                break;
            }
            _ => {}
        }
    }
    let end = scanner.ofs;
    if end == start {
        return Ok(None);
    }
    Ok(Some(scanner.slice(start, end)))
}

/// Parse a ".d" file into the flattened set of prerequisite paths.
/// Multi-output rules produce several "target...: prereq..." stanzas; all
/// of their prerequisites end up in one set.
pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Vec<&'a str>> {
    let mut deps = Vec::new();
    loop {
        skip_blank(scanner)?;
        if scanner.peek() == '\0' {
            break;
        }
        if read_path(scanner)?.is_none() {
            return scanner.parse_error("expected target path");
        }
        while read_path(scanner)?.is_some() {}
        scanner.expect(':')?;
        while let Some(path) = read_path(scanner)? {
            deps.push(path);
        }
        skip_spaces(scanner)?;
        match scanner.read() {
            '\n' => {}
            '\r' => scanner.expect('\n')?,
            '\0' => {
                scanner.back();
            }
            c => return scanner.parse_error(format!("unexpected {:?}", c)),
        }
    }
    Ok(deps)
}

/// Split include-trace lines out of captured command output.  A line
/// beginning with `marker` names one included file and is consumed; every
/// other line is passed through untouched.
pub fn extract_show_includes(output: Vec<u8>, marker: &str) -> (Vec<u8>, Vec<String>) {
    let mut rest = Vec::with_capacity(output.len());
    let mut deps = Vec::new();
    for line in output.split_inclusive(|&b| b == b'\n') {
        let mut text: &[u8] = line;
        while let Some((&last, head)) = text.split_last() {
            if last == b'\n' || last == b'\r' {
                text = head;
            } else {
                break;
            }
        }
        if text.len() > marker.len() && text.starts_with(marker.as_bytes()) {
            let path = String::from_utf8_lossy(&text[marker.len()..]);
            let path = path.trim();
            if !path.is_empty() {
                deps.push(path.to_string());
                continue;
            }
        }
        rest.extend_from_slice(line);
    }
    (rest, deps)
}
