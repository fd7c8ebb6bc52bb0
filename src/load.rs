//! The reference front-end: reads a build.m2 manifest into RuleSpecs.
//!
//! The engine itself only consumes `Vec<RuleSpec>` and does not care where
//! the list came from; this module is the thinnest useful producer of it.
//!
//! The format is line oriented:
//!
//! ```text
//! # comment
//! default out/app
//!
//! build out/a.o out/a.d : src/a.c | out/gen.h
//!   command = cc -MD -MF out/a.d -c src/a.c -o out/a.o
//!   desc = CC out/a.o
//!   depfile = out/a.d
//!   filter = ^note:
//!   highlight = error:
//! ```
//!
//! A `build` line names outputs, then `:`, then inputs, with everything
//! after a `|` token order-only.  Indented `key = value` lines configure
//! the preceding build; `command` is required, `filter`/`highlight` may
//! repeat, and patterns are searched within each output line (anchor with
//! `^` as needed).  Remaining keys: `cwd`, `deps_prefix`, `latency`.

use crate::graph::{FileLoc, RuleSpec};
use anyhow::{anyhow, bail, Result};
use std::rc::Rc;

pub const MANIFEST_FILENAME: &str = "build.m2";

#[derive(Debug, Default)]
pub struct Manifest {
    pub rules: Vec<RuleSpec>,
    pub defaults: Vec<String>,
}

pub fn read(path: &str) -> Result<Manifest> {
    let text =
        std::fs::read_to_string(path).map_err(|err| anyhow!("read {}: {}", path, err))?;
    parse(path, &text)
}

fn finish(manifest: &mut Manifest, current: &mut Option<RuleSpec>) -> Result<()> {
    if let Some(rule) = current.take() {
        if rule.cmdline.is_empty() {
            bail!("{}: build block has no command", rule.location);
        }
        manifest.rules.push(rule);
    }
    Ok(())
}

pub fn parse(filename: &str, text: &str) -> Result<Manifest> {
    let filename = Rc::new(filename.to_string());
    let mut manifest = Manifest::default();
    let mut current: Option<RuleSpec> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let loc = FileLoc {
            filename: filename.clone(),
            line,
        };
        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if indented {
            let rule = match current.as_mut() {
                Some(rule) => rule,
                None => bail!("{}: binding outside a build block", loc),
            };
            let (key, value) = match trimmed.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => bail!("{}: expected key = value", loc),
            };
            match key {
                "command" => rule.cmdline = value.to_string(),
                "desc" => rule.desc = Some(value.to_string()),
                "cwd" => rule.cwd = Some(value.to_string()),
                "depfile" => rule.depfile = Some(value.to_string()),
                "deps_prefix" => rule.deps_prefix = Some(value.to_string()),
                "filter" => rule.filters.push(value.to_string()),
                "highlight" => rule.highlights.push(value.to_string()),
                "latency" => {
                    rule.latency = value
                        .parse()
                        .map_err(|err| anyhow!("{}: bad latency {:?}: {}", loc, value, err))?
                }
                _ => bail!("{}: unexpected variable {:?}", loc, key),
            }
        } else if let Some(rest) = trimmed.strip_prefix("default ") {
            finish(&mut manifest, &mut current)?;
            manifest
                .defaults
                .extend(rest.split_whitespace().map(str::to_string));
        } else if let Some(rest) = trimmed.strip_prefix("build ") {
            finish(&mut manifest, &mut current)?;
            current = Some(parse_build(rest, loc)?);
        } else {
            bail!("{}: expected 'build' or 'default'", loc);
        }
    }
    finish(&mut manifest, &mut current)?;
    Ok(manifest)
}

/// Parse "OUTS : INS [| ORDER_ONLY]" after the `build` keyword.
fn parse_build(rest: &str, location: FileLoc) -> Result<RuleSpec> {
    // The separating colon must be followed by whitespace or end the line,
    // which keeps drive-letter paths unambiguous.
    let colon = rest
        .char_indices()
        .find(|&(index, c)| {
            c == ':'
                && rest[index + 1..]
                    .chars()
                    .next()
                    .map(|next| next.is_whitespace())
                    .unwrap_or(true)
        })
        .map(|(index, _)| index);
    let colon = match colon {
        Some(colon) => colon,
        None => bail!("{}: expected ':' between outputs and inputs", location),
    };

    let mut spec = RuleSpec::default();
    spec.outs = rest[..colon].split_whitespace().map(str::to_string).collect();
    if spec.outs.is_empty() {
        bail!("{}: build block has no outputs", location);
    }
    let mut order_only = false;
    for token in rest[colon + 1..].split_whitespace() {
        if token == "|" {
            if order_only {
                bail!("{}: more than one '|'", location);
            }
            order_only = true;
        } else if order_only {
            spec.order_only.push(token.to_string());
        } else {
            spec.ins.push(token.to_string());
        }
    }
    spec.location = location;
    Ok(spec)
}
