use crate::*;

/// A rule that writes its own ".d" file listing two headers, then touches
/// its output.
#[cfg(unix)]
fn gendep_manifest() -> String {
    "build out : src
  command = printf 'out: h1.h h2.h\\n' > out.d && touch out
  depfile = out.d
  desc = gendep out
"
    .to_string()
}

#[cfg(windows)]
fn gendep_manifest() -> String {
    "build out : src
  command = cmd /c echo out: h1.h h2.h > out.d && cmd /c type nul > out
  depfile = out.d
  desc = gendep out
"
    .to_string()
}

#[test]
fn depfile_roundtrip() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.m2", &gendep_manifest())?;
    space.write("src", "")?;
    space.write("h1.h", "")?;
    space.write("h2.h", "")?;

    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");

    // Touching a discovered header alone, with the declared input
    // untouched, dirties the target on the next run.
    space.bump_mtime("h1.h")?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "gendep out");
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

#[test]
fn vanished_discovered_dep_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.m2", &gendep_manifest())?;
    space.write("src", "")?;
    space.write("h1.h", "")?;
    space.write("h2.h", "")?;

    space.run_expect(&mut m2_command(vec!["out"]))?;
    std::fs::remove_file(space.dir_path().join("h2.h"))?;
    // A discovered dep that no longer exists forces a rebuild rather than
    // an error; only declared inputs are load-bearing.
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

#[cfg(unix)]
#[test]
fn bad_depfile_fails_the_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        "build out : src
  command = printf 'garbage text\\n' > out.d && touch out
  depfile = out.d
",
    )?;
    space.write("src", "")?;
    let out = space.run(&mut m2_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "parse error");
    // The output did not survive the failure.
    assert!(!space.exists("out"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn show_includes_roundtrip() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        "build out : src
  command = echo 'Note: including file: hdr.h' && echo plain && touch out
  deps_prefix = Note: including file:
  desc = cc out
",
    )?;
    space.write("src", "")?;
    space.write("hdr.h", "")?;

    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    // Marker lines are consumed; ordinary output passes through.
    assert_output_not_contains(&out, "including file");
    assert_output_contains(&out, "plain");

    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");

    space.bump_mtime("hdr.h")?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

#[cfg(unix)]
#[test]
fn discovered_deps_resolve_against_cwd() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    std::fs::create_dir_all(space.dir_path().join("sub"))?;
    space.write(
        "build.m2",
        "build sub/out : sub/src
  command = printf 'out: hdr.h\\n' > out.d && touch out
  cwd = sub
  depfile = sub/out.d
",
    )?;
    space.write("sub/src", "")?;
    space.write("sub/hdr.h", "")?;

    space.run_expect(&mut m2_command(vec!["sub/out"]))?;
    let out = space.run_expect(&mut m2_command(vec!["sub/out"]))?;
    assert_output_contains(&out, "no work to do");

    // The recorded dep is sub/hdr.h, not hdr.h.
    space.bump_mtime("sub/hdr.h")?;
    let out = space.run_expect(&mut m2_command(vec!["sub/out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}
