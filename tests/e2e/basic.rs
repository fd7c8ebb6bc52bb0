use crate::*;

#[test]
fn empty_manifest_no_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.m2", "")?;
    let out = space.run(&mut m2_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "no targets specified");
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : in\n  command = {}\n", touch("out")),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    assert!(space.read("out").is_ok());

    // A second run does nothing: everything is up to date.
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    // A build rule whose output needs its directory created first.
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build sub/dir/out : in\n  command = {}\n", touch("sub/dir/out")),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut m2_command(vec!["sub/dir/out"]))?;
    assert!(space.read("sub/dir/out").is_ok());
    Ok(())
}

#[test]
fn default_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("default out\n\nbuild out : in\n  command = {}\n", touch("out")),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut m2_command(vec![]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

#[test]
fn unknown_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : \n  command = {}\n", touch("out")),
    )?;
    let out = space.run(&mut m2_command(vec!["nope"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "unknown target");
    Ok(())
}

#[test]
fn specify_manifest_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "other.m2",
        &format!("build out : \n  command = {}\n", touch("out")),
    )?;
    space.run_expect(&mut m2_command(vec!["-f", "other.m2", "out"]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

#[test]
fn changed_command_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : in\n  command = {}\n", touch("out")),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut m2_command(vec!["out"]))?;

    // Same inputs and outputs, different command line: exactly that rule
    // reruns.
    space.write(
        "build.m2",
        &format!("build out : in\n  command = {} && {}\n", touch("out"), touch("out2.tmp")),
    )?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");

    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn changed_input_rebuilds_dependents() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!(
            "build mid : in\n  command = {}\nbuild out : mid\n  command = {}\n",
            touch("mid"),
            touch("out")
        ),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 2 tasks");

    space.bump_mtime("in")?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    Ok(())
}

#[test]
fn chain_runs_in_dependency_order() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!(
            "build a : \n  command = {} && {}\nbuild b : a\n  command = {} && {}\nbuild c : b\n  command = {} && {}\n",
            append_line("a", "log"),
            touch("a"),
            append_line("b", "log"),
            touch("b"),
            append_line("c", "log"),
            touch("c"),
        ),
    )?;
    space.run_expect(&mut m2_command(vec!["c"]))?;
    let log = space.read("log")?;
    assert_eq!(String::from_utf8_lossy(&log).trim(), "a\nb\nc");
    Ok(())
}

#[test]
fn order_only_gates_execution_but_not_dirtiness() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!(
            "build stamp : \n  command = {} && {}\nbuild out : | stamp\n  command = {} && {}\n",
            append_line("stamp", "log"),
            touch("stamp"),
            append_line("out", "log"),
            touch("out"),
        ),
    )?;
    space.run_expect(&mut m2_command(vec!["out"]))?;
    let log = space.read("log")?;
    // The order-only dep ran first.
    assert_eq!(String::from_utf8_lossy(&log).trim(), "stamp\nout");

    // Touching the order-only dep alone does not dirty the dependent.
    space.bump_mtime("stamp")?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn dependency_cycle_is_fatal() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!(
            "build a : b\n  command = {}\nbuild b : a\n  command = {}\n",
            touch("a"),
            touch("b")
        ),
    )?;
    let out = space.run(&mut m2_command(vec!["a"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "dependency cycle");
    Ok(())
}

#[test]
fn duplicate_producer_is_fatal() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!(
            "build out : \n  command = {}\nbuild out : \n  command = {}\n",
            touch("out"),
            touch("out")
        ),
    )?;
    let out = space.run(&mut m2_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "multiple rules produce");
    Ok(())
}

#[test]
fn corrupt_state_db_degrades_to_full_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : \n  command = {}\n", touch("out")),
    )?;
    space.run_expect(&mut m2_command(vec!["out"]))?;

    space.write(".m2_db", "garbage that is not a database\n")?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "state db unreadable");
    assert_output_contains(&out, "ran 1 task");

    // The rewritten store works again afterwards.
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn captured_output_is_reported() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        "build out : \n  command = echo greetz && touch out\n  desc = gen out\n",
    )?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "gen out");
    assert_output_contains(&out, "greetz");
    Ok(())
}

#[cfg(unix)]
#[test]
fn verbose_prints_command_lines() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.m2", "build out : \n  command = touch out\n  desc = quiet\n")?;
    let out = space.run_expect(&mut m2_command(vec!["-v", "out"]))?;
    assert_output_contains(&out, "touch out");
    Ok(())
}
