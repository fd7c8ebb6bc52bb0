use crate::*;

#[test]
fn missing_source_is_an_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : nosuch.c\n  command = {}\n", touch("out")),
    )?;
    let out = space.run(&mut m2_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "'nosuch.c' needed by 'out' does not exist");
    Ok(())
}

#[test]
fn requested_target_without_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : in\n  command = {}\n", touch("out")),
    )?;
    // "in" is a known path but only as a missing source file.
    let out = space.run(&mut m2_command(vec!["in"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "no rule to build 'in'");
    Ok(())
}

#[test]
fn missing_declared_output_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : \n  command = {}\n  desc = fake out\n", touch("elsewhere")),
    )?;
    let out = space.run(&mut m2_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "failed: fake out");
    assert_output_contains(&out, "missing after command succeeded");
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn multi_output_atomicity() -> anyhow::Result<()> {
    // The command exits 0 but only produces one of its two declared
    // outputs: both are treated as failed, the produced one is removed,
    // and the state store is not updated.
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build a b : \n  command = {}\n", touch("a")),
    )?;
    let out = space.run(&mut m2_command(vec!["a"]))?;
    assert!(!out.status.success());
    assert!(!space.exists("a"));
    assert!(!space.exists("b"));

    // Nothing was recorded, so the next run attempts (and fails) again.
    let out = space.run(&mut m2_command(vec!["a"]))?;
    assert!(!out.status.success());
    Ok(())
}

#[test]
fn multi_output_builds_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!(
            "build a b : \n  command = {} && {}\nbuild c : a b\n  command = {}\n",
            touch("a"),
            touch("b"),
            touch("c")
        ),
    )?;
    let out = space.run_expect(&mut m2_command(vec!["c"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    let out = space.run_expect(&mut m2_command(vec!["c"]))?;
    assert_output_contains(&out, "no work to do");

    // Deleting one of the pair dirties the rule, and the dirtiness
    // propagates to its dependent.
    std::fs::remove_file(space.dir_path().join("b"))?;
    let out = space.run_expect(&mut m2_command(vec!["c"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    Ok(())
}
