use crate::*;

#[cfg(unix)]
const FAIL: &str = "false";
#[cfg(windows)]
const FAIL: &str = "cmd /c exit 1";

#[test]
fn failure_isolation() -> anyhow::Result<()> {
    // Two independent chains a -> b and c -> d; a's command fails.  d must
    // still build, b is skipped, and the build as a whole fails.
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!(
            "build a : \n  command = {}\n  desc = gen a\nbuild b : a\n  command = {}\nbuild c : \n  command = {}\nbuild d : c\n  command = {}\n",
            FAIL,
            touch("b"),
            touch("c"),
            touch("d")
        ),
    )?;
    let out = space.run(&mut m2_command(vec!["b", "d"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "failed: gen a");
    assert!(space.exists("d"));
    assert!(!space.exists("b"));
    Ok(())
}

#[test]
fn failed_rule_outputs_are_deleted() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : \n  command = {} && {}\n", touch("out"), FAIL),
    )?;
    let out = space.run(&mut m2_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn failure_does_not_poison_later_runs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        &format!("build out : \n  command = {}\n", FAIL),
    )?;
    let out = space.run(&mut m2_command(vec!["out"]))?;
    assert!(!out.status.success());

    // Fix the rule; the target is still dirty and rebuilds.
    space.write(
        "build.m2",
        &format!("build out : \n  command = {}\n", touch("out")),
    )?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

#[cfg(unix)]
#[test]
fn suppression_filter_drops_lines() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        "build out :
  command = printf 'chatter skip me\\nkeep me\\n' && touch out
  desc = gen out
  filter = ^chatter
",
    )?;
    let out = space.run_expect(&mut m2_command(vec!["out"]))?;
    assert_output_contains(&out, "keep me");
    assert_output_not_contains(&out, "chatter");
    Ok(())
}

#[cfg(unix)]
#[test]
fn filtered_failure_output_survives() -> anyhow::Result<()> {
    // Filters apply to failing commands too, but the failure itself is
    // still reported.
    let space = TestSpace::new()?;
    space.write(
        "build.m2",
        "build out :
  command = printf 'chatter\\nerror: real problem\\n' && false
  desc = gen out
  filter = ^chatter
  highlight = ^error:
",
    )?;
    let out = space.run(&mut m2_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "failed: gen out");
    assert_output_contains(&out, "error: real problem");
    assert_output_not_contains(&out, "chatter");
    Ok(())
}
