use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_describes_the_tool() {
    Command::cargo_bin("instancer")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("challenge containers"));
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("instancer")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("serve")
                .and(predicate::str::contains("challenges"))
                .and(predicate::str::contains("init")),
        );
}

#[test]
fn version_flag_works() {
    Command::cargo_bin("instancer")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
