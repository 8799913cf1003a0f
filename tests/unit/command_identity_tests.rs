//! Unit tests for command identity derivation and validation.

use procgroups::models::command::{derive_command_id, validate_command_id, Command};
use procgroups::AppError;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn identity_matches_known_digest() {
    let id = derive_command_id(&strings(&["echo", "foo"]), &[]).expect("derive");
    assert_eq!(
        id,
        "02661da9943aef51d6b6c255b88f87c5fcde72a740a1f5dbe7a6eabc577966e4"
    );
}

#[test]
fn identity_covers_environment() {
    let id = derive_command_id(&strings(&["env"]), &strings(&["A=1"])).expect("derive");
    assert_eq!(
        id,
        "c64ea7e31c2f5e728007d06b0bad43ebfb93f88bc08f7de7d247bf57e0591c8c"
    );
}

#[test]
fn equal_definitions_share_an_identity() {
    let a = Command::new(strings(&["sleep", "1"]), strings(&["X=1"])).expect("command");
    let b = Command::new(strings(&["sleep", "1"]), strings(&["X=1"])).expect("command");
    assert_eq!(a.id(), b.id());
    assert_eq!(a, b);
}

#[test]
fn argument_order_changes_the_identity() {
    let a = derive_command_id(&strings(&["ls", "-a", "-l"]), &[]).expect("derive");
    let b = derive_command_id(&strings(&["ls", "-l", "-a"]), &[]).expect("derive");
    assert_ne!(a, b);
}

#[test]
fn environment_order_changes_the_identity() {
    let a = derive_command_id(&strings(&["env"]), &strings(&["A=1", "B=2"])).expect("derive");
    let b = derive_command_id(&strings(&["env"]), &strings(&["B=2", "A=1"])).expect("derive");
    assert_ne!(a, b);
}

#[test]
fn element_boundaries_change_the_identity() {
    let split = derive_command_id(&strings(&["echo", "a", "b"]), &[]).expect("derive");
    let joined = derive_command_id(&strings(&["echo", "a b"]), &[]).expect("derive");
    assert_ne!(split, joined);

    let empty_tail = derive_command_id(&strings(&["echo", ""]), &[]).expect("derive");
    let bare = derive_command_id(&strings(&["echo"]), &[]).expect("derive");
    assert_ne!(empty_tail, bare);
}

#[test]
fn moving_an_entry_between_lists_changes_the_identity() {
    let as_arg = derive_command_id(&strings(&["env", "A=1"]), &[]).expect("derive");
    let as_env = derive_command_id(&strings(&["env"]), &strings(&["A=1"])).expect("derive");
    assert_ne!(as_arg, as_env);
}

#[test]
fn empty_arguments_are_rejected() {
    let err = derive_command_id(&[], &[]).expect_err("empty args");
    assert!(matches!(err, AppError::InvalidArgument(_)));

    let err = Command::from_argv(Vec::<String>::new()).expect_err("empty argv");
    assert!(matches!(err, AppError::InvalidArgument(_)));
}

#[test]
fn assigned_identity_is_kept_verbatim() {
    let cmd = Command::with_id("web", strings(&["python3", "-m", "http.server"]), vec![])
        .expect("command");
    assert_eq!(cmd.id(), "web");
    assert_eq!(cmd.program(), "python3");
    assert_eq!(cmd.args().len(), 3);
    assert!(cmd.env().is_empty());
}

#[test]
fn assigned_identity_must_be_a_file_name() {
    for bad in ["", "a/b", "..", ".", "a\\b", ".hidden"] {
        let err = Command::with_id(bad, strings(&["true"]), vec![]).expect_err(bad);
        assert!(
            matches!(err, AppError::InvalidArgument(_)),
            "{bad:?} should be rejected, got {err}"
        );
    }
}

#[test]
fn assigned_identities_follow_the_capture_file_rule() {
    for id in ["web", "web.1", "a-b_c", ".dot", "x/y", ""] {
        let assigned = Command::with_id(id, strings(&["true"]), vec![]).is_ok();
        assert_eq!(assigned, validate_command_id(id).is_ok(), "{id:?}");
    }
    assert!(validate_command_id("web.1").is_ok());
    assert!(validate_command_id(".dot").is_err());
}

#[test]
fn command_serializes_with_its_identity() {
    let cmd = Command::from_argv(["echo", "hi"]).expect("command");
    let json = serde_json::to_value(&cmd).expect("serialize");
    assert_eq!(json["id"], cmd.id());
    assert_eq!(json["args"][1], "hi");
}
