//! Integration tests for the group registry lifecycle.
//!
//! Validates:
//! - create → wait → logs shows captured output
//! - remove of one command keeps the others in order
//! - remove of every command leaves a live, empty group
//! - close of an unknown group succeeds
//! - failures, conflicts and launch errors leave consistent state
//! - a command identity belongs to exactly one group

use std::time::Duration;

use procgroups::capture::OutputStream;
use procgroups::models::command::Command;
use procgroups::models::event::GroupAction;
use procgroups::supervisor::Signal;
use procgroups::{AppError, GlobalConfig, Groups};
use tempfile::TempDir;

/// Open a registry under a fresh temporary root.
async fn registry() -> (TempDir, Groups) {
    let temp = tempfile::tempdir().expect("tempdir");
    let groups = Groups::connect(GlobalConfig::for_root(temp.path()))
        .await
        .expect("registry");
    (temp, groups)
}

fn sleeper(secs: &str) -> Command {
    Command::from_argv(["sleep", secs]).expect("command")
}

async fn actions(groups: &Groups, name: &str) -> Vec<GroupAction> {
    groups
        .events(name)
        .await
        .expect("events")
        .into_iter()
        .map(|e| e.action)
        .collect()
}

#[tokio::test]
async fn echo_output_is_readable_after_wait() {
    let (_temp, groups) = registry().await;
    let echo = Command::from_argv(["echo", "foo"]).expect("command");

    groups.create("g", vec![echo.clone()]).await.expect("create");
    groups.wait("g").await.expect("wait");

    let mut lines = groups
        .logs(echo.id(), OutputStream::Stdout)
        .await
        .expect("logs");
    assert_eq!(lines.next_line().await.expect("read").as_deref(), Some("foo"));

    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn remove_one_of_three_keeps_order() {
    let (_temp, groups) = registry().await;
    let cmds = vec![sleeper("30"), sleeper("31"), sleeper("32")];
    groups.create("g", cmds.clone()).await.expect("create");

    groups
        .remove("g", &[cmds[1].id().to_owned()])
        .await
        .expect("remove");

    assert_eq!(
        groups.commands("g").await,
        Some(vec![cmds[0].clone(), cmds[2].clone()])
    );
    let processes = groups.processes("g").await.expect("live");
    assert_eq!(processes.len(), 2);
    assert!(processes.iter().all(|p| p.outcome.is_none()));

    groups.close("g").await.expect("close");
    assert_eq!(groups.commands("g").await, None);
}

#[tokio::test]
async fn remove_all_leaves_a_live_empty_group() {
    let (_temp, groups) = registry().await;
    groups
        .create("g", vec![sleeper("30"), sleeper("31")])
        .await
        .expect("create");

    groups.remove("g", &[]).await.expect("remove all");

    assert_eq!(groups.commands("g").await, Some(Vec::new()));
    assert_eq!(groups.live_groups().await, vec!["g"]);
    assert_eq!(
        actions(&groups, "g").await,
        vec![
            GroupAction::GroupCreated,
            GroupAction::CommandStarted,
            GroupAction::CommandStarted,
            GroupAction::CommandStopped,
            GroupAction::CommandStopped,
            GroupAction::GroupRemoved,
        ]
    );

    // Nothing persisted, so reopening after close starts nothing.
    groups.close("g").await.expect("close");
    assert!(groups.open("g").await.expect("open").is_empty());
    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn remove_from_unknown_group_is_not_found() {
    let (_temp, groups) = registry().await;
    let err = groups.remove("nope", &[]).await.expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn close_unknown_group_succeeds() {
    let (_temp, groups) = registry().await;
    groups.close("never-created").await.expect("close");
    assert!(groups.events("never-created").await.expect("events").is_empty());
}

#[tokio::test]
async fn close_records_stops_and_allows_reopen() {
    let (_temp, groups) = registry().await;
    let cmds = vec![sleeper("30"), sleeper("31")];
    groups.create("g", cmds.clone()).await.expect("create");

    groups.close("g").await.expect("close");
    assert!(groups.live_groups().await.is_empty());
    assert_eq!(
        actions(&groups, "g").await,
        vec![
            GroupAction::GroupCreated,
            GroupAction::CommandStarted,
            GroupAction::CommandStarted,
            GroupAction::CommandStopped,
            GroupAction::CommandStopped,
        ]
    );

    let reopened = groups.open("g").await.expect("open");
    assert_eq!(reopened, cmds);
    assert_eq!(groups.commands("g").await, Some(cmds));

    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn wait_reports_the_failing_command() {
    let (_temp, groups) = registry().await;
    let failing = Command::from_argv(["sh", "-c", "exit 3"]).expect("command");
    groups
        .create(
            "g",
            vec![
                Command::from_argv(["true"]).expect("command"),
                failing.clone(),
                Command::from_argv(["echo", "ok"]).expect("command"),
            ],
        )
        .await
        .expect("create");

    match groups.wait("g").await {
        Err(AppError::ProcessExit { command_id, .. }) => assert_eq!(command_id, failing.id()),
        other => panic!("expected ProcessExit, got {other:?}"),
    }

    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn wait_times_out_on_long_running_processes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = GlobalConfig::for_root(temp.path());
    config.wait_timeout_seconds = 1;
    let groups = Groups::connect(config).await.expect("registry");
    groups.create("g", vec![sleeper("30")]).await.expect("create");

    let err = groups.wait("g").await.expect_err("timeout");
    assert!(matches!(err, AppError::WaitTimeout(_)));

    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn signal_reaches_every_process() {
    let (_temp, groups) = registry().await;
    groups
        .create("g", vec![sleeper("30"), sleeper("31")])
        .await
        .expect("create");

    groups.signal("g", Signal::SIGKILL).await.expect("signal");
    let err = groups.wait("g").await.expect_err("killed externally");
    assert!(matches!(err, AppError::ProcessExit { .. }));

    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn create_of_a_live_group_conflicts() {
    let (_temp, groups) = registry().await;
    groups.create("g", vec![sleeper("30")]).await.expect("create");

    let err = groups
        .create("g", vec![sleeper("31")])
        .await
        .expect_err("live");
    assert!(matches!(err, AppError::Conflict(_)));
    let err = groups.open("g").await.expect_err("live");
    assert!(matches!(err, AppError::Conflict(_)));

    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn create_of_a_persisted_group_conflicts() {
    let (_temp, groups) = registry().await;
    groups.create("g", vec![sleeper("30")]).await.expect("create");
    groups.close("g").await.expect("close");

    let err = groups
        .create("g", vec![sleeper("31")])
        .await
        .expect_err("persisted");
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(groups.live_groups().await.is_empty());
}

#[tokio::test]
async fn command_owned_by_a_live_group_conflicts() {
    let (_temp, groups) = registry().await;
    groups.create("a", vec![sleeper("30")]).await.expect("create");

    let err = groups
        .create("b", vec![sleeper("30")])
        .await
        .expect_err("shared command");

    match err {
        AppError::Conflict(msg) => assert!(msg.contains("group a"), "{msg}"),
        other => panic!("expected Conflict, got {other:?}"),
    }
    assert_eq!(groups.live_groups().await, vec!["a"]);
    assert!(groups.events("b").await.expect("events").is_empty());

    groups.close("a").await.expect("close");
}

#[tokio::test]
async fn command_owned_by_a_closed_group_conflicts() {
    let (_temp, groups) = registry().await;
    groups.create("a", vec![sleeper("30")]).await.expect("create");
    groups.close("a").await.expect("close");

    let err = groups
        .create("b", vec![sleeper("30"), sleeper("31")])
        .await
        .expect_err("shared command");

    assert!(matches!(err, AppError::Conflict(_)), "got {err}");
    assert_eq!(groups.commands("b").await, None);
}

#[tokio::test]
async fn duplicate_command_within_one_create_conflicts() {
    let (_temp, groups) = registry().await;

    let done = Command::from_argv(["true"]).expect("command");

    let err = groups
        .create("g", vec![done.clone(), done])
        .await
        .expect_err("duplicate");

    assert!(matches!(err, AppError::Conflict(_)), "got {err}");
    assert_eq!(groups.commands("g").await, None);
}

#[tokio::test]
async fn close_does_not_wait_for_inherited_pipes() {
    let (_temp, groups) = registry().await;
    // The shell's child keeps both pipes open after the shell is killed.
    let shell = Command::from_argv(["sh", "-c", "sleep 5; true"]).expect("command");
    groups.create("g", vec![shell]).await.expect("create");
    tokio::time::sleep(Duration::from_millis(200)).await;

    groups.close("g").await.expect("close right after the kill");
    assert_eq!(groups.commands("g").await, None);
}

#[tokio::test]
async fn assigned_identities_are_readable_through_logs() {
    let (_temp, groups) = registry().await;
    let cmd = Command::with_id("web.1", vec!["echo".into(), "up".into()], vec![])
        .expect("command");
    groups.create("g", vec![cmd]).await.expect("create");
    groups.wait("g").await.expect("wait");

    let mut lines = groups
        .logs("web.1", OutputStream::Stdout)
        .await
        .expect("logs");
    assert_eq!(lines.next_line().await.expect("read").as_deref(), Some("up"));

    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn launch_failure_rolls_back_the_create() {
    let (_temp, groups) = registry().await;
    let missing = Command::from_argv(["/nonexistent/procgroups-test-binary"]).expect("command");

    let err = groups.create("g", vec![missing]).await.expect_err("launch");

    assert!(matches!(err, AppError::Launch(_)), "got {err}");
    assert_eq!(groups.commands("g").await, None);
    assert!(groups.events("g").await.expect("events").is_empty());

    // The name is free again and nothing was persisted.
    groups
        .create("g", vec![Command::from_argv(["true"]).expect("command")])
        .await
        .expect("create after failure");
    groups.close("g").await.expect("close");
}

#[tokio::test]
async fn logs_reject_path_like_identities() {
    let (_temp, groups) = registry().await;
    for bad in ["", "../groups.db", "a/b", ".hidden"] {
        let err = groups
            .logs(bad, OutputStream::Stdout)
            .await
            .expect_err(bad);
        assert!(matches!(err, AppError::InvalidArgument(_)), "{bad:?}: {err}");
    }
    let err = groups
        .logs("unknown", OutputStream::Stderr)
        .await
        .expect_err("missing");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn empty_group_name_is_rejected() {
    let (_temp, groups) = registry().await;
    let err = groups.create("", Vec::new()).await.expect_err("empty name");
    assert!(matches!(err, AppError::InvalidArgument(_)));
}

#[tokio::test]
async fn groups_are_supervised_independently() {
    let (_temp, groups) = registry().await;
    groups.create("fast", vec![Command::from_argv(["true"]).expect("command")])
        .await
        .expect("create");
    groups.create("slow", vec![sleeper("30")]).await.expect("create");

    groups.wait("fast").await.expect("fast finishes");
    assert_eq!(groups.live_groups().await, vec!["fast", "slow"]);

    groups.close("slow").await.expect("close");
    groups.close("fast").await.expect("close");
    assert_eq!(groups.known_groups().await.expect("known"), vec!["fast", "slow"]);
}
