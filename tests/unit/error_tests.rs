//! Unit tests for `AppError` display formats.

use procgroups::AppError;

#[test]
fn every_variant_has_a_distinct_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Db("x".into()), "db: x"),
        (AppError::Launch("x".into()), "launch: x"),
        (AppError::Signal("x".into()), "signal: x"),
        (AppError::WaitTimeout("x".into()), "wait timeout: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::Conflict("x".into()), "conflict: x"),
        (AppError::InvalidArgument("x".into()), "invalid argument: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn process_exit_names_the_command() {
    let err = AppError::ProcessExit {
        command_id: "abc".into(),
        detail: "false: exit status: 1".into(),
    };
    assert_eq!(
        err.to_string(),
        "process exit: command abc: false: exit status: 1"
    );
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("denied")));
}

#[test]
fn toml_errors_convert_to_config() {
    let parse = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err: AppError = parse.into();
    assert!(err.to_string().starts_with("config: invalid config:"));
}

#[test]
fn sqlx_errors_convert_to_db() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(err.to_string().starts_with("db:"));
}
