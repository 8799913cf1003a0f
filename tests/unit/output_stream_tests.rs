//! Unit tests for the output stream selector.

use procgroups::capture::OutputStream;
use procgroups::AppError;

#[test]
fn descriptors_map_to_streams() {
    assert_eq!(OutputStream::try_from(1).expect("stdout"), OutputStream::Stdout);
    assert_eq!(OutputStream::try_from(2).expect("stderr"), OutputStream::Stderr);
}

#[test]
fn other_descriptors_are_rejected() {
    for fd in [0, 3, -1] {
        let err = OutputStream::try_from(fd).expect_err("invalid fd");
        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert!(err.to_string().contains(&format!("fd ({fd})")));
    }
}

#[test]
fn names_and_numbers_parse() {
    assert_eq!("stdout".parse::<OutputStream>().expect("stdout"), OutputStream::Stdout);
    assert_eq!("1".parse::<OutputStream>().expect("1"), OutputStream::Stdout);
    assert_eq!("stderr".parse::<OutputStream>().expect("stderr"), OutputStream::Stderr);
    assert_eq!("2".parse::<OutputStream>().expect("2"), OutputStream::Stderr);
    assert!("stdin".parse::<OutputStream>().is_err());
}

#[test]
fn display_matches_file_extension() {
    assert_eq!(OutputStream::Stdout.to_string(), "stdout");
    assert_eq!(OutputStream::Stderr.extension(), "stderr");
}
