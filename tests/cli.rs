//! Exit codes of the `email` binary.

use std::io::Write;
use std::net::TcpListener;
use std::process::{Command, Output, Stdio};

use email_cli::errors::exit_codes;

fn email(home: &tempfile::TempDir, args: &[&str], stdin: Option<&str>) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_email"));
    command
        .args(args)
        .env_clear()
        .env("HOME", home.path())
        .current_dir(home.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match stdin {
        Some(body) => {
            command.stdin(Stdio::piped());
            let mut child = command.spawn().unwrap();
            child
                .stdin
                .take()
                .unwrap()
                .write_all(body.as_bytes())
                .unwrap();
            child.wait_with_output().unwrap()
        }
        None => command.stdin(Stdio::null()).output().unwrap(),
    }
}

fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port().to_string()
}

#[test]
fn version_flag() {
    let home = tempfile::tempdir().unwrap();
    let output = email(&home, &["--version"], None);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.trim(), format!("email {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn strict_abort_exit_code() {
    let home = tempfile::tempdir().unwrap();
    let port = closed_port();
    let output = email(
        &home,
        &["-e", "-t", "not-an-email", "-x", "127.0.0.1", "-o", &port],
        None,
    );

    assert_eq!(output.status.code(), Some(i32::from(exit_codes::STRICT_ABORT)));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Will not send email"));
}

#[test]
fn transport_failure_exit_code() {
    let home = tempfile::tempdir().unwrap();
    let port = closed_port();
    let output = email(
        &home,
        &["-t", "to@example.com", "-x", "127.0.0.1", "-o", &port, "--smtp-tls", "none"],
        Some("piped body\nsecond line\n"),
    );

    assert_eq!(output.status.code(), Some(i32::from(exit_codes::TRANSPORT)));
    assert!(output.stdout.is_empty());
}

#[test]
fn usage_errors_exit_code() {
    let home = tempfile::tempdir().unwrap();

    let output = email(&home, &["-o", "not-a-port"], None);
    assert_eq!(output.status.code(), Some(i32::from(exit_codes::USAGE)));

    let output = email(&home, &["-o", "0"], None);
    assert_eq!(output.status.code(), Some(i32::from(exit_codes::USAGE)));

    let missing = home.path().join("missing.yml");
    let output = email(&home, &["--config", missing.to_str().unwrap()], None);
    assert_eq!(output.status.code(), Some(i32::from(exit_codes::USAGE)));
}

#[test]
fn config_file_supplies_settings() {
    let home = tempfile::tempdir().unwrap();
    let port = closed_port();
    let path = home.path().join("config.yml");
    std::fs::write(
        &path,
        format!(
            "strict-parsing: true\nemail:\n  to: not-an-email\nsmtp:\n  server: 127.0.0.1\n  port: {}\n",
            port
        ),
    )
    .unwrap();

    // Found on the search path through the working directory.
    let output = email(&home, &[], None);
    assert_eq!(output.status.code(), Some(i32::from(exit_codes::STRICT_ABORT)));

    // A flag beats the file.
    let output = email(&home, &["--strict-parsing=false", "--smtp-tls", "none"], None);
    assert_eq!(output.status.code(), Some(i32::from(exit_codes::TRANSPORT)));
}
