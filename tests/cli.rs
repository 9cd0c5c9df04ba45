use std::io::Write;
use std::process::{Command, Stdio};

fn expected_with_newline(expected: &str) -> String {
    format!("{}\n", expected.trim_end_matches('\n'))
}

#[test]
fn cli_reads_file_path() {
    let output = Command::new(env!("CARGO_BIN_EXE_normalize_dump"))
        .arg("tests/fixtures/html/news-page.html")
        .output()
        .expect("run CLI");

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let expected = sitesnap::normalize(include_str!("fixtures/html/news-page.html"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, expected_with_newline(&expected));
    assert!(stdout.contains("Posted [TIME]"));
    assert!(!stdout.contains("_gl="));
    assert!(!stdout.contains("facebook.com/tr"));
    assert!(stdout.contains("window.__CF$cv$params={[REMOVED]}"));
}

#[test]
fn cli_reads_stdin_when_no_args() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_normalize_dump"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");

    let html = "<p>Edited   2 days ago</p>";
    child
        .stdin
        .as_mut()
        .expect("stdin open")
        .write_all(html.as_bytes())
        .expect("write stdin");

    let output = child.wait_with_output().expect("read CLI output");
    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        expected_with_newline(&sitesnap::normalize(html)),
    );
}

#[test]
fn cli_treats_dash_as_stdin() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_normalize_dump"))
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn CLI");
    child
        .stdin
        .take()
        .expect("stdin open")
        .write_all(b"<p>hi</p>")
        .expect("write stdin");
    let output = child.wait_with_output().expect("read CLI output");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        expected_with_newline(&sitesnap::normalize("<p>hi</p>")),
    );
}

#[test]
fn cli_rejects_extra_arguments() {
    let output = Command::new(env!("CARGO_BIN_EXE_normalize_dump"))
        .args(["a.html", "b.html"])
        .output()
        .expect("run CLI");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unexpected argument 'b.html'"));
}
