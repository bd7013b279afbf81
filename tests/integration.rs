//! Integration tests for the carddav-util binary

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Isolated home and config directories, so no user configuration leaks in.
struct TestEnv {
    temp_dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("carddav-util").unwrap();
        cmd.env("HOME", self.temp_dir.path())
            .env("XDG_CONFIG_HOME", self.temp_dir.path().join("config"))
            .env_remove("CARDDAV_UTIL_PASSWORD")
            .env_remove("http_proxy")
            .env_remove("HTTP_PROXY")
            .env_remove("all_proxy")
            .env_remove("ALL_PROXY")
            .env("NO_PROXY", "127.0.0.1,localhost")
            .env("no_proxy", "127.0.0.1,localhost");
        cmd
    }
}

fn arg(flag: &str, value: &Path) -> String {
    format!("{flag}={}", value.display())
}

/// Accept one connection per canned response and return the raw requests.
fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/abook/", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut requests = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().unwrap();
            requests.push(read_request(&mut stream));
            stream.write_all(response.as_bytes()).unwrap();
        }
        requests
    });
    (url, handle)
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= end + 4 + length {
            break;
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

fn reply(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/abook/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/abook/jane.vcf</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontenttype>text/vcard</d:getcontenttype>
        <d:getetag>"etag-1"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

const JANE: &str = "BEGIN:VCARD\r\nVERSION:3.0\r\nUID:jane\r\nN:Doe;Jane;;;\r\nFN:Jane\r\nEND:VCARD\r\n";

// =============================================================================
// Usage
// =============================================================================

#[test]
fn test_help_exits_zero() {
    let env = TestEnv::new();
    env.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--download"))
        .stdout(predicate::str::contains("--no-cert-verify"));
}

#[test]
fn test_no_arguments_prints_help() {
    let env = TestEnv::new();
    env.cmd()
        .assert()
        .success()
        .stdout(predicate::str::contains("--fixfn"));
}

#[test]
fn test_plain_argument_prints_help() {
    let env = TestEnv::new();
    env.cmd()
        .arg("stray")
        .assert()
        .success()
        .stdout(predicate::str::contains("--fixfn"))
        .stdout(predicate::str::contains("[!]").not());
}

#[test]
fn test_malformed_flag_exits_one() {
    let env = TestEnv::new();
    env.cmd()
        .args(["--download", "--bogus"])
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with("[!] "));
}

#[test]
fn test_conflicting_actions_exit_two() {
    let env = TestEnv::new();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let url = format!("http://{}/abook/", listener.local_addr().unwrap());

    env.cmd()
        .args(["--download", "--upload", "--file=x.vcf", &format!("--url={url}")])
        .assert()
        .code(2)
        .stdout(predicate::str::contains(
            "[!] You can only choose one action at a time",
        ));

    // The process has exited, so any connection it made is already queued.
    let err = listener.accept().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
}

#[test]
fn test_missing_action_exits_two() {
    let env = TestEnv::new();
    env.cmd()
        .args(["--url=http://127.0.0.1:1/", "--file=x.vcf"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_url_or_file_exits_three() {
    let env = TestEnv::new();
    env.cmd()
        .arg("--download")
        .assert()
        .code(3)
        .stdout(predicate::str::contains(
            "[!] You must specify both the filename and the url",
        ));

    env.cmd()
        .args(["--upload", "--url=http://127.0.0.1:1/"])
        .assert()
        .code(3);
}

// =============================================================================
// Configuration file
// =============================================================================

#[test]
fn test_missing_file_is_reported_before_reading_configuration() {
    let env = TestEnv::new();
    let dir = env.path("config").join("carddav-util");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), "url = \n").unwrap();

    env.cmd()
        .arg("--download")
        .assert()
        .code(3)
        .stdout(predicate::str::contains(
            "[!] You must specify both the filename and the url",
        ));
}

#[test]
fn test_configuration_error_is_one_line() {
    let env = TestEnv::new();
    let config = env.write("broken.toml", "url = \n");

    let assert = env
        .cmd()
        .args(["--download", "--file=x.vcf", &arg("--config", &config)])
        .assert()
        .code(4)
        .stdout(predicate::str::starts_with("[!] invalid configuration in"));

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert_eq!(stdout.lines().count(), 1);
}

#[test]
fn test_config_file_supplies_url() {
    let env = TestEnv::new();
    let config = env.write("defaults.toml", "url = \"http://127.0.0.1:1/abook/\"\n");
    let out = env.path("out.vcf");

    // The url comes from the file, so the run gets as far as the network.
    env.cmd()
        .args(["--download", &arg("--file", &out), &arg("--config", &config)])
        .assert()
        .code(4)
        .stdout(predicate::str::contains(
            "[i] Downloading from http://127.0.0.1:1/abook/",
        ));
}

#[test]
fn test_missing_config_file_fails() {
    let env = TestEnv::new();
    env.cmd()
        .args([
            "--download",
            "--url=http://127.0.0.1:1/",
            "--file=x.vcf",
            &arg("--config", &env.path("absent.toml")),
        ])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("configuration file not found"));
}

// =============================================================================
// Actions
// =============================================================================

#[test]
fn test_upload_of_invalid_file_fails_before_connecting() {
    let env = TestEnv::new();
    let file = env.write("bad.vcf", "BEGIN:VCARD\r\nFN:No version\r\nEND:VCARD\r\n");

    env.cmd()
        .args(["--upload", "--url=http://127.0.0.1:1/", &arg("--file", &file)])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("[!] invalid vCard data"))
        .stdout(predicate::str::contains("Connecting").not());
}

#[test]
fn test_download_from_unreachable_server_fails() {
    let env = TestEnv::new();
    let out = env.path("out.vcf");

    env.cmd()
        .args(["--download", "--url=http://127.0.0.1:1/", &arg("--file", &out)])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("[!] failed to list the address book"));
}

#[test]
fn test_download_writes_cards() {
    let env = TestEnv::new();
    let out = env.path("out.vcf");
    let (url, handle) = serve(vec![reply("207 Multi-Status", LISTING), reply("200 OK", JANE)]);

    env.cmd()
        .args(["--download", &format!("--url={url}"), &arg("--file", &out)])
        .args(["--user=jane", "--passwd=secret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[i] Found 1 cards."))
        .stdout(predicate::str::contains("[i] All saved to:"));

    assert_eq!(fs::read_to_string(&out).unwrap(), format!("{JANE}\n"));

    let requests = handle.join().unwrap();
    assert!(requests[0].starts_with("PROPFIND /abook/ "));
    assert!(requests[1].starts_with("GET /abook/jane.vcf "));
    // "jane:secret"
    assert!(requests[1].contains("amFuZTpzZWNyZXQ="));
}

#[test]
fn test_upload_creates_new_cards() {
    let env = TestEnv::new();
    let file = env.write(
        "cards.vcf",
        "BEGIN:VCARD\r\nVERSION:3.0\r\nPRODID:-//Other//EN\r\nUID:old\r\nFN:Jane\r\nEND:VCARD\r\n",
    );
    let (url, handle) = serve(vec![reply("201 Created", "")]);
    let url = url.trim_end_matches('/').to_string();

    env.cmd()
        .args(["--upload", &format!("--url={url}"), &arg("--file", &file)])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[i] Successfully read and validated 1 entries",
        ))
        .stdout(predicate::str::contains("[i] All done"));

    let requests = handle.join().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.starts_with("PUT /abook/"));
    assert!(!request.starts_with("PUT /abook/old.vcf"));
    assert!(request.to_ascii_lowercase().contains("if-none-match: *"));
    assert!(!request.contains("PRODID"));
    assert!(!request.contains("UID:old"));
}

#[test]
fn test_fixfn_updates_in_place() {
    let env = TestEnv::new();
    let (url, handle) = serve(vec![
        reply("207 Multi-Status", LISTING),
        reply("200 OK", JANE),
        reply("204 No Content", ""),
    ]);

    env.cmd()
        .args(["--fixfn", &format!("--url={url}"), "--file=unused.vcf"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[i] All updated"));

    let requests = handle.join().unwrap();
    let update = &requests[2];
    assert!(update.starts_with("PUT /abook/jane.vcf "));
    assert!(update.to_ascii_lowercase().contains("if-match: \"etag-1\""));
    assert!(update.contains("FN:Jane Doe\r\n"));
    assert!(update.contains("UID:jane\r\n"));
}

#[test]
fn test_fixfn_conflict_fails() {
    let env = TestEnv::new();
    let (url, _handle) = serve(vec![
        reply("207 Multi-Status", LISTING),
        reply("200 OK", JANE),
        reply("412 Precondition Failed", ""),
    ]);

    env.cmd()
        .args(["--fixfn", &format!("--url={url}"), "--file=unused.vcf"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("[!] failed to update /abook/jane.vcf"));
}
