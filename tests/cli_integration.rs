//! Command handler tests against in-memory collaborators

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use clipslot::cli::{Cli, CliHandler};
use clipslot::clipboard::{ClipboardProvider, MemoryClipboard};
use clipslot::config::Config;
use clipslot::slots::{Backend, EncryptionMode, LocalBackend, SlotStore};
use clipslot::transport::{PeerTransport, RemoteShell, ShellOutput};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_test::assert_ok;

/// Cloneable sink standing in for stdout
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Peer whose clipboard lives in memory
struct LoopbackShell {
    remote: Arc<MemoryClipboard>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl RemoteShell for LoopbackShell {
    async fn exec(
        &self,
        _target: &str,
        command: &str,
        stdin: Option<&[u8]>,
        _timeout: Duration,
    ) -> Result<ShellOutput, String> {
        self.calls.lock().unwrap().push(command.to_string());
        let stdout = match command.rsplit(' ').next() {
            Some("copy") => {
                self.remote
                    .write(stdin.unwrap_or_default())
                    .await
                    .map_err(|e| e.to_string())?;
                Vec::new()
            }
            Some("paste") => self.remote.read().await.map_err(|e| e.to_string())?,
            _ => return Err(format!("unexpected command {}", command)),
        };
        Ok(ShellOutput {
            stdout,
            stderr: Vec::new(),
            status: Some(0),
        })
    }
}

struct Harness {
    dir: TempDir,
    config: Config,
    clipboard: Arc<MemoryClipboard>,
    remote: Arc<MemoryClipboard>,
    shell: Arc<LoopbackShell>,
    output: SharedBuffer,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config::from_toml(&format!(
            r#"
            [sync]
            encryption = "none"
            slot_dir = "{slots}"

            [history]
            limit = 50
            path = "{history}"

            [peers.desk]
            ssh = "me@desk"

            [fx.upper]
            cmd = ["tr", "a-z", "A-Z"]

            [fx.fail]
            shell = "exit 1"

            [clipboard]
            max_size = 2048
        "#,
            slots = dir.path().join("slots").display(),
            history = dir.path().join("history.json").display(),
        ))
        .unwrap();

        let remote = Arc::new(MemoryClipboard::with_content("remote text"));
        let shell = Arc::new(LoopbackShell {
            remote: Arc::clone(&remote),
            calls: Mutex::new(Vec::new()),
        });

        Self {
            dir,
            config,
            clipboard: Arc::new(MemoryClipboard::with_content("clipboard text")),
            remote,
            shell,
            output: SharedBuffer::default(),
        }
    }

    fn slots(&self) -> SlotStore {
        SlotStore::new(
            Backend::Local(LocalBackend::new(self.dir.path().join("slots"))),
            EncryptionMode::None,
        )
    }

    fn handler(&self) -> CliHandler {
        CliHandler::with_parts(
            self.config.clone(),
            self.clipboard.clone(),
            self.slots(),
            PeerTransport::new(self.shell.clone()),
        )
        .with_output(Box::new(self.output.clone()))
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<()> {
        self.run_with_input(args, Vec::new()).await
    }

    async fn run_with_input(&self, args: &[&str], input: Vec<u8>) -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(std::iter::once("clipslot").chain(args.iter().copied()))?;
        self.handler()
            .with_input(input)
            .handle_command(cli.command)
            .await
    }

    fn history_commands(&self) -> Vec<String> {
        let path = self.dir.path().join("history.json");
        if !path.exists() {
            return Vec::new();
        }
        let entries: Vec<serde_json::Value> =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        entries
            .iter()
            .map(|e| {
                format!(
                    "{} {}",
                    e["command"].as_str().unwrap(),
                    e["target"].as_str().unwrap()
                )
            })
            .collect()
    }
}

#[tokio::test]
async fn copy_and_paste() {
    let h = Harness::new();

    h.run_with_input(&["copy"], b"from stdin".to_vec()).await.unwrap();
    assert_eq!(h.clipboard.read().await.unwrap(), b"from stdin");

    assert_ok!(h.run(&["paste", "--fx", "upper"]).await);
    assert_eq!(h.output.contents(), "FROM STDIN");
    assert_eq!(h.history_commands(), vec!["copy clipboard"]);
}

#[tokio::test]
async fn push_then_pull_through_slot() {
    let h = Harness::new();

    h.run(&["push", "notes", "--meta", "source=test"]).await.unwrap();
    h.clipboard.set_external("overwritten").await;

    h.run(&["pull", "notes"]).await.unwrap();
    assert_eq!(h.clipboard.read().await.unwrap(), b"clipboard text");

    h.run(&["pull", "notes", "--stdout", "--fx", "upper"]).await.unwrap();
    assert_eq!(h.output.contents(), "CLIPBOARD TEXT");

    assert_eq!(h.history_commands(), vec!["push notes", "pull notes"]);
}

#[tokio::test]
async fn failing_chain_leaves_clipboard_and_slot_untouched() {
    let h = Harness::new();
    h.run(&["push", "keep"]).await.unwrap();
    let writes_before = h.clipboard.write_count();

    let err = h
        .run_with_input(&["copy", "--fx", "upper,fail,upper"], b"new".to_vec())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("'fail'"));
    assert_eq!(h.clipboard.read().await.unwrap(), b"clipboard text");
    assert_eq!(h.clipboard.write_count(), writes_before);

    h.run_with_input(&["push", "keep", "--stdin", "--fx", "fail"], b"replacement".to_vec())
        .await
        .unwrap_err();
    let (data, _) = h.slots().pull("keep").await.unwrap();
    assert_eq!(data, b"clipboard text");

    assert_eq!(h.history_commands(), vec!["push keep"]);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let h = Harness::new();

    h.run_with_input(&["copy", "--fx", "upper", "--dry-run"], b"preview me".to_vec())
        .await
        .unwrap();
    h.run(&["push", "draft", "--dry-run"]).await.unwrap();
    h.run(&["send", "desk", "--fx", "upper", "--dry-run"]).await.unwrap();
    h.run(&["recv", "desk", "--dry-run"]).await.unwrap();

    assert_eq!(
        h.output.contents(),
        "PREVIEW MEclipboard textCLIPBOARD TEXTremote text"
    );
    assert_eq!(h.clipboard.write_count(), 0);
    assert_eq!(h.remote.write_count(), 0);
    assert!(h.slots().list().await.unwrap().is_empty());
    assert!(h.history_commands().is_empty());
}

#[tokio::test]
async fn send_recv_and_peek() {
    let h = Harness::new();

    h.run(&["send", "desk"]).await.unwrap();
    assert_eq!(h.remote.read().await.unwrap(), b"clipboard text");

    h.remote.set_external("changed on desk").await;
    h.run(&["peek", "desk"]).await.unwrap();
    assert_eq!(h.output.contents(), "changed on desk");
    assert_eq!(h.clipboard.read().await.unwrap(), b"clipboard text");

    h.run(&["recv", "desk"]).await.unwrap();
    assert_eq!(h.clipboard.read().await.unwrap(), b"changed on desk");

    assert_eq!(
        *h.shell.calls.lock().unwrap(),
        vec!["clipslot copy", "clipslot paste", "clipslot paste"]
    );
    assert_eq!(h.history_commands(), vec!["send desk", "recv desk"]);
}

#[tokio::test]
async fn unknown_peer_and_transform_are_config_errors() {
    let h = Harness::new();

    let err = h.run(&["send", "laptop"]).await.unwrap_err();
    assert!(err.to_string().contains("Unknown peer 'laptop'"));

    let err = h.run(&["paste", "--fx", "rot13"]).await.unwrap_err();
    assert!(err.to_string().contains("Unknown transform 'rot13'"));
}

#[tokio::test]
async fn oversized_payload_rejected() {
    let h = Harness::new();

    let err = h
        .run_with_input(&["copy"], vec![b'x'; 4096])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("too large"));
    assert_eq!(h.clipboard.write_count(), 0);
}

#[tokio::test]
async fn list_show_delete() {
    let h = Harness::new();
    h.run(&["push", "beta"]).await.unwrap();
    h.run_with_input(&["push", "alpha", "--stdin", "--meta", "k=v"], b"first".to_vec())
        .await
        .unwrap();

    h.run(&["list"]).await.unwrap();
    let listing = h.output.contents();
    let alpha = listing.find("alpha").unwrap();
    let beta = listing.find("beta").unwrap();
    assert!(alpha < beta);

    h.run(&["show", "alpha"]).await.unwrap();
    assert!(h.output.contents().contains("Meta:      k=v"));
    assert!(h.output.contents().ends_with("first"));

    h.run(&["delete", "alpha"]).await.unwrap();
    h.run(&["delete", "alpha"]).await.unwrap();
    assert_eq!(h.slots().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn history_listing_and_clear() {
    let h = Harness::new();
    h.run(&["push", "one"]).await.unwrap();
    h.run(&["push", "two"]).await.unwrap();

    h.run(&["history", "--limit", "1"]).await.unwrap();
    let out = h.output.contents();
    assert!(out.contains("showing 1 entries"));
    assert!(out.contains("two"));
    assert!(!out.contains(" one "));

    h.run(&["history", "--clear"]).await.unwrap();
    assert!(h.history_commands().is_empty());
}

#[tokio::test]
async fn fx_run_and_list() {
    let h = Harness::new();

    h.run_with_input(&["fx", "run", "strip-ansi,upper"], b"\x1b[31mred\x1b[0m".to_vec())
        .await
        .unwrap();
    assert_eq!(h.output.contents(), "RED");

    h.run(&["fx", "list"]).await.unwrap();
    let out = h.output.contents();
    assert!(out.contains("redact-secrets"));
    assert!(out.contains("upper"));
}

#[tokio::test]
async fn config_show_redacts_passphrase() {
    let mut h = Harness::new();
    h.config.sync.passphrase = Some("hunter2".to_string());

    h.run(&["config", "show"]).await.unwrap();
    let out = h.output.contents();
    assert!(out.contains("[REDACTED]"));
    assert!(!out.contains("hunter2"));
}

#[test]
fn fx_flag_splits_on_commas() {
    let cli = Cli::try_parse_from(["clipslot", "copy", "--fx", "a,b", "--fx", "c"]).unwrap();
    let clipslot::cli::Commands::Copy { fx } = cli.command else {
        panic!("expected copy");
    };
    assert_eq!(fx.chain, vec!["a", "b", "c"]);
    assert!(!fx.dry_run);
}
