use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::clipboard::{self, ClipboardProvider, SystemClipboard};
use crate::config::Config;
use crate::fx::{FxRegistry, Pipeline};
use crate::history::HistoryTracker;
use crate::slots::SlotStore;
use crate::transport::{Peer, PeerTransport};
use crate::watch::WatchLoop;

pub mod format;

/// Characters of content shown in status lines
const PREVIEW_CHARS: usize = 60;

/// Version string with build metadata from build.rs
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ntarget:  ",
    env!("CLIPSLOT_TARGET"),
    "\nprofile: ",
    env!("CLIPSLOT_PROFILE"),
    "\nrustc:   ",
    env!("CLIPSLOT_RUSTC_VERSION"),
    "\nbuilt:   ",
    env!("CLIPSLOT_BUILD_DATE"),
);

#[derive(Parser)]
#[command(name = "clipslot")]
#[command(about = "Route clipboard content between machines, encrypted slots and peers")]
#[command(version, long_version = LONG_VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Options shared by commands that move content
#[derive(Args, Debug, Clone, Default)]
pub struct FxArgs {
    /// Transform chain applied before writing, e.g. --fx strip-ansi,pretty-json
    #[arg(long = "fx", value_delimiter = ',')]
    pub chain: Vec<String>,

    /// Print the result instead of writing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Copy stdin to the clipboard")]
    Copy {
        #[command(flatten)]
        fx: FxArgs,
    },

    #[command(about = "Write the clipboard to stdout")]
    Paste {
        #[command(flatten)]
        fx: FxArgs,
    },

    #[command(about = "Store the clipboard in a slot")]
    Push {
        slot: String,

        /// Read content from stdin instead of the clipboard
        #[arg(long)]
        stdin: bool,

        /// Extra metadata stored with the slot
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = format::parse_key_value)]
        meta: Vec<(String, String)>,

        #[command(flatten)]
        fx: FxArgs,
    },

    #[command(about = "Load a slot into the clipboard")]
    Pull {
        slot: String,

        /// Write to stdout instead of the clipboard
        #[arg(long)]
        stdout: bool,

        #[command(flatten)]
        fx: FxArgs,
    },

    #[command(about = "Show a slot without touching the clipboard")]
    Show { slot: String },

    #[command(about = "List slots")]
    List,

    #[command(about = "Delete a slot")]
    Delete { slot: String },

    #[command(about = "Send the clipboard to a peer")]
    Send {
        peer: String,

        #[command(flatten)]
        fx: FxArgs,
    },

    #[command(about = "Replace the clipboard with a peer's clipboard")]
    Recv {
        peer: String,

        #[command(flatten)]
        fx: FxArgs,
    },

    #[command(about = "Print a peer's clipboard")]
    Peek { peer: String },

    #[command(about = "Keep the clipboard in sync with a peer until interrupted")]
    Watch {
        peer: String,

        /// Poll interval in milliseconds (minimum 250)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    #[command(about = "Show operation history")]
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Remove all history entries
        #[arg(long)]
        clear: bool,
    },

    #[command(about = "Transforms")]
    Fx {
        #[command(subcommand)]
        action: FxAction,
    },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum FxAction {
    #[command(about = "List available transforms")]
    List,

    #[command(about = "Run a transform chain over stdin")]
    Run {
        /// Comma-separated transform names
        chain: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

pub struct CliHandler {
    config: Arc<Config>,
    config_path: Option<PathBuf>,
    clipboard: Option<Arc<dyn ClipboardProvider>>,
    slots: Option<Arc<SlotStore>>,
    transport: Option<PeerTransport>,
    history: Option<Arc<HistoryTracker>>,
    fx: Option<Arc<FxRegistry>>,
    pipeline: Pipeline,
    input: Option<Vec<u8>>,
    output: Box<dyn Write + Send>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Config::load_config(config_path.as_deref())?;
        Ok(Self::with_config(config, config_path))
    }

    fn with_config(config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            clipboard: None,
            slots: None,
            transport: None,
            history: None,
            fx: None,
            pipeline: Pipeline::new(),
            input: None,
            output: Box::new(std::io::stdout()),
            shutdown: None,
        }
    }

    /// Handler with pre-built collaborators, used by tests and embedders
    pub fn with_parts(
        config: Config,
        clipboard: Arc<dyn ClipboardProvider>,
        slots: SlotStore,
        transport: PeerTransport,
    ) -> Self {
        let mut handler = Self::with_config(config, None);
        handler.clipboard = Some(clipboard);
        handler.slots = Some(Arc::new(slots));
        handler.transport = Some(transport);
        handler
    }

    /// Use `input` in place of stdin
    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Send command output somewhere other than stdout
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = output;
        self
    }

    /// Signal that stops `watch`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lazily initialize the clipboard provider when needed
    fn ensure_clipboard(&mut self) -> Arc<dyn ClipboardProvider> {
        if let Some(clipboard) = &self.clipboard {
            return Arc::clone(clipboard);
        }
        info!("Initializing system clipboard");
        let clipboard: Arc<dyn ClipboardProvider> = Arc::new(SystemClipboard::new());
        self.clipboard = Some(Arc::clone(&clipboard));
        clipboard
    }

    /// Lazily initialize the slot store when needed
    fn ensure_slots(&mut self) -> Result<Arc<SlotStore>> {
        if let Some(slots) = &self.slots {
            return Ok(Arc::clone(slots));
        }
        let slots = Arc::new(SlotStore::from_config(&self.config.sync)?);
        info!(backend = slots.backend().kind(), "Initialized slot store");
        self.slots = Some(Arc::clone(&slots));
        Ok(slots)
    }

    fn ensure_transport(&mut self, peer: &str) -> Result<(PeerTransport, Peer)> {
        let peer_config = self.config.peer(peer)?;
        let peer = Peer::from_config(peer, peer_config);
        if let Some(transport) = &self.transport {
            return Ok((transport.clone(), peer));
        }
        let transport = PeerTransport::ssh(peer_config.ssh_args.clone());
        self.transport = Some(transport.clone());
        Ok((transport, peer))
    }

    fn ensure_history(&mut self) -> Arc<HistoryTracker> {
        if let Some(history) = &self.history {
            return Arc::clone(history);
        }
        let history = Arc::new(HistoryTracker::new(&self.config.history));
        self.history = Some(Arc::clone(&history));
        history
    }

    fn ensure_fx(&mut self) -> crate::Result<Arc<FxRegistry>> {
        if let Some(fx) = &self.fx {
            return Ok(Arc::clone(fx));
        }
        let fx = Arc::new(FxRegistry::from_config(&self.config.fx)?);
        self.fx = Some(Arc::clone(&fx));
        Ok(fx)
    }

    pub async fn handle_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Copy { fx } => self.copy(fx).await,
            Commands::Paste { fx } => self.paste(fx).await,
            Commands::Push {
                slot,
                stdin,
                meta,
                fx,
            } => self.push(&slot, stdin, meta.into_iter().collect(), fx).await,
            Commands::Pull { slot, stdout, fx } => self.pull(&slot, stdout, fx).await,
            Commands::Show { slot } => self.show(&slot).await,
            Commands::List => self.list().await,
            Commands::Delete { slot } => self.delete(&slot).await,
            Commands::Send { peer, fx } => self.send(&peer, fx).await,
            Commands::Recv { peer, fx } => self.recv(&peer, fx).await,
            Commands::Peek { peer } => self.peek(&peer).await,
            Commands::Watch { peer, interval_ms } => self.watch(&peer, interval_ms).await,
            Commands::History { limit, clear } => self.show_history(limit, clear).await,
            Commands::Fx { action } => self.handle_fx_action(action).await,
            Commands::Config { action } => self.handle_config_action(action),
        }
    }

    async fn copy(&mut self, fx: FxArgs) -> Result<()> {
        let input = self.read_input().await?;
        let data = self.transform(&input, &fx).await?;
        if self.dry_run(&fx, &data)? {
            return Ok(());
        }

        self.check_size(&data)?;
        self.ensure_clipboard().write(&data).await?;
        self.record("copy", "clipboard", &data).await;
        eprintln!(
            "Copied {} to clipboard: {}",
            format::format_bytes(data.len() as u64),
            format::preview(&data, PREVIEW_CHARS)
        );
        Ok(())
    }

    async fn paste(&mut self, fx: FxArgs) -> Result<()> {
        let content = self.ensure_clipboard().read().await?;
        let data = self.transform(&content, &fx).await?;
        self.write_output(&data)
    }

    async fn push(
        &mut self,
        slot: &str,
        from_stdin: bool,
        meta: BTreeMap<String, String>,
        fx: FxArgs,
    ) -> Result<()> {
        let source = if from_stdin {
            self.read_input().await?
        } else {
            self.ensure_clipboard().read().await?
        };
        if source.is_empty() {
            bail!("Nothing to push: {} is empty", if from_stdin { "stdin" } else { "clipboard" });
        }

        let data = self.transform(&source, &fx).await?;
        if self.dry_run(&fx, &data)? {
            return Ok(());
        }

        self.check_size(&data)?;
        let slots = self.ensure_slots()?;
        let header = slots.push(slot, &data, meta).await?;
        self.record("push", slot, &data).await;
        eprintln!(
            "Pushed {} to slot '{}'{}",
            format::format_bytes(header.size),
            slot,
            if header.encrypted { " (encrypted)" } else { "" }
        );
        Ok(())
    }

    async fn pull(&mut self, slot: &str, to_stdout: bool, fx: FxArgs) -> Result<()> {
        let slots = self.ensure_slots()?;
        let (content, _) = slots.pull(slot).await?;
        let data = self.transform(&content, &fx).await?;

        if to_stdout {
            return self.write_output(&data);
        }
        if self.dry_run(&fx, &data)? {
            return Ok(());
        }

        self.check_size(&data)?;
        self.ensure_clipboard().write(&data).await?;
        self.record("pull", slot, &data).await;
        eprintln!(
            "Pulled slot '{}' into clipboard ({})",
            slot,
            format::format_bytes(data.len() as u64)
        );
        Ok(())
    }

    async fn show(&mut self, slot: &str) -> Result<()> {
        let slots = self.ensure_slots()?;
        let (content, header) = slots.pull(slot).await?;

        let mut out = String::new();
        out.push_str(&format!("Slot:      {}\n", header.name));
        out.push_str(&format!("Size:      {}\n", format::format_bytes(header.size)));
        out.push_str(&format!("Created:   {}\n", format::format_time(&header.created_at)));
        out.push_str(&format!("Host:      {}\n", header.hostname));
        out.push_str(&format!("Encrypted: {}\n", if header.encrypted { "yes" } else { "no" }));
        if let Some(ttl) = header.ttl_days {
            out.push_str(&format!("TTL:       {} days\n", ttl));
        }
        for (key, value) in &header.meta {
            out.push_str(&format!("Meta:      {}={}\n", key, value));
        }
        out.push('\n');

        self.output.write_all(out.as_bytes())?;
        self.write_output(&content)
    }

    async fn list(&mut self) -> Result<()> {
        let slots = self.ensure_slots()?;
        let mut entries = slots.list().await?;

        if entries.is_empty() {
            writeln!(self.output, "No slots found")?;
            return Ok(());
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(4).max(4);
        writeln!(
            self.output,
            "{:<width$}  {:>10}  {:<19}  {:<3}  HOST",
            "NAME",
            "SIZE",
            "CREATED",
            "ENC",
            width = width
        )?;
        for entry in &entries {
            writeln!(
                self.output,
                "{:<width$}  {:>10}  {:<19}  {:<3}  {}",
                entry.name,
                format::format_bytes(entry.size),
                format::format_time(&entry.created_at),
                if entry.encrypted { "yes" } else { "no" },
                entry.hostname,
                width = width
            )?;
        }
        Ok(())
    }

    async fn delete(&mut self, slot: &str) -> Result<()> {
        let slots = self.ensure_slots()?;
        slots.delete(slot).await?;
        self.record("delete", slot, b"").await;
        eprintln!("Deleted slot '{}'", slot);
        Ok(())
    }

    async fn send(&mut self, peer: &str, fx: FxArgs) -> Result<()> {
        let (transport, peer) = self.ensure_transport(peer)?;
        let content = self.ensure_clipboard().read().await?;
        if content.is_empty() {
            bail!("Nothing to send: clipboard is empty");
        }

        let data = self.transform(&content, &fx).await?;
        if self.dry_run(&fx, &data)? {
            return Ok(());
        }

        self.check_size(&data)?;
        transport.send_to(&peer, &data).await?;
        self.record("send", &peer.name, &data).await;
        eprintln!(
            "Sent {} to {} ({})",
            format::format_bytes(data.len() as u64),
            peer.name,
            peer.target
        );
        Ok(())
    }

    async fn recv(&mut self, peer: &str, fx: FxArgs) -> Result<()> {
        let (transport, peer) = self.ensure_transport(peer)?;
        let content = transport.read_from(&peer).await?;
        if content.is_empty() {
            bail!("Peer '{}' has an empty clipboard", peer.name);
        }

        let data = self.transform(&content, &fx).await?;
        if self.dry_run(&fx, &data)? {
            return Ok(());
        }

        self.check_size(&data)?;
        self.ensure_clipboard().write(&data).await?;
        self.record("recv", &peer.name, &data).await;
        eprintln!(
            "Received {} from {}: {}",
            format::format_bytes(data.len() as u64),
            peer.name,
            format::preview(&data, PREVIEW_CHARS)
        );
        Ok(())
    }

    async fn peek(&mut self, peer: &str) -> Result<()> {
        let (transport, peer) = self.ensure_transport(peer)?;
        let content = transport.read_from(&peer).await?;
        self.write_output(&content)
    }

    async fn watch(&mut self, peer: &str, interval_ms: Option<u64>) -> Result<()> {
        let (transport, peer) = self.ensure_transport(peer)?;
        let interval = interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.watch.interval());
        // Without a shutdown signal the loop runs until a fatal error
        let (_never_sent, fallback) = watch::channel(false);
        let shutdown = self.shutdown.clone().unwrap_or(fallback);

        let label = format!("{} ({})", peer.name, peer.target);
        let mut watch_loop = WatchLoop::new(self.ensure_clipboard(), transport, peer, interval)
            .with_max_size(self.config.clipboard.max_size)
            .with_history(self.ensure_history());

        eprintln!(
            "Watching {} every {}ms (Ctrl-C to stop)",
            label,
            watch_loop.interval().as_millis()
        );
        let summary = watch_loop.run(shutdown).await?;
        eprintln!(
            "Watch stopped: {} sent, {} received, {} conflicts",
            summary.sent, summary.received, summary.conflicts
        );
        Ok(())
    }

    async fn show_history(&mut self, limit: usize, clear: bool) -> Result<()> {
        let history = self.ensure_history();
        if clear {
            history.clear().await?;
            eprintln!("History cleared");
            return Ok(());
        }

        let entries = history.entries().await?;
        if entries.is_empty() {
            writeln!(self.output, "No history found")?;
            return Ok(());
        }

        let start = entries.len().saturating_sub(limit);
        writeln!(self.output, "History (showing {} entries):", entries.len() - start)?;
        for entry in &entries[start..] {
            writeln!(
                self.output,
                "[{}] {:<14} {:<20} {:>10}  {}",
                format::format_time(&entry.timestamp),
                entry.command,
                entry.target,
                format::format_bytes(entry.size),
                entry.signature.get(..12).unwrap_or(&entry.signature)
            )?;
        }
        Ok(())
    }

    async fn handle_fx_action(&mut self, action: FxAction) -> Result<()> {
        match action {
            FxAction::List => {
                let registry = self.ensure_fx()?;
                for transform in registry.iter() {
                    writeln!(
                        self.output,
                        "{:<16} {:<40} {}",
                        transform.name, transform.invocation, transform.description
                    )?;
                }
                Ok(())
            }
            FxAction::Run { chain } => {
                let fx = FxArgs {
                    chain: format::parse_chain(&chain),
                    dry_run: false,
                };
                let input = self.read_input().await?;
                let data = self.transform(&input, &fx).await?;
                self.write_output(&data)
            }
        }
    }

    fn handle_config_action(&mut self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                let mut shown = (*self.config).clone();
                if shown.sync.passphrase.is_some() {
                    shown.sync.passphrase = Some("[REDACTED]".to_string());
                }
                let rendered = toml::to_string_pretty(&shown).context("Failed to render config")?;
                writeln!(self.output, "# Current Configuration\n{}", rendered)?;
            }
            ConfigAction::Init { force } => {
                let path = match &self.config_path {
                    Some(path) => path.clone(),
                    None => Config::default_path()
                        .context("Could not determine the config directory")?,
                };
                Config::write_example(&path, force)?;
                eprintln!("Example configuration written to {}", path.display());
            }
            ConfigAction::Validate => {
                // Loading already validated the file
                self.config.validate()?;
                FxRegistry::from_config(&self.config.fx)?;
                writeln!(self.output, "Configuration is valid")?;
            }
        }
        Ok(())
    }

    /// Run the requested chain. The caller only writes the result once this
    /// returned successfully.
    async fn transform(&mut self, input: &[u8], fx: &FxArgs) -> crate::Result<Vec<u8>> {
        if fx.chain.is_empty() {
            return Ok(input.to_vec());
        }
        let registry = self.ensure_fx()?;
        let chain = registry.resolve(&fx.chain)?;
        Ok(self.pipeline.run_chain(input, &chain, fx.dry_run).await?)
    }

    /// Print instead of writing when `--dry-run` is set
    fn dry_run(&mut self, fx: &FxArgs, data: &[u8]) -> Result<bool> {
        if !fx.dry_run {
            return Ok(false);
        }
        info!(size = data.len(), "dry run, nothing written");
        self.write_output(data)?;
        Ok(true)
    }

    fn check_size(&self, data: &[u8]) -> crate::Result<()> {
        clipboard::check_size(data.len(), self.config.clipboard.max_size)?;
        Ok(())
    }

    async fn read_input(&mut self) -> Result<Vec<u8>> {
        if let Some(input) = self.input.take() {
            return Ok(input);
        }
        let mut buffer = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buffer)
            .await
            .context("Failed to read stdin")?;
        Ok(buffer)
    }

    fn write_output(&mut self, data: &[u8]) -> Result<()> {
        self.output.write_all(data)?;
        self.output.flush()?;
        Ok(())
    }

    async fn record(&mut self, command: &str, target: &str, data: &[u8]) {
        let history = self.ensure_history();
        if let Err(e) = history.record(command, target, data).await {
            warn!("Failed to record history: {}", e);
        }
    }
}
