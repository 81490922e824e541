// src/app.rs
//
// Console application. One task drains the event queue (user commands,
// inbound frames, source errors, send ticks); all state changes and log
// output happen there.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::command::{parse_command, Command, FilterCommand, HELP};
use crate::composer::{MessageEditor, Radix, ValidationError};
use crate::connection::{ConnectionManager, FrameSink, SendError};
use crate::display::{LogColour, LogSink};
use crate::filter::FilterTable;
use crate::io::{list_channels, BusConfig, BusOpener, ChannelList, FrameMessage, TransportKind};
use crate::settings::{parse_bitrate, save_settings, AppSettings, BITRATE_PRESETS};
use crate::transmit::{SendController, TickFn, TriggerAction};

// ============================================================================
// Events
// ============================================================================

#[derive(Debug)]
pub enum AppEvent {
    /// A line typed by the user
    Line(String),
    /// Inbound frame, already filtered
    Frame(FrameMessage),
    /// The driver stopped after a read error
    SourceError(String),
    /// Periodic send timer fired (timer generation)
    SendTick(u64),
    Quit,
}

/// Relay output goes onto the application queue
struct EventSink(mpsc::UnboundedSender<AppEvent>);

impl FrameSink for EventSink {
    fn on_frame(&self, frame: FrameMessage) {
        let _ = self.0.send(AppEvent::Frame(frame));
    }

    fn on_source_error(&self, message: String) {
        let _ = self.0.send(AppEvent::SourceError(message));
    }
}

// ============================================================================
// Application
// ============================================================================

/// Startup options
#[derive(Clone, Debug)]
pub struct AppOptions {
    pub kind: TransportKind,
    pub radix: Radix,
    /// Bitrate text ("1M", "500k")
    pub bitrate: String,
    /// Where to save settings on exit; `None` disables saving
    pub settings_path: Option<PathBuf>,
}

pub struct App {
    kind: TransportKind,
    radix: Radix,
    channels: ChannelList,
    channel: Option<String>,
    bitrate: String,
    editor: MessageEditor,
    filters: FilterTable,
    connection: ConnectionManager,
    sender: SendController,
    log: Arc<dyn LogSink>,
    settings_path: Option<PathBuf>,
}

impl App {
    pub fn new(
        options: AppOptions,
        opener: Arc<dyn BusOpener>,
        log: Arc<dyn LogSink>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let sink = Arc::new(EventSink(events.clone()));
        let tick: TickFn = Arc::new(move |generation| events.send(AppEvent::SendTick(generation)).is_ok());

        Self {
            kind: options.kind,
            radix: options.radix,
            channels: ChannelList::default(),
            channel: None,
            bitrate: options.bitrate,
            editor: MessageEditor::new(options.radix),
            filters: FilterTable::new(options.radix),
            connection: ConnectionManager::new(opener, sink),
            sender: SendController::new(tick),
            log,
            settings_path: options.settings_path,
        }
    }

    /// `CANViewer | <can type> | <radix>`
    pub fn title(&self) -> String {
        format!("CANViewer | {} | {}", self.kind, self.radix)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status()
    }

    fn info(&self, text: impl AsRef<str>) {
        self.log.log(text.as_ref(), LogColour::Plain);
    }

    fn error(&self, text: impl AsRef<str>) {
        self.log.log(text.as_ref(), LogColour::Error);
    }

    /// Drain the event queue until quit, then shut down.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<AppEvent>) {
        self.info(self.title());
        self.info("Type 'help' for commands.");
        self.refresh_channels().await;

        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }

        self.shutdown().await;
    }

    /// Process one event. Returns false when the application should exit.
    pub async fn handle_event(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::Line(line) => return self.handle_line(&line).await,
            AppEvent::Frame(frame) => self.log.log_frame(&frame),
            AppEvent::SourceError(message) => self.error(format!("Receive stopped: {}", message)),
            AppEvent::SendTick(generation) => {
                if self.sender.accept_tick(generation) {
                    self.send_current().await;
                }
            }
            AppEvent::Quit => return false,
        }
        true
    }

    /// Parse and run one command line
    pub async fn handle_line(&mut self, line: &str) -> bool {
        match parse_command(line) {
            Ok(Some(command)) => self.execute(command).await,
            Ok(None) => true,
            Err(e) => {
                self.error(e.to_string());
                true
            }
        }
    }

    async fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Ports => self.refresh_channels().await,
            Command::Port(name) => {
                self.info(format!("Port: {}", name));
                self.channel = Some(name);
            }
            Command::Bitrate(text) => self.set_bitrate(text),
            Command::Connect => self.connect().await,
            Command::Disconnect => self.disconnect().await,
            Command::Id(text) => self.editor.id_text = text,
            Command::Data(fields) => self.editor.set_bytes(&fields),
            Command::Byte { index, text } => {
                if !self.editor.set_byte(index, &text) {
                    self.error(format!("Byte index {} out of range (0-7)", index));
                }
            }
            Command::Extended(extended) => {
                self.editor.is_extended = extended;
                self.info(if extended { "ExtID" } else { "StdID" });
            }
            Command::Radix(radix) => self.set_radix(radix),
            Command::ToggleRadix => self.set_radix(self.radix.toggled()),
            Command::Interval(text) => self.set_interval(&text),
            Command::Send => self.trigger_send().await,
            Command::Stop => {
                if self.sender.stop() {
                    self.info("Stopped sending data");
                }
            }
            Command::Filter(filter) => self.filter(filter),
            Command::Clear => self.log.clear(),
            Command::Status => self.status(),
            Command::Help => self.info(HELP),
            Command::Quit => return false,
        }
        true
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Enumerate channels off the event task; `ip link` and port scans block.
    async fn refresh_channels(&mut self) {
        let kind = self.kind;
        let listed = tokio::task::spawn_blocking(move || list_channels(kind))
            .await
            .map_err(|e| e.to_string())
            .and_then(|result| result.map_err(|e| e.to_string()));
        match listed {
            Ok(channels) => {
                self.channel = channels.default_channel().map(str::to_string);
                self.channels = channels;
                self.show_channels();
            }
            Err(e) => self.error(format!("Failed to list {} channels: {}", self.kind, e)),
        }
    }

    fn show_channels(&self) {
        if self.channels.names.is_empty() {
            self.info(format!("No {} channels found", self.kind));
            return;
        }
        for (i, name) in self.channels.names.iter().enumerate() {
            let marker = if self.channel.as_deref() == Some(name.as_str()) { "*" } else { " " };
            self.info(format!("{} {}: {}", marker, i + 1, name));
        }
    }

    fn set_bitrate(&mut self, text: String) {
        if self.is_connected() {
            self.error("Disconnect before changing the bitrate");
            return;
        }
        match parse_bitrate(&text) {
            Ok(bps) => {
                self.info(format!("Bitrate: {} ({} bps)", text, bps));
                self.bitrate = text;
            }
            Err(e) => self.error(format!("{} Presets: {}", e, BITRATE_PRESETS.join(", "))),
        }
    }

    async fn connect(&mut self) {
        if let Some(config) = self.connection.config() {
            self.error(format!("Already connected to {}", config.channel));
            return;
        }
        let Some(port) = self.channel.clone() else {
            self.error("Failed to connect: no port selected (use 'ports' and 'port <name>')");
            return;
        };
        let bps = match parse_bitrate(&self.bitrate) {
            Ok(bps) => bps,
            Err(e) => {
                self.error(format!("Failed to connect: {}", e));
                return;
            }
        };

        match self.connection.connect(BusConfig::new(&port, bps, self.kind)).await {
            Ok(()) => {
                self.push_ignore_ids();
                self.log.log(&format!("Connected to {} : {} bps", port, bps), LogColour::Event);
            }
            Err(e) => self.error(format!("Failed to connect: {}", e)),
        }
    }

    async fn disconnect(&mut self) {
        if self.sender.stop() {
            self.info("Stopped sending data");
        }
        match self.connection.disconnect().await {
            Ok(()) => self.log.log("Disconnected", LogColour::Event),
            Err(e) => self.error(e.to_string()),
        }
    }

    // ------------------------------------------------------------------------
    // Editor & Sending
    // ------------------------------------------------------------------------

    fn set_radix(&mut self, radix: Radix) {
        if radix == self.radix {
            return;
        }
        self.radix = radix;
        self.editor.set_radix(radix);
        self.filters.set_radix(radix);
        self.info(self.title());
    }

    fn set_interval(&mut self, text: &str) {
        match self.sender.set_interval(text) {
            Ok(Some(ms)) => self.info(format!("Interval: {}ms [{}]", ms, self.sender.button_label())),
            Ok(None) => self.info(format!("Interval: none [{}]", self.sender.button_label())),
            Err(e) => self.error(e.to_string()),
        }
    }

    async fn trigger_send(&mut self) {
        match self.sender.trigger(self.is_connected()) {
            Ok(TriggerAction::SendOnce) => self.send_current().await,
            Ok(TriggerAction::Started { interval_ms }) => {
                self.info(format!("Started sending data every {}ms", interval_ms));
            }
            Ok(TriggerAction::Stopped) => self.info("Stopped sending data"),
            Err(e) => self.error(e.to_string()),
        }
    }

    /// Build a frame from the editor and send it, logging the outcome
    async fn send_current(&mut self) {
        if !self.is_connected() {
            self.error(SendError::NotConnected.to_string());
            return;
        }
        let frame = match self.editor.build() {
            Ok(frame) => frame,
            Err(e @ (ValidationError::EmptyId | ValidationError::EmptyPayload)) => {
                self.error(e.to_string());
                return;
            }
            Err(e) => {
                self.error(format!("Invalid message: {}", e));
                return;
            }
        };
        match self.connection.send(frame).await {
            Ok(sent) => self.log.log_frame(&sent),
            Err(e) => self.error(format!("Failed to send: {}", e)),
        }
    }

    // ------------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------------

    fn filter(&mut self, command: FilterCommand) {
        let bad_row = |row: usize| format!("No filter row {}", row);
        match command {
            FilterCommand::Add { id, memo } => {
                let row = self.filters.add_row(&id, &memo);
                self.info(format!("Added filter row {}", row));
            }
            FilterCommand::Set { row, id } => match self.filters.row_mut(row) {
                Some(r) => r.id_text = id,
                None => return self.error(bad_row(row)),
            },
            FilterCommand::Memo { row, memo } => match self.filters.row_mut(row) {
                Some(r) => r.memo = memo,
                None => return self.error(bad_row(row)),
            },
            FilterCommand::Enable { row, enabled } => match self.filters.row_mut(row) {
                Some(r) => r.enabled = enabled,
                None => return self.error(bad_row(row)),
            },
            FilterCommand::Clear => self.filters.clear(),
            FilterCommand::List => {
                self.info("Row  On  Ignore ID   Memo");
                for line in self.filters.describe() {
                    self.info(line);
                }
                return;
            }
        }
        self.push_ignore_ids();
    }

    /// Recompute the ignore set from the table and hand it to the relay
    fn push_ignore_ids(&self) {
        let (ids, errors) = self.filters.ignore_ids();
        for (row, e) in errors {
            self.error(format!("Filter row {}: {}", row, e));
        }
        self.connection.set_ignore_ids(ids);
    }

    fn status(&self) {
        self.info(self.title());
        match self.connection.config() {
            Some(config) => self.info(format!(
                "Connected: {} at {} bps",
                config.channel, config.bitrate
            )),
            None => self.info(format!(
                "Not connected (port: {}, bitrate: {})",
                self.channel.as_deref().unwrap_or("-"),
                self.bitrate
            )),
        }
        self.info(format!("Message: {}", self.editor.summary()));
        self.info(format!(
            "Interval: {} [{}]",
            self.sender
                .interval_ms()
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "none".to_string()),
            self.sender.button_label()
        ));
        let ignored = self.connection.ignore_ids().snapshot();
        if !ignored.is_empty() {
            let ids: Vec<String> = ignored
                .iter()
                .map(|id| crate::composer::render_number(i64::from(*id), self.radix).unwrap_or_default())
                .collect();
            self.info(format!("Ignoring: {}", ids.join(", ")));
        }
    }

    /// Stop sending, close the channel and save settings
    pub async fn shutdown(&mut self) {
        self.sender.stop();
        if self.is_connected() {
            self.disconnect().await;
        }

        if let Some(path) = &self.settings_path {
            let settings = AppSettings {
                bitrate: self.bitrate.clone(),
            };
            match save_settings(path, &settings) {
                Ok(()) => tlog!("[app] Saved settings to {}", path.display()),
                Err(e) => tlog!("[app] {}", e),
            }
        }
    }
}

/// Forward stdin lines onto the event queue; EOF quits.
pub fn spawn_stdin_reader(events: mpsc::UnboundedSender<AppEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if events.send(AppEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = events.send(AppEvent::Quit);
                    break;
                }
                Err(e) => {
                    tlog!("[app] stdin read failed: {}", e);
                    let _ = events.send(AppEvent::Quit);
                    break;
                }
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
