//! Line-oriented operator console
//!
//! Stands in for the touch UI: scan, pick a result, drive, watch events.

use crate::connection::{ConnectionEvent, ConnectionEventReceiver, ConnectionManager};
use crate::scanning::{DeviceDescriptor, ScanReport};
use crate::transport::{ScanAck, TransportKind};
use anyhow::{anyhow, bail, Context, Result};
use rc_link_shared::link::{DEFAULT_TARGET_IP, DEFAULT_TARGET_PORT};
use rc_link_shared::{Command, ControlPanel, Gear, Toggle, TurnSignal};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const HELP: &str = "\
commands:
  scan                          scan on the selected transport
  connect <n | identifier>      connect to scan result n or an address
  last                          reconnect to the last Classic BT device
  wifi <ssid> [pass] [ip] [port]
  saved [n]                     list saved WiFi endpoints or connect to one
  forget <n | all>
  type <ble | classic | wifi>
  steer <-90..90>   throttle <0..99>   gear <n | r | d>
  signal <left | right | hazard>   toggle <lights | led | rgb | start>
  horn   lighthorn   menu   acc <on | off>   send <token>
  status   disconnect   help   quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Scan,
    Connect(String),
    ConnectLast,
    Wifi {
        ssid: String,
        passphrase: Option<String>,
        ip: String,
        port: u16,
    },
    Saved(Option<usize>),
    Forget(Option<usize>),
    Type(TransportKind),
    Steer(f64),
    Throttle(u8),
    Gear(Gear),
    Signal(TurnSignal),
    Toggle(Toggle),
    Horn,
    LightHorn,
    Menu,
    Accelerometer(bool),
    Send(String),
    Status,
    Disconnect,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("empty command");
        };
        let rest: Vec<&str> = words.collect();
        let arg = |i: usize| rest.get(i).copied().ok_or_else(|| anyhow!("{verb}: missing argument"));

        let command = match verb.to_ascii_lowercase().as_str() {
            "scan" => Self::Scan,
            "connect" | "c" => {
                if rest.is_empty() {
                    bail!("connect: missing argument");
                }
                Self::Connect(rest.join(" "))
            }
            "last" => Self::ConnectLast,
            "wifi" => Self::Wifi {
                ssid: arg(0)?.to_string(),
                passphrase: rest.get(1).map(|p| p.to_string()),
                ip: rest.get(2).copied().unwrap_or(DEFAULT_TARGET_IP).to_string(),
                port: match rest.get(3) {
                    Some(port) => port.parse().context("wifi: invalid port")?,
                    None => DEFAULT_TARGET_PORT,
                },
            },
            "saved" => Self::Saved(rest.first().map(|n| parse_index(n)).transpose()?),
            "forget" => match arg(0)? {
                "all" => Self::Forget(None),
                n => Self::Forget(Some(parse_index(n)?)),
            },
            "type" => Self::Type(arg(0)?.parse()?),
            "steer" | "s" => Self::Steer(arg(0)?.parse().context("steer: expected an angle")?),
            "throttle" | "g" => Self::Throttle(arg(0)?.parse().context("throttle: expected 0-99")?),
            "gear" => Self::Gear(match arg(0)?.to_ascii_lowercase().as_str() {
                "n" | "neutral" => Gear::Neutral,
                "r" | "reverse" => Gear::Reverse,
                "d" | "drive" => Gear::Drive,
                other => bail!("gear: unknown gear {other}"),
            }),
            "signal" => Self::Signal(match arg(0)?.to_ascii_lowercase().as_str() {
                "left" | "l" => TurnSignal::Left,
                "right" | "r" => TurnSignal::Right,
                "hazard" | "all" => TurnSignal::Hazard,
                other => bail!("signal: unknown signal {other}"),
            }),
            "toggle" => Self::Toggle(match arg(0)?.to_ascii_lowercase().as_str() {
                "lights" | "lit" => Toggle::Lights,
                "led" => Toggle::Led,
                "rgb" => Toggle::Rgb,
                "start" | "sta" => Toggle::Start,
                other => bail!("toggle: unknown control {other}"),
            }),
            "horn" => Self::Horn,
            "lighthorn" => Self::LightHorn,
            "menu" => Self::Menu,
            "acc" => Self::Accelerometer(match arg(0)? {
                "on" | "1" => true,
                "off" | "0" => false,
                other => bail!("acc: expected on or off, got {other}"),
            }),
            "send" => Self::Send(arg(0)?.to_string()),
            "status" => Self::Status,
            "disconnect" | "d" => Self::Disconnect,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => bail!("unknown command {other}; try help"),
        };
        Ok(command)
    }
}

/// 1-based list index
fn parse_index(s: &str) -> Result<usize> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => bail!("expected a list number, got {s}"),
    }
}

pub struct Console {
    manager: ConnectionManager,
    panel: ControlPanel,
    /// Selectable devices from the most recent scan
    results: Arc<Mutex<Vec<DeviceDescriptor>>>,
}

impl Console {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            panel: ControlPanel::new(),
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn run(mut self, mut events: ConnectionEventReceiver) -> Result<()> {
        println!("{HELP}");
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = stdin.next_line() => {
                    let Some(line) = line.context("reading stdin")? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match ConsoleCommand::parse(&line) {
                        Ok(ConsoleCommand::Quit) => break,
                        Ok(command) => self.execute(command).await,
                        Err(e) => println!("{e}"),
                    }
                }
                event = events.recv() => match event {
                    Some(event) => report_event(&event),
                    None => {
                        warn!("Connection manager closed");
                        break;
                    }
                },
            }
        }

        self.manager.disconnect().await;
        info!("Console closed");
        Ok(())
    }

    async fn execute(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Scan => self.scan(),
            ConsoleCommand::Connect(target) => self.connect(&target).await,
            ConsoleCommand::ConnectLast => match self.manager.last_classic_device() {
                Some(address) => {
                    self.manager.set_connection_type(TransportKind::Classic).await;
                    self.manager.connect(&address).await;
                }
                None => println!("No Classic BT device on record"),
            },
            ConsoleCommand::Wifi {
                ssid,
                passphrase,
                ip,
                port,
            } => {
                self.manager
                    .connect_wifi(&ssid, passphrase.as_deref(), &ip, port)
                    .await;
            }
            ConsoleCommand::Saved(None) => {
                let saved = self.manager.saved_connections();
                if saved.is_empty() {
                    println!("No saved connections");
                }
                for (i, connection) in saved.iter().enumerate() {
                    println!("{:2}. {} ({})", i + 1, connection.name, connection.endpoint());
                }
            }
            ConsoleCommand::Saved(Some(index)) => match self.manager.saved_connections().get(index) {
                Some(connection) => {
                    self.manager.connect_saved(&connection.ip, connection.port).await;
                }
                None => println!("No saved connection {}", index + 1),
            },
            ConsoleCommand::Forget(None) => {
                self.manager.clear_saved();
                println!("Cleared saved connections");
            }
            ConsoleCommand::Forget(Some(index)) => match self.manager.saved_connections().get(index) {
                Some(connection) => {
                    self.manager.remove_saved(&connection.ip, connection.port);
                    println!("Forgot {}", connection.name);
                }
                None => println!("No saved connection {}", index + 1),
            },
            ConsoleCommand::Type(kind) => {
                self.manager.set_connection_type(kind).await;
                if !self.manager.initialize().await {
                    println!("{kind} radio is not ready");
                }
            }
            ConsoleCommand::Steer(angle) => self.send(Command::steering(angle)).await,
            ConsoleCommand::Throttle(value) => self.send(Command::throttle(value)).await,
            ConsoleCommand::Gear(gear) => {
                let command = self.panel.select_gear(gear);
                self.send(command).await;
            }
            ConsoleCommand::Signal(signal) => {
                let command = self.panel.press_turn_signal(signal);
                self.send(command).await;
            }
            ConsoleCommand::Toggle(toggle) => {
                let command = self.panel.toggle(toggle);
                self.send(command).await;
            }
            ConsoleCommand::Horn => {
                self.send(Command::horn(true)).await;
                self.send(Command::horn(false)).await;
            }
            ConsoleCommand::LightHorn => self.send(Command::light_horn()).await,
            ConsoleCommand::Menu => self.send(Command::menu()).await,
            ConsoleCommand::Accelerometer(enabled) => {
                for command in self.panel.set_accelerometer(enabled) {
                    self.send(command).await;
                }
            }
            ConsoleCommand::Send(token) => match Command::new(token) {
                Ok(command) => self.send(command).await,
                Err(e) => println!("{e}"),
            },
            ConsoleCommand::Status => {
                println!(
                    "{} via {}{}",
                    self.manager.state(),
                    self.manager.connection_type(),
                    self.manager
                        .device_name()
                        .map(|name| format!(" to {name}"))
                        .unwrap_or_default()
                );
                if let Some(level) = self.manager.battery_level() {
                    println!("Battery {level}%");
                }
            }
            ConsoleCommand::Disconnect => self.manager.disconnect().await,
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => {}
        }
    }

    fn scan(&self) {
        let results = self.results.clone();
        let ack = self.manager.start_scan(Box::new(move |report: ScanReport| {
            for line in report.lines() {
                println!("{line}");
            }
            if !report.devices.is_empty() {
                println!("Select with connect <n>:");
                for (i, device) in report.devices.iter().enumerate() {
                    println!("{:2}. {}", i + 1, device.render().replace('\n', " "));
                }
            }
            *results.lock().unwrap_or_else(|e| e.into_inner()) = report.devices;
        }));
        match ack {
            ScanAck::Started => println!("Scanning on {}...", self.manager.connection_type()),
            ScanAck::AlreadyScanning => println!("Scan already in progress"),
        }
    }

    async fn connect(&self, target: &str) {
        let identifier = match parse_index(target) {
            Ok(index) => {
                let results = self.results.lock().unwrap_or_else(|e| e.into_inner()).clone();
                match results.get(index) {
                    Some(device) => device.render(),
                    None => {
                        println!("No scan result {}", index + 1);
                        return;
                    }
                }
            }
            Err(_) => target.to_string(),
        };

        if self.manager.connection_type() == TransportKind::Wifi {
            let selection = self.manager.wifi_selection(&identifier);
            if selection.requires_passphrase {
                println!(
                    "{} is secured; use: wifi {} <passphrase> [ip] [port]",
                    selection.ssid, selection.ssid
                );
                return;
            }
        }
        self.manager.connect(&identifier).await;
    }

    async fn send(&self, command: Command) {
        if !self.manager.send(&command).await {
            println!("Not sent: {command}");
        }
    }
}

fn report_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::StateChanged { .. } | ConnectionEvent::Signal(_) => {}
        ConnectionEvent::Connected { transport, device } => println!("Connected via {transport} to {device}"),
        ConnectionEvent::Disconnected { reason } => println!("Disconnected: {reason}"),
        ConnectionEvent::ConnectionFailed { transport, reason } => {
            println!("{transport} connection failed: {reason}")
        }
        ConnectionEvent::SignalLost { transport, reason } => println!("{transport} signal lost: {reason}"),
        ConnectionEvent::Battery { level, low } => {
            if *low {
                println!("Battery low: {level}%");
            }
        }
        ConnectionEvent::TransportSwitched { from, to } => println!("Transport switched: {from} -> {to}"),
        ConnectionEvent::PassphraseRequired { ssid } => {
            println!("{ssid} is secured; use: wifi {ssid} <passphrase> [ip] [port]")
        }
    }
}
