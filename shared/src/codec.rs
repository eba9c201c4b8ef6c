//! ASCII command codec and newline framing
//!
//! Every message on the wire, in either direction, is a short ASCII token
//! followed by a newline:
//! ```text
//! [ token bytes (printable ASCII) ][ '\n' ]
//! ```
//!
//! Steering and throttle carry a two digit, zero padded value (`S05`, `G42`).

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Line delimiter appended to every command
pub const DELIMITER: u8 = b'\n';

/// Longest token the vehicle firmware accepts
pub const MAX_TOKEN_LEN: usize = 16;

/// Maximum buffered telemetry line before the decoder gives up on it
pub const MAX_LINE_LEN: usize = 1024;

/// Neutral steering value
pub const STEERING_CENTER: u8 = 50;

/// Largest value representable in a two digit token
pub const MAX_VALUE: u8 = 99;

/// Errors that can occur while building or framing commands
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Command token is empty")]
    EmptyToken,

    #[error("Invalid command token: {0:?}")]
    InvalidToken(String),

    #[error("Telemetry line too long: {0} bytes (max: {MAX_LINE_LEN})")]
    LineTooLong(usize),
}

/// Gear selection, mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gear {
    Neutral,
    Reverse,
    Drive,
}

impl Gear {
    pub fn token(self) -> &'static str {
        match self {
            Gear::Neutral => "N",
            Gear::Reverse => "R",
            Gear::Drive => "D",
        }
    }
}

/// Turn signals, mutually exclusive and toggled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnSignal {
    Left,
    Right,
    Hazard,
}

impl TurnSignal {
    pub fn token(self) -> &'static str {
        match self {
            TurnSignal::Left => "LTL",
            TurnSignal::Right => "RTL",
            TurnSignal::Hazard => "ALL",
        }
    }
}

/// Independent on/off controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    Lights,
    Led,
    Rgb,
    Start,
}

impl Toggle {
    pub const ALL: [Toggle; 4] = [Toggle::Lights, Toggle::Led, Toggle::Rgb, Toggle::Start];

    pub fn token(self) -> &'static str {
        match self {
            Toggle::Lights => "LIT",
            Toggle::Led => "LED",
            Toggle::Rgb => "RGB",
            Toggle::Start => "STA",
        }
    }

    fn index(self) -> usize {
        match self {
            Toggle::Lights => 0,
            Toggle::Led => 1,
            Toggle::Rgb => 2,
            Toggle::Start => 3,
        }
    }
}

/// A single immutable command token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Build a command from an arbitrary token, validating it for the wire
    pub fn new(token: impl Into<String>) -> Result<Self, CodecError> {
        let token = token.into();
        if token.is_empty() {
            return Err(CodecError::EmptyToken);
        }
        if token.len() > MAX_TOKEN_LEN || !token.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(CodecError::InvalidToken(token));
        }
        Ok(Self(token))
    }

    /// Steering from a wheel angle in degrees, -90 (full left) to 90 (full right)
    pub fn steering(angle: f64) -> Self {
        Self::steering_value(steering_value(angle))
    }

    /// Steering from a raw 0-99 value (50 = neutral)
    pub fn steering_value(value: u8) -> Self {
        Self(format!("S{:02}", value.min(MAX_VALUE)))
    }

    /// Throttle pedal, 0 = released
    pub fn throttle(value: u8) -> Self {
        Self(format!("G{:02}", value.min(MAX_VALUE)))
    }

    pub fn gear(gear: Gear) -> Self {
        Self(gear.token().into())
    }

    pub fn turn_signal(signal: TurnSignal) -> Self {
        Self(signal.token().into())
    }

    pub fn toggle(toggle: Toggle) -> Self {
        Self(toggle.token().into())
    }

    /// Momentary horn: `HOR` while held, `HOF` on release
    pub fn horn(pressed: bool) -> Self {
        Self(if pressed { "HOR" } else { "HOF" }.into())
    }

    /// Light-horn combo, same token on press and release
    pub fn light_horn() -> Self {
        Self("LHO".into())
    }

    /// Bluetooth/WiFi menu marker
    pub fn menu() -> Self {
        Self("BT".into())
    }

    pub fn accelerometer(enabled: bool) -> Self {
        Self(if enabled { "ACC1" } else { "ACC0" }.into())
    }

    /// The bare token without delimiter
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Encode the command for the wire (token + newline)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.0.len() + 1);
        buf.put_slice(self.0.as_bytes());
        buf.put_u8(DELIMITER);
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Map a wheel angle to the 0-99 steering scale
///
/// `value = clamp(0, 99, 50 + round(angle / 90 * 50))`. The upper bound is 99
/// so the token always stays two digits; full right lock therefore encodes as
/// `S99`. Non-finite angles are treated as centred.
pub fn steering_value(angle: f64) -> u8 {
    let angle = if angle.is_finite() {
        angle.clamp(-90.0, 90.0)
    } else {
        0.0
    };
    let value = f64::from(STEERING_CENTER) + (angle / 90.0 * 50.0).round();
    value.clamp(0.0, f64::from(MAX_VALUE)) as u8
}

/// Tracks the latched controls so mutually exclusive groups and toggles
/// produce the right tokens
#[derive(Debug, Default)]
pub struct ControlPanel {
    gear: Option<Gear>,
    turn_signal: Option<TurnSignal>,
    toggles: [bool; 4],
    accelerometer: bool,
}

impl ControlPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a gear; any previously selected gear is released
    pub fn select_gear(&mut self, gear: Gear) -> Command {
        self.gear = Some(gear);
        Command::gear(gear)
    }

    /// Press a turn signal button. Pressing the active signal turns it off,
    /// pressing another one replaces it. The same token is sent either way.
    pub fn press_turn_signal(&mut self, signal: TurnSignal) -> Command {
        if self.turn_signal == Some(signal) {
            self.turn_signal = None;
        } else {
            self.turn_signal = Some(signal);
        }
        Command::turn_signal(signal)
    }

    pub fn toggle(&mut self, toggle: Toggle) -> Command {
        let slot = &mut self.toggles[toggle.index()];
        *slot = !*slot;
        Command::toggle(toggle)
    }

    /// Switch accelerometer steering. Turning it off re-centres the wheel.
    pub fn set_accelerometer(&mut self, enabled: bool) -> Vec<Command> {
        if self.accelerometer == enabled {
            return Vec::new();
        }
        self.accelerometer = enabled;
        if enabled {
            vec![Command::accelerometer(true)]
        } else {
            vec![
                Command::accelerometer(false),
                Command::steering_value(STEERING_CENTER),
            ]
        }
    }

    pub fn gear(&self) -> Option<Gear> {
        self.gear
    }

    pub fn turn_signal(&self) -> Option<TurnSignal> {
        self.turn_signal
    }

    pub fn is_on(&self, toggle: Toggle) -> bool {
        self.toggles[toggle.index()]
    }

    pub fn accelerometer_enabled(&self) -> bool {
        self.accelerometer
    }
}

/// Streaming decoder splitting received bytes into newline-terminated lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Add received data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line
    ///
    /// Returns `Ok(None)` when no complete line is buffered. Blank lines are
    /// skipped; surrounding whitespace (including `\r`) is trimmed. An
    /// unterminated run longer than [`MAX_LINE_LEN`] is discarded.
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == DELIMITER) else {
                if self.buffer.len() > MAX_LINE_LEN {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Err(CodecError::LineTooLong(len));
                }
                return Ok(None);
            };

            let raw = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw[..pos]).trim().to_string();
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }
}
