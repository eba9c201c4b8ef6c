//! Simulated vehicle state driven by command tokens

use rc_link_shared::codec::{MAX_VALUE, STEERING_CENTER};
use rc_link_shared::{Gear, Toggle, TurnSignal};

/// Outcome of applying one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Changed(String),
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    pub steering: u8,
    pub throttle: u8,
    pub gear: Gear,
    pub turn_signal: Option<TurnSignal>,
    pub toggles: [bool; 4],
    pub horn: bool,
    pub accelerometer: bool,
    pub battery: u8,
}

impl Default for Vehicle {
    fn default() -> Self {
        Self {
            steering: STEERING_CENTER,
            throttle: 0,
            gear: Gear::Neutral,
            turn_signal: None,
            toggles: [false; 4],
            horn: false,
            accelerometer: false,
            battery: 100,
        }
    }
}

fn two_digits(rest: &str) -> Option<u8> {
    if rest.len() != 2 || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok().filter(|v| *v <= MAX_VALUE)
}

impl Vehicle {
    pub fn apply(&mut self, token: &str) -> Applied {
        let changed = match token {
            "N" => self.set_gear(Gear::Neutral),
            "R" => self.set_gear(Gear::Reverse),
            "D" => self.set_gear(Gear::Drive),
            "LTL" => self.press_signal(TurnSignal::Left),
            "RTL" => self.press_signal(TurnSignal::Right),
            "ALL" => self.press_signal(TurnSignal::Hazard),
            "HOR" => {
                self.horn = true;
                "horn on".to_string()
            }
            "HOF" => {
                self.horn = false;
                "horn off".to_string()
            }
            "LHO" => "light horn".to_string(),
            "BT" => "menu".to_string(),
            "ACC1" | "ACC0" => {
                self.accelerometer = token == "ACC1";
                format!("accelerometer {}", if self.accelerometer { "on" } else { "off" })
            }
            _ => {
                if let Some(toggle) = Toggle::ALL.iter().find(|t| t.token() == token) {
                    return Applied::Changed(self.flip(*toggle));
                }
                if let Some(value) = token.strip_prefix('S').and_then(two_digits) {
                    self.steering = value;
                    format!("steering {}", value)
                } else if let Some(value) = token.strip_prefix('G').and_then(two_digits) {
                    self.throttle = value;
                    format!("throttle {}", value)
                } else {
                    return Applied::Unknown(token.to_string());
                }
            }
        };
        Applied::Changed(changed)
    }

    fn set_gear(&mut self, gear: Gear) -> String {
        self.gear = gear;
        format!("gear {:?}", gear)
    }

    fn press_signal(&mut self, signal: TurnSignal) -> String {
        self.turn_signal = if self.turn_signal == Some(signal) { None } else { Some(signal) };
        match self.turn_signal {
            Some(s) => format!("turn signal {:?}", s),
            None => "turn signal off".to_string(),
        }
    }

    fn flip(&mut self, toggle: Toggle) -> String {
        let Some(index) = Toggle::ALL.iter().position(|t| *t == toggle) else {
            return String::new();
        };
        self.toggles[index] = !self.toggles[index];
        format!("{:?} {}", toggle, if self.toggles[index] { "on" } else { "off" })
    }

    /// Drain one step; throttle drains faster
    pub fn drain(&mut self) -> u8 {
        let step = if self.throttle > 0 { 2 } else { 1 };
        self.battery = self.battery.saturating_sub(step);
        self.battery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driving_tokens() {
        let mut car = Vehicle::default();
        assert_eq!(car.apply("S00"), Applied::Changed("steering 0".into()));
        assert_eq!(car.apply("G75"), Applied::Changed("throttle 75".into()));
        car.apply("R");
        assert_eq!(car.gear, Gear::Reverse);
        assert_eq!(car.apply("S7"), Applied::Unknown("S7".into()));
        assert_eq!(car.apply("XYZ"), Applied::Unknown("XYZ".into()));
    }

    #[test]
    fn test_signals_and_toggles() {
        let mut car = Vehicle::default();
        car.apply("LTL");
        assert_eq!(car.turn_signal, Some(TurnSignal::Left));
        car.apply("RTL");
        assert_eq!(car.turn_signal, Some(TurnSignal::Right));
        car.apply("RTL");
        assert_eq!(car.turn_signal, None);

        car.apply("LIT");
        car.apply("LIT");
        car.apply("RGB");
        assert_eq!(car.toggles, [false, false, true, false]);
    }

    #[test]
    fn test_battery_drain_never_underflows() {
        let mut car = Vehicle {
            battery: 1,
            throttle: 50,
            ..Vehicle::default()
        };
        assert_eq!(car.drain(), 0);
        assert_eq!(car.drain(), 0);
    }
}
