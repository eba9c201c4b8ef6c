//! Recently used WiFi control endpoints

use rc_link_shared::link::MAX_SAVED_CONNECTIONS;
use rc_link_shared::now_secs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedConnection {
    pub ip: String,
    pub port: u16,
    pub name: String,
    /// First saved, seconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default)]
    pub last_used: u64,
}

impl SavedConnection {
    pub fn new(ip: impl Into<String>, port: u16, name: Option<String>) -> Self {
        let ip = ip.into();
        let now = now_secs();
        Self {
            name: name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| default_name(&ip)),
            ip,
            port,
            timestamp: now,
            last_used: now,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    fn matches(&self, ip: &str, port: u16) -> bool {
        self.ip == ip && self.port == port
    }
}

pub fn default_name(ip: &str) -> String {
    format!("RC_Car_{ip}")
}

/// Ordered list, most recently added first, capped at
/// [`MAX_SAVED_CONNECTIONS`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedConnections(Vec<SavedConnection>);

impl SavedConnections {
    /// Insert at the front, replacing any entry for the same endpoint. Past
    /// the cap the least recently used entry is dropped.
    pub fn add(&mut self, connection: SavedConnection) {
        self.0.retain(|c| !c.matches(&connection.ip, connection.port));
        self.0.insert(0, connection);
        while self.0.len() > MAX_SAVED_CONNECTIONS {
            let Some(oldest) = self
                .0
                .iter()
                .enumerate()
                .skip(1)
                .min_by_key(|(_, c)| c.last_used)
                .map(|(i, _)| i)
            else {
                break;
            };
            self.0.remove(oldest);
        }
    }

    /// Refresh `last_used` and move the entry to the front; false when the
    /// endpoint is not saved
    pub fn touch(&mut self, ip: &str, port: u16) -> bool {
        let Some(index) = self.0.iter().position(|c| c.matches(ip, port)) else {
            return false;
        };
        let mut entry = self.0.remove(index);
        entry.last_used = now_secs().max(entry.last_used);
        self.0.insert(0, entry);
        true
    }

    /// Save a fresh connection, or touch an existing one. A given name
    /// replaces the stored one; `None` keeps it.
    pub fn record(&mut self, ip: &str, port: u16, name: Option<String>) {
        let name = name.filter(|n| !n.trim().is_empty());
        if self.touch(ip, port) {
            if let (Some(name), Some(entry)) = (name, self.0.first_mut()) {
                entry.name = name;
            }
            return;
        }
        self.add(SavedConnection::new(ip, port, name));
    }

    pub fn remove(&mut self, ip: &str, port: u16) -> bool {
        let before = self.0.len();
        self.0.retain(|c| !c.matches(ip, port));
        self.0.len() != before
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn find(&self, ip: &str, port: u16) -> Option<&SavedConnection> {
        self.0.iter().find(|c| c.matches(ip, port))
    }

    /// Entries ordered by `last_used`, newest first
    pub fn by_recent_use(&self) -> Vec<SavedConnection> {
        let mut list = self.0.clone();
        list.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        list
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
