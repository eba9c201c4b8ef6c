//! NetworkManager backend driving `nmcli` in terse mode

use crate::scanning::RawNetwork;
use crate::transport::wifi::radio::{RadioError, WifiRadio};
use async_trait::async_trait;
use std::io;
use tokio::process::Command;
use tracing::debug;

pub struct NmcliRadio {
    program: String,
}

impl Default for NmcliRadio {
    fn default() -> Self {
        Self::new("nmcli")
    }
}

impl NmcliRadio {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<String, RadioError> {
        debug!("[WiFi] {} {}", self.program, redact(args).join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => RadioError::Unavailable(format!("{} not found", self.program)),
                io::ErrorKind::PermissionDenied => RadioError::PermissionDenied(e.to_string()),
                _ => RadioError::Failed(e.to_string()),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(&stderr))
    }
}

#[async_trait]
impl WifiRadio for NmcliRadio {
    async fn is_enabled(&self) -> Result<bool, RadioError> {
        let out = self.run(&["radio", "wifi"]).await?;
        Ok(out.trim() == "enabled")
    }

    async fn scan(&self) -> Result<Vec<RawNetwork>, RadioError> {
        let out = self
            .run(&["-t", "-f", "SSID,SIGNAL,FREQ,SECURITY", "device", "wifi", "list", "--rescan", "yes"])
            .await?;
        Ok(parse_scan_output(&out))
    }

    async fn associate(&self, ssid: &str, passphrase: Option<&str>) -> Result<(), RadioError> {
        let mut args = vec!["device", "wifi", "connect", ssid];
        if let Some(passphrase) = passphrase {
            args.extend(["password", passphrase]);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn current_ssid(&self) -> Result<Option<String>, RadioError> {
        let out = self.run(&["-t", "-f", "ACTIVE,SSID", "device", "wifi"]).await?;
        Ok(parse_active_ssid(&out))
    }

    async fn release(&self, ssid: &str) -> Result<(), RadioError> {
        self.run(&["connection", "down", "id", ssid]).await.map(|_| ())
    }
}

fn redact<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for &arg in args {
        out.push(if hide_next { "****" } else { arg });
        hide_next = arg == "password";
    }
    out
}

fn classify_failure(stderr: &str) -> RadioError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("insufficient privileges") || lower.contains("not authorized") {
        RadioError::PermissionDenied(stderr.to_string())
    } else if lower.contains("radio is disabled") || lower.contains("wi-fi is disabled") {
        RadioError::Disabled
    } else if lower.contains("networkmanager is not running") {
        RadioError::Unavailable(stderr.to_string())
    } else {
        RadioError::Failed(stderr.to_string())
    }
}

/// Split a terse-mode line on unescaped `:`
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.extend(chars.next()),
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// NetworkManager reports quality in percent; map it onto dBm
fn quality_to_dbm(quality: u32) -> i32 {
    (quality.min(100) as i32) / 2 - 100
}

fn parse_scan_output(out: &str) -> Vec<RawNetwork> {
    out.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields = split_terse(line);
            let [ssid, signal, freq, security] = fields.as_slice() else {
                debug!("[WiFi] skipping malformed scan line: {}", line);
                return None;
            };
            let quality = signal.trim().parse::<u32>().ok()?;
            let frequency_mhz = freq
                .split_whitespace()
                .next()
                .and_then(|f| f.parse::<u32>().ok())
                .unwrap_or_default();
            let capabilities = match security.trim() {
                "--" | "" => String::new(),
                other => other.to_string(),
            };
            Some(RawNetwork {
                ssid: ssid.clone(),
                level_dbm: quality_to_dbm(quality),
                frequency_mhz,
                capabilities,
            })
        })
        .collect()
}

fn parse_active_ssid(out: &str) -> Option<String> {
    out.lines().find_map(|line| {
        let fields = split_terse(line);
        match fields.as_slice() {
            [active, ssid] if active == "yes" && !ssid.is_empty() => Some(ssid.clone()),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_output() {
        let out = "RC_Car_WiFi:90:2437 MHz:--\nHome\\:Net:40:5180 MHz:WPA2\n:70:2412 MHz:WPA1 WPA2\nbroken line\n";
        let networks = parse_scan_output(out);
        assert_eq!(networks.len(), 3);

        assert_eq!(networks[0].ssid, "RC_Car_WiFi");
        assert_eq!(networks[0].level_dbm, -55);
        assert_eq!(networks[0].frequency_mhz, 2437);
        assert_eq!(networks[0].capabilities, "");

        assert_eq!(networks[1].ssid, "Home:Net");
        assert_eq!(networks[1].level_dbm, -80);
        assert_eq!(networks[1].capabilities, "WPA2");

        // Hidden networks are left for classification to drop
        assert_eq!(networks[2].ssid, "");
    }

    #[test]
    fn test_parse_active_ssid() {
        let out = "no:Neighbour\nyes:RC_Car_WiFi\n";
        assert_eq!(parse_active_ssid(out), Some("RC_Car_WiFi".into()));
        assert_eq!(parse_active_ssid("no:Neighbour\n"), None);
    }

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            classify_failure("Error: Insufficient privileges."),
            RadioError::PermissionDenied(_)
        ));
        assert!(matches!(classify_failure("Error: No network with SSID 'x' found."), RadioError::Failed(_)));
    }

    #[test]
    fn test_password_is_redacted() {
        let args = ["device", "wifi", "connect", "car", "password", "hunter22"];
        assert_eq!(redact(&args), vec!["device", "wifi", "connect", "car", "password", "****"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let radio = NmcliRadio::new("/nonexistent/nmcli");
        assert!(matches!(radio.is_enabled().await, Err(RadioError::Unavailable(_))));
    }
}
