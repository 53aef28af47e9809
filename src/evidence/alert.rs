//! Operator alerts.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::time::Duration;

use crate::evidence::{http, ContentHandle, LedgerReceipt};
use crate::site::Geolocation;
use crate::IncidentClass;

pub const LOCATION_UNKNOWN: &str = "Location unknown";

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";
const TINYURL_API: &str = "https://tinyurl.com/api-create.php";

/// "Deliver this text to this recipient."
pub trait Messenger: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the provider's delivery id.
    fn send(&self, recipient: &str, body: &str) -> Result<String>;
}

/// Writes alerts to the log instead of delivering them.
pub struct LogMessenger;

impl Messenger for LogMessenger {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&self, recipient: &str, body: &str) -> Result<String> {
        log::warn!("alert for {}:\n{}", recipient, body);
        Ok(format!("log-{}", Local::now().timestamp_millis()))
    }
}

/// Twilio Programmable Messaging (SMS).
pub struct TwilioMessenger {
    agent: ureq::Agent,
    account_sid: String,
    auth_token: String,
    from: String,
}

#[derive(Deserialize)]
struct TwilioMessage {
    sid: String,
}

impl TwilioMessenger {
    pub fn new(account_sid: String, auth_token: String, from: String, timeout: Duration) -> Self {
        Self {
            agent: http::agent(timeout),
            account_sid,
            auth_token,
            from,
        }
    }

    fn authorization(&self) -> String {
        let credentials = format!("{}:{}", self.account_sid, self.auth_token);
        format!("Basic {}", BASE64.encode(credentials))
    }
}

impl Messenger for TwilioMessenger {
    fn name(&self) -> &'static str {
        "twilio"
    }

    fn send(&self, recipient: &str, body: &str) -> Result<String> {
        let url = format!("{}/Accounts/{}/Messages.json", TWILIO_API, self.account_sid);
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &self.authorization())
            .send_form(&[("To", recipient), ("From", &self.from), ("Body", body)])
            .map_err(|e| http::describe("twilio", e))?;
        let message: TwilioMessage = response
            .into_json()
            .context("twilio response was not the expected JSON")?;
        Ok(message.sid)
    }
}

/// Turns long map links into short ones.
pub trait LinkShortener: Send + Sync {
    fn shorten(&self, long_url: &str) -> Result<String>;
}

pub struct TinyUrl {
    agent: ureq::Agent,
}

impl TinyUrl {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: http::agent(timeout),
        }
    }
}

impl LinkShortener for TinyUrl {
    fn shorten(&self, long_url: &str) -> Result<String> {
        let url = url::Url::parse_with_params(TINYURL_API, &[("url", long_url)])?;
        let text = self
            .agent
            .request_url("GET", &url)
            .call()
            .map_err(|e| http::describe("tinyurl", e))?
            .into_string()
            .context("read tinyurl response")?;
        let short = text.trim();
        if !short.starts_with("http") {
            return Err(anyhow!("tinyurl returned {:?}", short));
        }
        Ok(short.to_string())
    }
}

/// Map line for the alert: a (shortened when possible) map link, or the
/// unknown-location placeholder.
pub fn map_line(location: Option<&Geolocation>, shortener: Option<&dyn LinkShortener>) -> String {
    let Some(location) = location else {
        return LOCATION_UNKNOWN.to_string();
    };
    let long_url = location.map_url();
    match shortener {
        Some(shortener) => shortener.shorten(&long_url).unwrap_or_else(|e| {
            log::warn!("link shortening failed, using long link: {:#}", e);
            long_url
        }),
        None => long_url,
    }
}

pub fn compose_alert(
    class: IncidentClass,
    at: &DateTime<Local>,
    map_line: &str,
    content: &ContentHandle,
    ledger: Option<&LedgerReceipt>,
) -> String {
    format!(
        "ALERT: {} detected!\nTime: {}\nMap: {}\nHash: {}\nLedger: {}",
        class,
        at.format("%Y-%m-%d %H:%M:%S"),
        map_line,
        content,
        ledger
            .map(|r| r.tx_handle.as_str())
            .unwrap_or("not notarized")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct BrokenShortener;

    impl LinkShortener for BrokenShortener {
        fn shorten(&self, _long_url: &str) -> Result<String> {
            Err(anyhow!("offline"))
        }
    }

    #[test]
    fn alert_lists_every_field() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let handle = ContentHandle::new("QmEvidence").unwrap();
        let receipt = LedgerReceipt {
            tx_handle: "0xabc".into(),
            sequence: 4,
            block: Some(9),
        };
        let text = compose_alert(
            IncidentClass::Fire,
            &at,
            "https://tinyurl.com/x",
            &handle,
            Some(&receipt),
        );
        assert_eq!(
            text,
            "ALERT: Fire detected!\nTime: 2024-05-01 08:30:00\nMap: https://tinyurl.com/x\nHash: QmEvidence\nLedger: 0xabc"
        );
    }

    #[test]
    fn alert_without_notarization_says_so() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let handle = ContentHandle::new("QmEvidence").unwrap();
        let text = compose_alert(IncidentClass::Collision, &at, LOCATION_UNKNOWN, &handle, None);
        assert!(text.contains("Map: Location unknown"));
        assert!(text.ends_with("Ledger: not notarized"));
    }

    #[test]
    fn map_line_falls_back_to_long_link() {
        let loc = Geolocation::new(12.5, 77.25).unwrap();
        let line = map_line(Some(&loc), Some(&BrokenShortener));
        assert_eq!(line, "https://www.google.com/maps?q=12.5,77.25");
        assert_eq!(map_line(None, Some(&BrokenShortener)), LOCATION_UNKNOWN);
    }

    #[test]
    fn twilio_uses_basic_auth() {
        let messenger = TwilioMessenger::new(
            "AC123".into(),
            "secret".into(),
            "+15550001111".into(),
            Duration::from_secs(1),
        );
        assert_eq!(messenger.authorization(), "Basic QUMxMjM6c2VjcmV0");
    }
}
