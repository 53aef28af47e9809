use anyhow::anyhow;
use std::time::Duration;

/// Longest response body quoted in an error.
const MAX_ERROR_BODY: usize = 256;

/// HTTP agent whose every request is bounded by `timeout`.
pub fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(concat!("incident-witness/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Turn a ureq error into one line, keeping the status and a short body.
pub(crate) fn describe(service: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let mut body = response.into_string().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            anyhow!("{} returned HTTP {}: {}", service, code, body.trim())
        }
        ureq::Error::Transport(transport) => anyhow!("{} unreachable: {}", service, transport),
    }
}
