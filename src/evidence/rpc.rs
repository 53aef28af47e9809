//! Ethereum JSON-RPC ledger.
//!
//! Submits `storeEvidence(string,string)` from a node-managed account via
//! `eth_sendTransaction`, then polls for the receipt. The nonce is read with
//! `eth_getTransactionCount(.., "pending")` under a lock for every submission,
//! so concurrent finalizations never share one.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::evidence::{http, ContentHandle, Ledger, LedgerReceipt};

/// `bytes4(keccak256("storeEvidence(string,string)"))`
pub const STORE_EVIDENCE_SELECTOR: [u8; 4] = [0x53, 0x62, 0x1b, 0x69];
pub const DEFAULT_GAS: u64 = 2_000_000;
/// 50 gwei.
pub const DEFAULT_GAS_PRICE_WEI: u128 = 50_000_000_000;

#[derive(Clone, Debug)]
pub struct RpcLedgerConfig {
    pub rpc_url: String,
    pub contract: String,
    pub from: String,
    pub selector: [u8; 4],
    pub gas: u64,
    pub gas_price_wei: u128,
    /// Bound on each HTTP call and on the wait for inclusion.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

pub struct RpcLedger {
    agent: ureq::Agent,
    config: RpcLedgerConfig,
    submit_lock: Mutex<()>,
    request_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(config: RpcLedgerConfig) -> Result<Self> {
        url::Url::parse(&config.rpc_url)
            .with_context(|| format!("invalid rpc url {}", config.rpc_url))?;
        for (field, value) in [("contract", &config.contract), ("from", &config.from)] {
            parse_address(value).with_context(|| format!("invalid ledger.{}", field))?;
        }
        Ok(Self {
            agent: http::agent(config.timeout),
            config,
            submit_lock: Mutex::new(()),
            request_id: AtomicU64::new(1),
        })
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let response: Value = self
            .agent
            .post(&self.config.rpc_url)
            .send_json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .map_err(|e| http::describe("ledger rpc", e))?
            .into_json()
            .with_context(|| format!("{} response was not JSON", method))?;
        if let Some(err) = response.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(anyhow!("{} rejected: {}", method, message));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("{} response has no result", method))
    }

    fn submit(&self, data: &[u8]) -> Result<(u64, String)> {
        let _guard = self
            .submit_lock
            .lock()
            .map_err(|_| anyhow!("ledger submit lock poisoned"))?;
        let nonce = self.call(
            "eth_getTransactionCount",
            json!([self.config.from, "pending"]),
        )?;
        let nonce = parse_quantity(&nonce).context("eth_getTransactionCount")?;
        let tx_hash = self.call(
            "eth_sendTransaction",
            json!([{
                "from": self.config.from,
                "to": self.config.contract,
                "gas": format!("0x{:x}", self.config.gas),
                "gasPrice": format!("0x{:x}", self.config.gas_price_wei),
                "nonce": format!("0x{:x}", nonce),
                "data": format!("0x{}", hex::encode(data)),
            }]),
        )?;
        let tx_hash = tx_hash
            .as_str()
            .ok_or_else(|| anyhow!("eth_sendTransaction returned no hash"))?
            .to_string();
        Ok((nonce, tx_hash))
    }

    fn wait_for_receipt(&self, tx_hash: &str) -> Result<Option<u64>> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            let receipt = self.call("eth_getTransactionReceipt", json!([tx_hash]))?;
            if !receipt.is_null() {
                if let Some(status) = receipt.get("status") {
                    if parse_quantity(status)? == 0 {
                        return Err(anyhow!("transaction {} reverted", tx_hash));
                    }
                }
                return receipt
                    .get("blockNumber")
                    .filter(|v| !v.is_null())
                    .map(parse_quantity)
                    .transpose();
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "transaction {} not confirmed within {:?}",
                    tx_hash,
                    self.config.timeout
                ));
            }
            thread::sleep(self.config.poll_interval);
        }
    }
}

impl Ledger for RpcLedger {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn notarize(&self, content: &ContentHandle, label: &str) -> Result<LedgerReceipt> {
        let data = encode_string_call(self.config.selector, &[content.as_str(), label]);
        let (nonce, tx_hash) = self.submit(&data)?;
        log::info!("ledger transaction {} sent (nonce {})", tx_hash, nonce);
        let block = self.wait_for_receipt(&tx_hash)?;
        Ok(LedgerReceipt {
            tx_handle: tx_hash,
            sequence: nonce,
            block,
        })
    }
}

/// ABI-encode a call whose arguments are all `string`.
pub fn encode_string_call(selector: [u8; 4], args: &[&str]) -> Vec<u8> {
    let mut head = Vec::with_capacity(32 * args.len());
    let mut tail = Vec::new();
    let head_len = 32 * args.len() as u64;
    for arg in args {
        head.extend_from_slice(&word(head_len + tail.len() as u64));
        tail.extend_from_slice(&word(arg.len() as u64));
        tail.extend_from_slice(arg.as_bytes());
        let pad = (32 - arg.len() % 32) % 32;
        tail.extend(std::iter::repeat(0u8).take(pad));
    }
    let mut out = Vec::with_capacity(4 + head.len() + tail.len());
    out.extend_from_slice(&selector);
    out.extend_from_slice(&head);
    out.extend_from_slice(&tail);
    out
}

fn word(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Parse a JSON-RPC hex quantity such as `"0x1a"`.
fn parse_quantity(value: &Value) -> Result<u64> {
    let text = value
        .as_str()
        .ok_or_else(|| anyhow!("expected hex quantity, got {}", value))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("quantity {:?} lacks 0x prefix", text))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid quantity {:?}", text))
}

fn parse_address(value: &str) -> Result<[u8; 20]> {
    let digits = value
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("address {:?} lacks 0x prefix", value))?;
    let bytes = hex::decode(digits).map_err(|e| anyhow!("address {:?}: {}", value, e))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("address {:?} is not 20 bytes", value))
}

/// Parse `0x`-prefixed 4-byte selector.
pub fn parse_selector(value: &str) -> Result<[u8; 4]> {
    let digits = value.trim().trim_start_matches("0x");
    let bytes = hex::decode(digits).map_err(|e| anyhow!("selector {:?}: {}", value, e))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("selector {:?} is not 4 bytes", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_two_dynamic_strings() {
        let data = encode_string_call(STORE_EVIDENCE_SELECTOR, &["QmHash", "clip.iclip"]);
        assert_eq!(&data[..4], &STORE_EVIDENCE_SELECTOR);
        let body = &data[4..];
        // Two head words, then each string as length word + one padded word.
        assert_eq!(body.len(), 32 * 2 + 64 + 64);
        assert_eq!(body[31], 0x40);
        assert_eq!(body[63], 0x80);
        assert_eq!(body[64 + 31], 6);
        assert_eq!(&body[96..102], b"QmHash");
        assert!(body[102..128].iter().all(|b| *b == 0));
        assert_eq!(body[128 + 31], 10);
        assert_eq!(&body[160..170], b"clip.iclip");
    }

    #[test]
    fn long_strings_are_padded_to_words() {
        let long = "x".repeat(33);
        let data = encode_string_call(STORE_EVIDENCE_SELECTOR, &[&long, ""]);
        let body = &data[4..];
        // second offset = 64 + 32 (len) + 64 (two data words)
        assert_eq!(body[63], 160);
        assert_eq!(body.len(), 64 + 32 + 64 + 32);
    }

    #[test]
    fn parses_quantities() {
        assert_eq!(parse_quantity(&json!("0x1a")).unwrap(), 26);
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), 0);
        assert!(parse_quantity(&json!(26)).is_err());
        assert!(parse_quantity(&json!("1a")).is_err());
    }

    #[test]
    fn validates_addresses_and_selector() {
        assert!(parse_address("0x5FbDB2315678afecb367f032d93F642f64180aa3").is_ok());
        assert!(parse_address("5FbDB2315678afecb367f032d93F642f64180aa3").is_err());
        assert!(parse_address("0x1234").is_err());
        assert_eq!(parse_selector("0x53621b69").unwrap(), STORE_EVIDENCE_SELECTOR);
    }
}
