//! Local tamper-evident evidence ledger.
//!
//! Entries live in SQLite. Each entry hashes its JSON payload together with the
//! previous entry hash and is signed with the device's Ed25519 key, so edits,
//! deletions and reordering are detectable by re-walking the chain.

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::chain::{hash_entry, sign_entry, verify_entry_signature, verifying_key_from_hex};
use crate::evidence::{ContentHandle, Ledger, LedgerReceipt};

/// Signed payload of one ledger entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerPayload {
    pub identity: String,
    pub sequence: u64,
    pub content_handle: String,
    pub label: String,
    pub created_at: i64,
}

pub struct SealedLedger {
    conn: Mutex<Connection>,
    signing_key: SigningKey,
    identity: String,
}

impl SealedLedger {
    pub fn open(db_path: impl AsRef<Path>, signing_key: SigningKey) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("open ledger {}", db_path.display()))?;
        ensure_schema(&conn)?;
        let identity = hex::encode(signing_key.verifying_key().to_bytes());
        conn.execute(
            "INSERT OR IGNORE INTO ledger_identities(public_key) VALUES (?1)",
            params![identity],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            signing_key,
            identity,
        })
    }

    /// Hex-encoded verifying key entries are signed with.
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS ledger_identities (
          public_key TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS evidence_entries (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          created_at INTEGER NOT NULL,
          identity TEXT NOT NULL,
          sequence INTEGER NOT NULL,
          payload_json TEXT NOT NULL,
          prev_hash BLOB NOT NULL,
          entry_hash BLOB NOT NULL,
          signature BLOB NOT NULL,
          UNIQUE(identity, sequence)
        );
        "#,
    )?;
    Ok(())
}

impl Ledger for SealedLedger {
    fn name(&self) -> &'static str {
        "sealed"
    }

    fn notarize(&self, content: &ContentHandle, label: &str) -> Result<LedgerReceipt> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("ledger connection lock poisoned"))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence) + 1, 0) FROM evidence_entries WHERE identity = ?1",
            params![self.identity],
            |row| row.get(0),
        )?;
        let prev_hash = match tx
            .query_row(
                "SELECT entry_hash FROM evidence_entries ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
        {
            Some(bytes) => to_array::<32>(&bytes, "entry_hash")?,
            None => [0u8; 32],
        };

        let payload = LedgerPayload {
            identity: self.identity.clone(),
            sequence: sequence as u64,
            content_handle: content.to_string(),
            label: label.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        let payload_json = serde_json::to_string(&payload)?;
        let entry_hash = hash_entry(&prev_hash, payload_json.as_bytes());
        let signature = sign_entry(&self.signing_key, &entry_hash);

        tx.execute(
            r#"
            INSERT INTO evidence_entries(created_at, identity, sequence, payload_json, prev_hash, entry_hash, signature)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                payload.created_at,
                self.identity,
                sequence,
                payload_json,
                prev_hash.to_vec(),
                entry_hash.to_vec(),
                signature.to_vec()
            ],
        )?;
        let row_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(LedgerReceipt {
            tx_handle: hex::encode(entry_hash),
            sequence: payload.sequence,
            block: Some(row_id as u64),
        })
    }
}

/// One verified ledger row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i64,
    pub entry_hash: [u8; 32],
    pub payload: LedgerPayload,
}

/// Re-walk the whole chain, checking links, hashes and signatures.
///
/// With `expected` set, every entry must be signed by that key; otherwise each
/// entry is checked against the identity recorded for it, which must be one of
/// the ledger's registered identities.
pub fn verify_chain<F>(conn: &Connection, expected: Option<&VerifyingKey>, mut on_entry: F) -> Result<u64>
where
    F: FnMut(&LedgerEntry),
{
    let registered = registered_identities(conn)?;
    let mut stmt = conn.prepare(
        "SELECT id, identity, sequence, payload_json, prev_hash, entry_hash, signature FROM evidence_entries ORDER BY id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut expected_prev = [0u8; 32];
    let mut count = 0u64;

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let identity: String = row.get(1)?;
        let sequence: i64 = row.get(2)?;
        let payload_json: String = row.get(3)?;
        let prev_hash = to_array::<32>(&row.get::<_, Vec<u8>>(4)?, "prev_hash")?;
        let entry_hash = to_array::<32>(&row.get::<_, Vec<u8>>(5)?, "entry_hash")?;
        let signature = to_array::<64>(&row.get::<_, Vec<u8>>(6)?, "signature")?;

        if prev_hash != expected_prev {
            return Err(anyhow!(
                "integrity check failed at id {}: prev_hash={}, expected_prev={}",
                id,
                hex::encode(prev_hash),
                hex::encode(expected_prev)
            ));
        }
        let computed = hash_entry(&expected_prev, payload_json.as_bytes());
        if computed != entry_hash {
            return Err(anyhow!(
                "integrity check failed at id {}: computed_hash={}, stored_hash={}",
                id,
                hex::encode(computed),
                hex::encode(entry_hash)
            ));
        }

        let key = match expected {
            Some(key) => {
                if hex::encode(key.to_bytes()) != identity {
                    return Err(anyhow!(
                        "integrity check failed at id {}: signed by unexpected identity {}",
                        id,
                        identity
                    ));
                }
                *key
            }
            None => {
                if !registered.contains(&identity) {
                    return Err(anyhow!(
                        "integrity check failed at id {}: unregistered identity {}",
                        id,
                        identity
                    ));
                }
                verifying_key_from_hex(&identity)?
            }
        };
        if verify_entry_signature(&key, &entry_hash, &signature).is_err() {
            return Err(anyhow!(
                "integrity check failed at id {}: signature mismatch (stored={})",
                id,
                hex::encode(signature)
            ));
        }

        let payload: LedgerPayload = serde_json::from_str(&payload_json)
            .with_context(|| format!("corrupt payload at id {}", id))?;
        if payload.identity != identity || payload.sequence as i64 != sequence {
            return Err(anyhow!(
                "integrity check failed at id {}: payload does not match row metadata",
                id
            ));
        }

        on_entry(&LedgerEntry {
            id,
            entry_hash,
            payload,
        });
        expected_prev = entry_hash;
        count += 1;
    }

    Ok(count)
}

fn registered_identities(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT public_key FROM ledger_identities")?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

fn to_array<const N: usize>(bytes: &[u8], column: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        anyhow!(
            "corrupt ledger: {} is {} bytes, expected {}",
            column,
            bytes.len(),
            N
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::signing_key_from_seed;

    fn handle(s: &str) -> ContentHandle {
        ContentHandle::new(s).unwrap()
    }

    #[test]
    fn sequences_increase_per_identity() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ledger.db");
        let ledger = SealedLedger::open(&db, signing_key_from_seed("unit-a").unwrap()).unwrap();
        let first = ledger.notarize(&handle("QmFirst"), "a.iclip").unwrap();
        let second = ledger.notarize(&handle("QmSecond"), "b.iclip").unwrap();
        assert_eq!((first.sequence, second.sequence), (0, 1));
        assert_ne!(first.tx_handle, second.tx_handle);

        let other = SealedLedger::open(&db, signing_key_from_seed("unit-b").unwrap()).unwrap();
        assert_eq!(other.notarize(&handle("QmThird"), "c.iclip").unwrap().sequence, 0);

        let conn = Connection::open(&db).unwrap();
        assert_eq!(verify_chain(&conn, None, |_| {}).unwrap(), 3);
    }

    #[test]
    fn tampered_payload_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ledger.db");
        let key = signing_key_from_seed("unit-a").unwrap();
        let ledger = SealedLedger::open(&db, key.clone()).unwrap();
        ledger.notarize(&handle("QmFirst"), "a.iclip").unwrap();
        ledger.notarize(&handle("QmSecond"), "b.iclip").unwrap();

        let conn = Connection::open(&db).unwrap();
        conn.execute(
            "UPDATE evidence_entries SET payload_json = replace(payload_json, 'QmFirst', 'QmForged') WHERE id = 1",
            [],
        )
        .unwrap();
        let err = verify_chain(&conn, Some(&key.verifying_key()), |_| {}).unwrap_err();
        assert!(err.to_string().contains("id 1"), "{}", err);
    }
}
