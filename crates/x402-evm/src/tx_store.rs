//! Persistent transaction tracking.
//!
//! A single `transactions` table backs the finality confirmer: the settler
//! inserts records in `pending`, the confirmer advances them monotonically
//! toward `confirmed` or `failed`. Terminal records are never revisited.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::FacilitatorError;
use crate::response::SettlementStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: String,
    pub tx_hash: String,
    pub tx_hash_fee: Option<String>,
    /// Network slug the transaction was broadcast on.
    pub chain: String,
    pub status: SettlementStatus,
    pub confirmations: u64,
    pub confirmed_at: Option<i64>,
}

impl TransactionRecord {
    /// A fresh `pending` record with a random identifier.
    pub fn pending(tx_hash: &str, tx_hash_fee: Option<&str>, chain: &str) -> Self {
        let mut suffix = [0u8; 12];
        rand::fill(&mut suffix);
        Self {
            id: format!("stl_{}", alloy::hex::encode(suffix)),
            tx_hash: tx_hash.to_string(),
            tx_hash_fee: tx_hash_fee.map(String::from),
            chain: chain.to_string(),
            status: SettlementStatus::Pending,
            confirmations: 0,
            confirmed_at: None,
        }
    }
}

pub struct TransactionStore {
    conn: Mutex<Connection>,
}

impl TransactionStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &str) -> Result<Self, FacilitatorError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                tx_hash TEXT NOT NULL,
                tx_hash_fee TEXT,
                chain TEXT NOT NULL,
                status TEXT NOT NULL,
                confirmations INTEGER NOT NULL DEFAULT 0,
                confirmed_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status);
            PRAGMA journal_mode=WAL;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, FacilitatorError> {
        self.conn
            .lock()
            .map_err(|_| FacilitatorError::Store("transaction store lock poisoned".to_string()))
    }

    pub fn insert(&self, record: &TransactionRecord) -> Result<(), FacilitatorError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO transactions
                 (id, tx_hash, tx_hash_fee, chain, status, confirmations, confirmed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.tx_hash,
                record.tx_hash_fee,
                record.chain,
                record.status.as_str(),
                record.confirmations as i64,
                record.confirmed_at,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Non-terminal records for the confirmer sweep, oldest first, capped.
    pub fn sweepable(&self, limit: u32) -> Result<Vec<TransactionRecord>, FacilitatorError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, tx_hash, tx_hash_fee, chain, status, confirmations, confirmed_at
             FROM transactions
             WHERE status IN ('pending', 'partial_settlement')
             ORDER BY created_at ASC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                let status: String = row.get(4)?;
                Ok(TransactionRecord {
                    id: row.get(0)?,
                    tx_hash: row.get(1)?,
                    tx_hash_fee: row.get(2)?,
                    chain: row.get(3)?,
                    status: SettlementStatus::parse(&status)
                        .unwrap_or(SettlementStatus::Pending),
                    confirmations: row.get::<_, i64>(5)? as u64,
                    confirmed_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Refresh the confirmation count of a non-terminal record.
    pub fn update_confirmations(
        &self,
        id: &str,
        confirmations: u64,
    ) -> Result<(), FacilitatorError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE transactions SET confirmations = ?2
             WHERE id = ?1 AND status IN ('pending', 'partial_settlement')",
            params![id, confirmations as i64],
        )?;
        Ok(())
    }

    /// Move a record to a non-terminal status (`partial_settlement`).
    pub fn update_status(
        &self,
        id: &str,
        status: SettlementStatus,
        confirmations: u64,
    ) -> Result<(), FacilitatorError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE transactions SET status = ?2, confirmations = ?3
             WHERE id = ?1 AND status IN ('pending', 'partial_settlement')",
            params![id, status.as_str(), confirmations as i64],
        )?;
        Ok(())
    }

    /// Finalize a record. Guarded so terminal records can never move again.
    pub fn mark_terminal(
        &self,
        id: &str,
        status: SettlementStatus,
        confirmations: u64,
    ) -> Result<(), FacilitatorError> {
        if !status.is_terminal() {
            return Err(FacilitatorError::Store(format!(
                "{} is not a terminal status",
                status.as_str()
            )));
        }
        let conn = self.lock()?;
        conn.execute(
            "UPDATE transactions SET status = ?2, confirmations = ?3, confirmed_at = ?4
             WHERE id = ?1 AND status IN ('pending', 'partial_settlement')",
            params![
                id,
                status.as_str(),
                confirmations as i64,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<TransactionRecord>, FacilitatorError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, tx_hash, tx_hash_fee, chain, status, confirmations, confirmed_at
                 FROM transactions WHERE id = ?1",
                params![id],
                |row| {
                    let status: String = row.get(4)?;
                    Ok(TransactionRecord {
                        id: row.get(0)?,
                        tx_hash: row.get(1)?,
                        tx_hash_fee: row.get(2)?,
                        chain: row.get(3)?,
                        status: SettlementStatus::parse(&status)
                            .unwrap_or(SettlementStatus::Pending),
                        confirmations: row.get::<_, i64>(5)? as u64,
                        confirmed_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}
