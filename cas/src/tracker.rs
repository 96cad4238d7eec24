//! Durable local mapping from a 20-byte git hash to a CAS address.
//!
//! Single-writer, transactionally batched on top of an embedded `sqlite`
//! database. The engines are expected to serialize their own access; the
//! Tracker does not take an internal lock.

use std::path::Path;

use sqlite::State;

use crate::cas::Address;
use crate::error::{Error, Result};
use crate::git::Oid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracked (
    hash TEXT PRIMARY KEY,
    address TEXT NOT NULL
);
";

/// Number of `put`s folded into one transaction before it is proactively
/// committed and a fresh one opened. Keeps the open transaction bounded
/// without needing to inspect daemon-specific size limits up front.
const BATCH_SIZE: usize = 512;

pub struct Tracker {
    conn: sqlite::Connection,
    pending: usize,
    in_transaction: bool,
}

impl Tracker {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = sqlite::open(path)
            .map_err(|e| Error::TrackerError(format!("opening {}: {e}", path.display())))?;
        conn.execute(SCHEMA)
            .map_err(|e| Error::TrackerError(e.to_string()))?;
        Ok(Tracker {
            conn,
            pending: 0,
            in_transaction: false,
        })
    }

    pub fn get(&self, hash: Oid) -> Result<Option<Address>> {
        let mut stmt = self
            .conn
            .prepare("SELECT address FROM tracked WHERE hash = ?")
            .map_err(|e| Error::TrackerError(e.to_string()))?;
        stmt.bind((1, hash.to_hex().as_str()))
            .map_err(|e| Error::TrackerError(e.to_string()))?;
        match stmt.next().map_err(|e| Error::TrackerError(e.to_string()))? {
            State::Row => {
                let address: String = stmt
                    .read(0)
                    .map_err(|e| Error::TrackerError(e.to_string()))?;
                Ok(Some(Address(address)))
            }
            State::Done => Ok(None),
        }
    }

    /// Record a promise that `hash`'s bytes live at `address`. Keeps the
    /// first recorded address for a hash (see DESIGN.md, Open Question).
    pub fn put(&mut self, hash: Oid, address: &Address) -> Result<()> {
        self.ensure_transaction()?;
        match self.insert(hash, address) {
            Ok(()) => {
                self.pending += 1;
                if self.pending >= BATCH_SIZE {
                    self.flush()?;
                }
                Ok(())
            }
            Err(e) if is_transaction_too_large(&e) => {
                self.flush()?;
                self.ensure_transaction()?;
                self.insert(hash, address).map_err(|e| {
                    Error::TrackerError(format!("put retry after flush failed: {e}"))
                })?;
                self.pending += 1;
                Ok(())
            }
            Err(e) => Err(Error::TrackerError(e.to_string())),
        }
    }

    fn insert(&self, hash: Oid, address: &Address) -> std::result::Result<(), sqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO tracked (hash, address) VALUES (?, ?)")?;
        stmt.bind((1, hash.to_hex().as_str()))?;
        stmt.bind((2, address.0.as_str()))?;
        while stmt.next()? != State::Done {}
        Ok(())
    }

    fn ensure_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn
                .execute("BEGIN")
                .map_err(|e| Error::TrackerError(e.to_string()))?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn
                .execute("COMMIT")
                .map_err(|e| Error::TrackerError(e.to_string()))?;
            self.in_transaction = false;
            self.pending = 0;
        }
        Ok(())
    }

    /// Commits any open transaction, then drops the connection. Must be
    /// called on all exit paths.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

fn is_transaction_too_large(e: &sqlite::Error) -> bool {
    e.to_string().to_lowercase().contains("full")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(dir.path().join("tracker.db")).unwrap();
        let hash = crate::git::hash_of(crate::git::Kind::Blob, b"nope");
        assert!(tracker.get(hash).unwrap().is_none());
    }

    #[test]
    fn put_then_get_round_trips_and_close_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");
        let hash = crate::git::hash_of(crate::git::Kind::Blob, b"hello");
        let addr = Address("bagit1rawsha1deadbeef".into());

        let mut tracker = Tracker::open(&path).unwrap();
        tracker.put(hash, &addr).unwrap();
        assert_eq!(tracker.get(hash).unwrap(), Some(addr.clone()));
        tracker.close().unwrap();

        let reopened = Tracker::open(&path).unwrap();
        assert_eq!(reopened.get(hash).unwrap(), Some(addr));
    }

    #[test]
    fn put_keeps_first_address_for_a_hash() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = Tracker::open(dir.path().join("tracker.db")).unwrap();
        let hash = crate::git::hash_of(crate::git::Kind::Blob, b"dup");
        let first = Address("first".into());
        let second = Address("second".into());

        tracker.put(hash, &first).unwrap();
        tracker.put(hash, &second).unwrap();

        assert_eq!(tracker.get(hash).unwrap(), Some(first));
    }
}
