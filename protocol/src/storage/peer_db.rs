//! # Persistent Peer Set
//!
//! Stores the announced addresses of known, non-blacklisted peers across
//! restarts in a sled tree. The gossip discovery worker diffs the live
//! registry against this set and applies inserts and deletes, so the
//! stored set tracks the registry without ever being rewritten wholesale.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

/// Errors from the peer database.
#[derive(Debug, Error)]
pub enum PeerDbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("stored peer address is not valid UTF-8")]
    Encoding,
}

/// Sled-backed set of announced peer addresses.
pub struct PeerDb {
    // Held so the database outlives the tree handle.
    _db: sled::Db,
    peers: sled::Tree,
}

impl PeerDb {
    /// Opens or creates the peer database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PeerDbError> {
        let db = sled::open(path)?;
        let peers = db.open_tree("peers")?;
        Ok(Self { _db: db, peers })
    }

    /// Opens an in-memory database that disappears on drop. For tests.
    pub fn open_temporary() -> Result<Self, PeerDbError> {
        let db = sled::Config::new().temporary(true).open()?;
        let peers = db.open_tree("peers")?;
        Ok(Self { _db: db, peers })
    }

    /// All stored peer addresses.
    pub fn load_peers(&self) -> Result<Vec<String>, PeerDbError> {
        let mut out = Vec::new();
        for entry in self.peers.iter() {
            let (key, _) = entry?;
            let address = String::from_utf8(key.to_vec()).map_err(|_| PeerDbError::Encoding)?;
            out.push(address);
        }
        Ok(out)
    }

    /// Inserts addresses. Existing entries are untouched.
    pub fn add_peers<I, S>(&self, addresses: I) -> Result<(), PeerDbError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for address in addresses {
            self.peers.insert(address.as_ref().as_bytes(), Vec::<u8>::new())?;
        }
        Ok(())
    }

    /// Removes addresses. Missing entries are ignored.
    pub fn delete_peers<I, S>(&self, addresses: I) -> Result<(), PeerDbError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for address in addresses {
            self.peers.remove(address.as_ref().as_bytes())?;
        }
        Ok(())
    }

    /// Replaces the stored set with `current`: deletes what disappeared,
    /// inserts what is new. Returns (inserted, deleted) counts.
    pub fn sync(&self, current: &[String]) -> Result<(usize, usize), PeerDbError> {
        let old: Vec<String> = self.load_peers()?;
        let to_delete: Vec<&String> = old.iter().filter(|a| !current.contains(a)).collect();
        let to_insert: Vec<&String> = current.iter().filter(|a| !old.contains(a)).collect();

        let deleted = to_delete.len();
        let inserted = to_insert.len();
        self.delete_peers(to_delete)?;
        self.add_peers(to_insert)?;

        if inserted > 0 || deleted > 0 {
            debug!(inserted, deleted, "peer database updated");
        }
        Ok((inserted, deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_load() {
        let db = PeerDb::open_temporary().expect("open");
        db.add_peers(["1.2.3.4:7774", "5.6.7.8"]).expect("add");

        let mut peers = db.load_peers().expect("load");
        peers.sort();
        assert_eq!(peers, vec!["1.2.3.4:7774", "5.6.7.8"]);
    }

    #[test]
    fn add_is_idempotent() {
        let db = PeerDb::open_temporary().expect("open");
        db.add_peers(["1.2.3.4"]).expect("add");
        db.add_peers(["1.2.3.4"]).expect("add again");
        assert_eq!(db.load_peers().expect("load").len(), 1);
    }

    #[test]
    fn delete_removes_entries() {
        let db = PeerDb::open_temporary().expect("open");
        db.add_peers(["a.example", "b.example"]).expect("add");
        db.delete_peers(["a.example", "missing.example"]).expect("delete");
        assert_eq!(db.load_peers().expect("load"), vec!["b.example"]);
    }

    #[test]
    fn sync_applies_diff() {
        let db = PeerDb::open_temporary().expect("open");
        db.add_peers(["old.example", "kept.example"]).expect("add");

        let current = vec!["kept.example".to_string(), "new.example".to_string()];
        let (inserted, deleted) = db.sync(&current).expect("sync");
        assert_eq!((inserted, deleted), (1, 1));

        let mut peers = db.load_peers().expect("load");
        peers.sort();
        assert_eq!(peers, vec!["kept.example", "new.example"]);
    }
}
