//! Builds the human-navigable `content/`-style directory that mirrors a git
//! tree's file names on the CAS, as described in spec.md §3 ("The top-level
//! root itself is a directory that usually also contains a `content/`
//! directory mirroring the top-commit's tree file names") and used again,
//! per-commit, by the VFS post-pass (spec.md §4.3).
//!
//! Every blob and subtree referenced here has already been uploaded by the
//! base push, so this only needs the Tracker's promises, never a fresh
//! upload.

use crate::cas::{Address, Client};
use crate::error::Result;
use crate::git::Reader;
use crate::tracker::Tracker;

/// Recursively assembles a directory at a fresh CAS address whose entries
/// are named after `tree`'s file names (rather than git hashes), pointing
/// at the already-uploaded blob/subtree addresses.
pub fn build(reader: &Reader, cas: &Client, tracker: &Tracker, tree: crate::git::Oid) -> Result<Address> {
    let mut dir = Address::empty_dir().clone();
    for entry in reader.tree_entries(tree)? {
        if entry.is_commit {
            continue; // gitlinks have no CAS content
        }
        let child = if entry.is_tree {
            build(reader, cas, tracker, entry.oid)?
        } else {
            match tracker.get(entry.oid)? {
                Some(address) => address,
                None => continue, // not pushed (shouldn't happen for a reachable entry)
            }
        };
        dir = cas.patch_link(&dir, &entry.name, &child, true)?;
    }
    Ok(dir)
}
