//! Thin wrapper around `git2` for reading git objects and enumerating refs.
//!
//! This module is the "git object reader" collaborator: it is kept
//! deliberately small, exposing only what the Push/Fetch engines need
//! (object type, size, raw payload, and ref enumeration).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// A 20-byte git object hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 20]);

impl Oid {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| Error::ProtocolError(format!("invalid hash '{s}': {e}")))?;
        Oid::from_bytes(&bytes)
            .ok_or_else(|| Error::ProtocolError(format!("invalid hash length '{s}'")))
    }
}

impl From<git2::Oid> for Oid {
    fn from(oid: git2::Oid) -> Self {
        Oid::from_bytes(oid.as_bytes()).expect("git2::Oid is always 20 bytes")
    }
}

impl From<Oid> for git2::Oid {
    fn from(oid: Oid) -> Self {
        git2::Oid::from_bytes(&oid.0).expect("Oid is always a valid git2::Oid")
    }
}

/// The four git object types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl Kind {
    /// The lowercase wire token used in the canonical object header.
    pub fn token(&self) -> &'static str {
        match self {
            Kind::Commit => "commit",
            Kind::Tree => "tree",
            Kind::Blob => "blob",
            Kind::Tag => "tag",
        }
    }

    /// The pluralized directory name used under `.git/<t>s/` in the CAS root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Kind::Commit => "commits",
            Kind::Tree => "trees",
            Kind::Blob => "blobs",
            Kind::Tag => "tags",
        }
    }

    pub const ALL: [Kind; 4] = [Kind::Commit, Kind::Tree, Kind::Blob, Kind::Tag];
}

impl From<git2::ObjectType> for Kind {
    fn from(kind: git2::ObjectType) -> Self {
        match kind {
            git2::ObjectType::Commit => Kind::Commit,
            git2::ObjectType::Tree => Kind::Tree,
            git2::ObjectType::Blob => Kind::Blob,
            git2::ObjectType::Tag => Kind::Tag,
            other => panic!("unsupported git object type: {other:?}"),
        }
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "commit" => Ok(Kind::Commit),
            "tree" => Ok(Kind::Tree),
            "blob" => Ok(Kind::Blob),
            "tag" => Ok(Kind::Tag),
            other => Err(Error::ProtocolError(format!("unknown object kind '{other}'"))),
        }
    }
}

/// A git object: its hash, type and payload (without the canonical header).
#[derive(Clone)]
pub struct Object {
    pub hash: Oid,
    pub kind: Kind,
    pub payload: Vec<u8>,
}

impl Object {
    /// Canonical wire bytes: `"<type> <decimal-size>\0" ++ payload`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_bytes(self.kind, &self.payload)
    }

    /// Outgoing hashes referenced by this object (parsed from the payload).
    /// Blobs never reference other objects.
    pub fn links(&self) -> Vec<Oid> {
        match self.kind {
            Kind::Blob => Vec::new(),
            Kind::Tree => parse_tree_links(&self.payload),
            Kind::Commit => parse_commit_links(&self.payload),
            Kind::Tag => parse_tag_links(&self.payload),
        }
    }
}

/// `"<type> <decimal-size>\0" ++ payload`; no leading zeros, no whitespace
/// padding in the size (invariant I4).
pub fn canonical_bytes(kind: Kind, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 16);
    buf.extend_from_slice(kind.token().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(payload.len().to_string().as_bytes());
    buf.push(0);
    buf.extend_from_slice(payload);
    buf
}

/// SHA-1 of the canonical form; this is the git hash by definition.
pub fn hash_of(kind: Kind, payload: &[u8]) -> Oid {
    let mut hasher = Sha1::new();
    hasher.update(canonical_bytes(kind, payload));
    Oid::from_bytes(&hasher.finalize()).expect("sha1 digest is 20 bytes")
}

fn parse_tree_links(payload: &[u8]) -> Vec<Oid> {
    let mut links = Vec::new();
    let mut i = 0;
    while i < payload.len() {
        let Some(nul) = payload[i..].iter().position(|&b| b == 0) else {
            break;
        };
        let entry_end = i + nul;
        let Some(space) = payload[i..entry_end].iter().position(|&b| b == b' ') else {
            break;
        };
        let _mode_and_name = &payload[i..entry_end];
        let _ = space;
        let hash_start = entry_end + 1;
        let hash_end = hash_start + 20;
        if hash_end > payload.len() {
            break;
        }
        if let Some(oid) = Oid::from_bytes(&payload[hash_start..hash_end]) {
            links.push(oid);
        }
        i = hash_end;
    }
    links
}

fn parse_commit_links(payload: &[u8]) -> Vec<Oid> {
    let text = String::from_utf8_lossy(payload);
    let mut links = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break; // header ends at the first blank line
        }
        if let Some(rest) = line.strip_prefix("tree ") {
            if let Ok(oid) = Oid::from_str(rest.trim()) {
                links.push(oid);
            }
        } else if let Some(rest) = line.strip_prefix("parent ") {
            if let Ok(oid) = Oid::from_str(rest.trim()) {
                links.push(oid);
            }
        }
    }
    links
}

fn parse_tag_links(payload: &[u8]) -> Vec<Oid> {
    let text = String::from_utf8_lossy(payload);
    let mut links = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(rest) = line.strip_prefix("object ") {
            if let Ok(oid) = Oid::from_str(rest.trim()) {
                links.push(oid);
            }
        }
    }
    links
}

/// One entry of a tree, as needed to mirror file names into a human-navigable
/// `content/` directory on the CAS.
pub struct TreeEntry {
    pub name: String,
    pub oid: Oid,
    pub is_tree: bool,
    /// `true` for gitlinks (submodule commits), which have no CAS content.
    pub is_commit: bool,
}

/// A local branch name together with the commit it points at.
pub struct Branch {
    pub name: String,
    pub target: Oid,
}

/// Where `HEAD` points.
pub enum Head {
    Direct(Oid),
    Symbolic(String),
}

/// One commit's worth of metadata needed to build the VFS tree.
pub struct CommitInfo {
    pub hash: Oid,
    pub tree: Oid,
    pub author: String,
    pub time: i64, // seconds since epoch, UTC
    pub first_line: String,
}

/// Reads git objects and refs out of the repository found via `GIT_DIR`.
pub struct Reader {
    repo: git2::Repository,
}

impl Reader {
    pub fn open_from_env() -> Result<Self> {
        Ok(Reader {
            repo: git2::Repository::open_from_env()?,
        })
    }

    pub fn git_dir(&self) -> PathBuf {
        self.repo.path().to_path_buf()
    }

    pub fn read_object(&self, hash: Oid) -> Result<Object> {
        let odb = self.repo.odb()?;
        let obj = odb.read(hash.into())?;
        Ok(Object {
            hash,
            kind: Kind::from(obj.kind()),
            payload: obj.data().to_vec(),
        })
    }

    pub fn local_branches(&self) -> Result<Vec<Branch>> {
        let mut out = Vec::new();
        for entry in self.repo.branches(Some(git2::BranchType::Local))? {
            let (branch, _) = entry?;
            let reference = branch.get();
            let name = reference
                .name()
                .ok_or_else(|| Error::ProtocolError("branch name is not utf-8".into()))?
                .to_string();
            let target = reference
                .resolve()?
                .target()
                .ok_or_else(|| Error::ProtocolError(format!("{name} has no direct target")))?;
            out.push(Branch {
                name,
                target: target.into(),
            });
        }
        Ok(out)
    }

    pub fn head(&self) -> Result<Head> {
        let head = self.repo.find_reference("HEAD")?;
        match head.kind() {
            Some(git2::ReferenceType::Direct) => {
                let target = head
                    .target()
                    .ok_or_else(|| Error::ProtocolError("HEAD has no target".into()))?;
                Ok(Head::Direct(target.into()))
            }
            Some(git2::ReferenceType::Symbolic) | None => {
                let target = head
                    .symbolic_target()
                    .ok_or_else(|| Error::ProtocolError("HEAD symbolic target is not utf-8".into()))?;
                Ok(Head::Symbolic(target.to_string()))
            }
        }
    }

    pub fn resolve(&self, refname: &str) -> Result<Oid> {
        let reference = self.repo.find_reference(refname)?.resolve()?;
        let target = reference
            .target()
            .ok_or_else(|| Error::ProtocolError(format!("{refname} has no direct target")))?;
        Ok(target.into())
    }

    pub fn commit_tree(&self, commit: Oid) -> Result<Oid> {
        let commit = self.repo.find_commit(commit.into())?;
        Ok(commit.tree_id().into())
    }

    pub fn tree_entries(&self, tree: Oid) -> Result<Vec<TreeEntry>> {
        let tree = self.repo.find_tree(tree.into())?;
        Ok(tree
            .iter()
            .map(|entry| TreeEntry {
                name: entry.name().unwrap_or("").to_string(),
                oid: entry.id().into(),
                is_tree: entry.kind() == Some(git2::ObjectType::Tree),
                is_commit: entry.kind() == Some(git2::ObjectType::Commit),
            })
            .collect())
    }

    /// Commits reachable from `root`, in topological preorder starting at
    /// `root` itself (depth 1 is the tip, not the oldest ancestor), each
    /// visited exactly once.
    pub fn commits_preorder(&self, root: Oid) -> Result<Vec<CommitInfo>> {
        let mut walk = self.repo.revwalk()?;
        walk.push(root.into())?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL)?;

        let mut out = Vec::new();
        for oid in walk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let author = commit.author();
            let name = author.name().unwrap_or("unknown").to_string();
            let message = commit.message().unwrap_or("");
            let first_line = message.lines().next().unwrap_or("").to_string();
            out.push(CommitInfo {
                hash: oid.into(),
                tree: commit.tree_id().into(),
                author: name,
                time: author.when().seconds(),
                first_line,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_framing_matches_git_hash_of_empty_blob() {
        // `git hash-object -t blob --stdin < /dev/null`
        let hash = hash_of(Kind::Blob, b"");
        assert_eq!(hash.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn canonical_bytes_have_no_leading_zero_in_size() {
        let bytes = canonical_bytes(Kind::Blob, b"hi");
        assert_eq!(bytes, b"blob 2\0hi");
    }

    #[test]
    fn oid_hex_roundtrip() {
        let oid = hash_of(Kind::Blob, b"round trip");
        let s = oid.to_hex();
        let parsed: Oid = s.parse().unwrap();
        assert_eq!(oid, parsed);
    }
}
