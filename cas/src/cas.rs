//! A stateless façade over the CAS daemon's HTTP verbs.
//!
//! The wire format is the daemon's own JSON/raw-body dialect (see
//! SPEC_FULL.md §4.2); the client never interprets what an [`Address`]
//! encodes, it only threads it through.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::git::Oid;

/// An opaque CAS address. The engines never parse its structure.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Address {
    /// The well-known empty-directory address, used when an `ipfs://` URL
    /// omits its authority.
    pub fn empty_dir() -> &'static Address {
        static EMPTY: once_cell::sync::Lazy<Address> =
            once_cell::sync::Lazy::new(|| Address("bagempty1directory0000000000000000000000".into()));
        &EMPTY
    }
}

/// Deterministic address for the `git-raw` codec family: a bijection from a
/// git hash to a CAS address. The daemon must echo this back on `put_raw`.
pub fn derive_git_raw_address(hash: Oid) -> Address {
    Address(format!("bagit1raw1sha1{}", hash.to_hex()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Unknown,
}

pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub address: Address,
}

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct RawEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

/// Either a resolved address, or the distinguished "no such link" outcome.
pub enum Resolved {
    Address(Address),
    NoLink,
}

#[derive(Clone)]
pub struct Client {
    agent: ureq::Agent,
    base_url: String,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Client {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Streams `bytes` to the daemon; the daemon chooses the address.
    pub fn add(&self, bytes: &[u8]) -> Result<Address> {
        let resp = self
            .agent
            .post(&self.url("/add"))
            .send_bytes(bytes)
            .map_err(|e| Error::UploadFailed(e.to_string()))?;
        let parsed: AddressResponse = resp
            .into_json()
            .map_err(|e| Error::UploadFailed(e.to_string()))?;
        Ok(Address(parsed.address))
    }

    /// Uploads canonical git-object bytes; verifies the daemon echoed back
    /// the hash-derived address.
    pub fn put_raw(&self, hash: Oid, canonical_bytes: &[u8]) -> Result<Address> {
        let resp = self
            .agent
            .post(&self.url("/put_raw"))
            .query("codec", "git-raw")
            .query("hash", "sha1")
            .send_bytes(canonical_bytes)
            .map_err(|e| Error::UploadFailed(e.to_string()))?;
        let parsed: AddressResponse = resp
            .into_json()
            .map_err(|e| Error::UploadFailed(e.to_string()))?;
        let returned = Address(parsed.address);
        let expected = derive_git_raw_address(hash);
        if returned != expected {
            return Err(Error::AddressMismatch {
                expected: expected.0,
                returned: returned.0,
            });
        }
        Ok(returned)
    }

    /// Streams the bytes at `address`.
    pub fn cat(&self, address: &Address) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.url("/cat"))
            .query("address", &address.0)
            .call();
        self.read_bytes_or_error(response, "cat")
    }

    /// Whole-object read, used by fetch when shunts are unavailable.
    pub fn block_get(&self, address: &Address) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.url("/block_get"))
            .query("address", &address.0)
            .call();
        self.read_bytes_or_error(response, "block_get")
    }

    fn read_bytes_or_error(
        &self,
        response: std::result::Result<ureq::Response, ureq::Error>,
        op: &str,
    ) -> Result<Vec<u8>> {
        match response {
            Ok(resp) => {
                let mut buf = Vec::new();
                resp.into_reader()
                    .read_to_end(&mut buf)
                    .map_err(|e| Error::DownloadFailed(e.to_string()))?;
                Ok(buf)
            }
            Err(ureq::Error::Status(_, resp)) => {
                let message = error_message(resp);
                Err(classify_daemon_error(&message))
            }
            Err(e) => Err(Error::DownloadFailed(format!("{op}: {e}"))),
        }
    }

    /// Enumerate a directory.
    pub fn list(&self, address: &Address) -> Result<Vec<Entry>> {
        let response = self
            .agent
            .get(&self.url("/list"))
            .query("address", &address.0)
            .call();
        match response {
            Ok(resp) => {
                let entries: Vec<RawEntry> = resp
                    .into_json()
                    .map_err(|e| Error::DownloadFailed(e.to_string()))?;
                Ok(entries
                    .into_iter()
                    .map(|e| Entry {
                        name: e.name,
                        kind: match e.kind.as_str() {
                            "directory" => EntryKind::Directory,
                            "file" => EntryKind::File,
                            // "unknown" is treated as equivalent to "file".
                            _ => EntryKind::Unknown,
                        },
                        address: Address(e.address),
                    })
                    .collect())
            }
            Err(ureq::Error::Status(_, resp)) => {
                let message = error_message(resp);
                match classify_daemon_error(&message) {
                    Error::NoLink(_) => Ok(Vec::new()),
                    other => Err(other),
                }
            }
            Err(e) => Err(Error::DownloadFailed(e.to_string())),
        }
    }

    /// Returns a new directory address with `path` bound to `child`.
    pub fn patch_link(
        &self,
        parent: &Address,
        path: &str,
        child: &Address,
        create_intermediates: bool,
    ) -> Result<Address> {
        let resp = self
            .agent
            .post(&self.url("/patch_link"))
            .query("parent", &parent.0)
            .query("path", path)
            .query("child", &child.0)
            .query("create_intermediates", &create_intermediates.to_string())
            .call()
            .map_err(|e| Error::UploadFailed(format!("patch_link: {e}")))?;
        let parsed: AddressResponse = resp
            .into_json()
            .map_err(|e| Error::UploadFailed(e.to_string()))?;
        Ok(Address(parsed.address))
    }

    /// Resolves a slash-joined path against an address.
    pub fn resolve(&self, address: &Address, path: &str) -> Result<Resolved> {
        let response = self
            .agent
            .get(&self.url("/resolve"))
            .query("address", &address.0)
            .query("path", path)
            .call();
        match response {
            Ok(resp) => {
                let parsed: AddressResponse = resp
                    .into_json()
                    .map_err(|e| Error::DownloadFailed(e.to_string()))?;
                Ok(Resolved::Address(Address(parsed.address)))
            }
            Err(ureq::Error::Status(_, resp)) => {
                let message = error_message(resp);
                match classify_daemon_error(&message) {
                    Error::NoLink(_) => Ok(Resolved::NoLink),
                    other => Err(other),
                }
            }
            Err(e) => Err(Error::DownloadFailed(e.to_string())),
        }
    }
}

#[derive(Deserialize)]
struct NameResponse {
    name: String,
}

impl Client {
    /// Out-of-band naming-system resolve, used by `ipns://`/`key:` handlers
    /// to turn a name into a CAS address before the engines run. The naming
    /// system's internals are outside this crate's scope (spec.md §1); this
    /// is only the boundary call.
    pub fn name_resolve(&self, name: &str) -> Result<Address> {
        let resp = self
            .agent
            .get(&self.url("/name_resolve"))
            .query("name", name)
            .call()
            .map_err(|e| Error::DownloadFailed(format!("name_resolve: {e}")))?;
        let parsed: AddressResponse = resp
            .into_json()
            .map_err(|e| Error::DownloadFailed(e.to_string()))?;
        Ok(Address(parsed.address))
    }

    /// Out-of-band naming-system publish, called from `finish` on `key:`
    /// and `ipns://` pushes.
    pub fn name_publish(&self, local_key: &str, address: &Address) -> Result<String> {
        let resp = self
            .agent
            .post(&self.url("/name_publish"))
            .query("key", local_key)
            .query("address", &address.0)
            .call()
            .map_err(|e| Error::UploadFailed(format!("name_publish: {e}")))?;
        let parsed: NameResponse = resp
            .into_json()
            .map_err(|e| Error::UploadFailed(e.to_string()))?;
        Ok(parsed.name)
    }
}

fn error_message(resp: ureq::Response) -> String {
    resp.into_json::<ErrorResponse>()
        .map(|e| e.error)
        .unwrap_or_else(|_| "unknown daemon error".to_string())
}

/// Failures whose message names a missing path are surfaced as [`Error::NoLink`],
/// not a hard error (see spec.md §4.2 "No link recognition").
fn classify_daemon_error(message: &str) -> Error {
    if message.contains("no link named") || message.contains("no link by that name") {
        Error::NoLink(message.to_string())
    } else {
        Error::DownloadFailed(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_raw_address_is_deterministic() {
        let hash = crate::git::hash_of(crate::git::Kind::Blob, b"x");
        assert_eq!(derive_git_raw_address(hash), derive_git_raw_address(hash));
    }

    #[test]
    fn classify_recognizes_both_no_link_phrasings() {
        assert!(classify_daemon_error("no link named \"foo\" under root").is_no_link());
        assert!(classify_daemon_error("no link by that name here").is_no_link());
        assert!(!classify_daemon_error("connection reset").is_no_link());
    }
}
