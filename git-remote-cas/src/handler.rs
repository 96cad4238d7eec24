//! The scheme-specific ref handlers (spec.md §4.5's "Ref Handler" plug-in,
//! expanded in SPEC_FULL.md §4.6). Dependency-inverted from the dispatcher
//! via a small trait — no inheritance needed (Design Note "Polymorphism via
//! capability set").

use cas::cas::{Address, Client};
use cas::error::{Error, Result};
use cas::git::{Head, Oid, Reader};
use cas::naming::Resolver;
use cas::tracker::Tracker;

use crate::url::RemoteUrl;

pub trait Handler {
    fn initialize(&mut self) -> Result<()>;
    fn list(&mut self, for_push: bool) -> Result<Vec<String>>;
    /// Pushes `local_ref` to `remote_ref`, returning `local_ref` so the
    /// dispatcher can echo `ok <local_ref>`.
    fn push(&mut self, local_ref: &str, remote_ref: &str) -> Result<String>;
    /// Downloads `wanted` and everything it reaches into the local object
    /// database (spec.md §4.4's Fetch Engine).
    fn fetch(&mut self, wanted: Oid) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
    fn get_remote_name(&self) -> String;
}

/// Lists the refs recorded under `root`'s `.git/` directory (spec.md §3): the
/// HEAD symlink blob, then one line per entry under `.git/refs/heads/`,
/// where `push` actually nests ref blobs (`cas::push::push` links
/// `.git/refs/heads/<name>` via `create_intermediates`).
fn list_remote_refs(cas: &Client, root: &Address) -> Result<Vec<String>> {
    let mut lines = Vec::new();

    if let cas::cas::Resolved::Address(head_addr) = cas.resolve(root, ".git/HEAD")? {
        let bytes = cas.cat(&head_addr)?;
        let target = String::from_utf8_lossy(&bytes).trim().to_string();
        lines.push(format!("@{target} HEAD"));
    }

    let refs_dir = match cas.resolve(root, ".git/refs/heads")? {
        cas::cas::Resolved::Address(a) => a,
        cas::cas::Resolved::NoLink => return Ok(lines),
    };
    for entry in cas.list(&refs_dir)? {
        let bytes = cas.cat(&entry.address)?;
        let hash = String::from_utf8_lossy(&bytes).trim().to_string();
        lines.push(format!("{hash} refs/heads/{}", entry.name));
    }
    Ok(lines)
}

/// Direct CAS-address remote: `ipfs://<address>`.
pub struct IpfsHandler {
    remote_name: String,
    cas: Client,
    reader: Reader,
    tracker: Tracker,
    root: Address,
    concurrency: usize,
    vfs_enabled: bool,
}

impl IpfsHandler {
    pub fn new(
        remote_name: String,
        address: String,
        cas: Client,
        reader: Reader,
        tracker: Tracker,
        concurrency: usize,
        vfs_enabled: bool,
    ) -> Self {
        let root = if address.is_empty() {
            Address::empty_dir().clone()
        } else {
            Address(address)
        };
        IpfsHandler {
            remote_name,
            cas,
            reader,
            tracker,
            root,
            concurrency,
            vfs_enabled,
        }
    }

    pub fn root(&self) -> &Address {
        &self.root
    }

    pub fn into_tracker(self) -> Tracker {
        self.tracker
    }
}

impl Handler for IpfsHandler {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn list(&mut self, for_push: bool) -> Result<Vec<String>> {
        if for_push {
            // Resolved Open Question: the direct-address handler always
            // reports the all-zeros placeholder, so git sends everything.
            Ok(self
                .reader
                .local_branches()?
                .into_iter()
                .map(|b| format!("{} {}", "0".repeat(40), b.name))
                .collect())
        } else {
            let mut lines = list_remote_refs(&self.cas, &self.root)?;
            if lines.is_empty() {
                // Brand new remote: fall back to the local HEAD/branches so
                // a first `git fetch` of an empty root at least terminates
                // cleanly with nothing to report beyond HEAD, if resolvable.
                if let Ok(Head::Symbolic(target)) = self.reader.head() {
                    lines.push(format!("@{target} HEAD"));
                }
            }
            Ok(lines)
        }
    }

    fn push(&mut self, local_ref: &str, remote_ref: &str) -> Result<String> {
        let hash = self.reader.resolve(local_ref)?;
        let new_root = cas::push::push(
            &self.reader,
            &self.cas,
            &mut self.tracker,
            self.root.clone(),
            hash,
            remote_ref,
            self.concurrency,
            self.vfs_enabled,
        )?;
        self.root = new_root;
        Ok(local_ref.to_string())
    }

    fn fetch(&mut self, wanted: Oid) -> Result<()> {
        let objects_dir = self.reader.git_dir().join("objects");
        cas::fetch::fetch(&self.cas, &objects_dir, &self.root, wanted, self.concurrency)
    }

    fn finish(&mut self) -> Result<()> {
        log::info!(target: "helper", "Pushed to ipfs://{}", self.root);
        Ok(())
    }

    fn get_remote_name(&self) -> String {
        self.remote_name.clone()
    }
}

/// Indirect naming-system remote: `ipns://<name>` or `key:<local-key>`.
pub struct NamingHandler<'a> {
    remote_name: String,
    cas: Client,
    reader: Reader,
    tracker: Tracker,
    resolver: &'a dyn Resolver,
    name_or_key: String,
    is_local_key: bool,
    root: Address,
    concurrency: usize,
    vfs_enabled: bool,
}

impl<'a> NamingHandler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote_name: String,
        url: RemoteUrl,
        cas: Client,
        reader: Reader,
        tracker: Tracker,
        resolver: &'a dyn Resolver,
        concurrency: usize,
        vfs_enabled: bool,
    ) -> Result<Self> {
        let (name_or_key, is_local_key) = match url {
            RemoteUrl::Ipns { name } => (name, false),
            RemoteUrl::Key { local_key } => (local_key, true),
            RemoteUrl::Ipfs { .. } => {
                return Err(Error::ProtocolError(
                    "NamingHandler requires an ipns:// or key: url".into(),
                ))
            }
        };
        Ok(NamingHandler {
            remote_name,
            cas,
            reader,
            tracker,
            resolver,
            name_or_key,
            is_local_key,
            root: Address::empty_dir().clone(),
            concurrency,
            vfs_enabled,
        })
    }

    pub fn into_tracker(self) -> Tracker {
        self.tracker
    }
}

impl Handler for NamingHandler<'_> {
    fn initialize(&mut self) -> Result<()> {
        self.root = self.resolver.resolve(&self.name_or_key)?;
        Ok(())
    }

    fn list(&mut self, _for_push: bool) -> Result<Vec<String>> {
        // Resolved Open Question: the indirect handler reports real remote
        // hashes both for `list` and `list for-push`, so git can skip
        // objects already present.
        list_remote_refs(&self.cas, &self.root)
    }

    fn push(&mut self, local_ref: &str, remote_ref: &str) -> Result<String> {
        let hash = self.reader.resolve(local_ref)?;
        let new_root = cas::push::push(
            &self.reader,
            &self.cas,
            &mut self.tracker,
            self.root.clone(),
            hash,
            remote_ref,
            self.concurrency,
            self.vfs_enabled,
        )?;
        self.root = new_root;
        Ok(local_ref.to_string())
    }

    fn fetch(&mut self, wanted: Oid) -> Result<()> {
        let objects_dir = self.reader.git_dir().join("objects");
        cas::fetch::fetch(&self.cas, &objects_dir, &self.root, wanted, self.concurrency)
    }

    fn finish(&mut self) -> Result<()> {
        if self.is_local_key {
            let name = self.resolver.publish(&self.name_or_key, &self.root)?;
            log::info!(target: "helper", "Pushed to ipns://{name}");
        }
        Ok(())
    }

    fn get_remote_name(&self) -> String {
        self.remote_name.clone()
    }
}
