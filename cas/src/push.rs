//! Bounded-parallel upload of a reachable git object graph into the CAS,
//! incrementally assembling a root directory.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel as chan;
use sha1::{Digest, Sha1};

use crate::cas::{Address, Client};
use crate::error::{Error, Result};
use crate::git::{Kind, Oid, Reader};
use crate::tracker::Tracker;
use crate::vfs;

/// Target worker-pool size for uploads; clamped down for tiny pushes.
pub const DEFAULT_CONCURRENCY: usize = 512;

struct UploadJob {
    hash: Oid,
    kind: Kind,
    payload: Vec<u8>,
}

enum UploadOutcome {
    Done {
        hash: Oid,
        kind: Kind,
        address: Address,
    },
    Failed(Error),
}

/// Uploads every object reachable from `root_hash` and returns the final
/// root CAS address. `vfs` enables the post-pass described in spec.md §4.3.
/// `starting_root` lets a caller chain several pushes in one batch onto a
/// single growing root, or onto an existing remote's root when one exists.
pub fn push(
    reader: &Reader,
    cas: &Client,
    tracker: &mut Tracker,
    starting_root: Address,
    root_hash: Oid,
    ref_name: &str,
    concurrency: usize,
    vfs_enabled: bool,
) -> Result<Address> {
    let cache_key = push_cache_key(&starting_root);
    if let Some(cached_root) = tracker.get(cache_key)? {
        return Ok(cached_root);
    }

    let interrupted = install_interrupt_flag();
    let mut root = starting_root;

    let mut queue: VecDeque<Oid> = VecDeque::new();
    let mut seen: HashSet<Oid> = HashSet::new();
    queue.push_back(root_hash);
    seen.insert(root_hash);

    let (job_tx, job_rx) = chan::bounded::<UploadJob>(concurrency.max(1));
    let (result_tx, result_rx) = chan::unbounded::<UploadOutcome>();

    let workers: Vec<_> = (0..concurrency.max(1))
        .map(|_| {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cas = cas.clone();
            thread::spawn(move || {
                for job in job_rx {
                    let outcome = upload_one(&cas, job);
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(job_rx);
    drop(result_tx);

    let mut in_flight = 0usize;
    let mut first_error: Option<Error> = None;

    while first_error.is_none() && (!queue.is_empty() || in_flight > 0) {
        if interrupted.load(Ordering::SeqCst) {
            first_error = Some(Error::Interrupted);
            break;
        }

        while first_error.is_none() && !queue.is_empty() && in_flight < concurrency.max(1) {
            let hash = queue.pop_front().unwrap();
            match dispatch(reader, tracker, cas, &mut root, hash, &job_tx, &mut queue, &mut seen) {
                Ok(true) => in_flight += 1,
                Ok(false) => {}
                Err(e) => first_error = Some(e),
            }
        }

        if first_error.is_some() {
            break;
        }

        if in_flight > 0 {
            match result_rx.recv() {
                Ok(UploadOutcome::Done { hash, kind, address }) => {
                    in_flight -= 1;
                    if let Err(e) = tracker.put(hash, &address) {
                        first_error = Some(e);
                        continue;
                    }
                    match cas.patch_link(&root, &link_path(kind, hash), &address, true) {
                        Ok(new_root) => root = new_root,
                        Err(e) => first_error = Some(e),
                    }
                }
                Ok(UploadOutcome::Failed(e)) => {
                    in_flight -= 1;
                    first_error = Some(e);
                }
                Err(_) => break, // all workers gone; nothing more can complete
            }
        }
    }

    drop(job_tx);
    for w in workers {
        let _ = w.join();
    }

    // Drain any stragglers so every upload future is awaited even on the
    // error path, per the cancellation contract.
    while in_flight > 0 {
        match result_rx.recv() {
            Ok(_) => in_flight -= 1,
            Err(_) => break,
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let ref_hash_addr = cas.add(root_hash.to_hex().as_bytes())?;
    root = cas.patch_link(&root, &format!(".git/{ref_name}"), &ref_hash_addr, true)?;
    let head_addr = cas.add(ref_name.as_bytes())?;
    root = cas.patch_link(&root, ".git/HEAD", &head_addr, true)?;

    // Best-effort human-browsable mirror of the top commit's tree; spec.md
    // §3 says the root "usually" carries this, so a failure here does not
    // fail the push.
    if let Ok(tree) = reader.commit_tree(root_hash) {
        match crate::content::build(reader, cas, tracker, tree) {
            Ok(content_dir) => {
                if let Ok(new_root) = cas.patch_link(&root, "content", &content_dir, true) {
                    root = new_root;
                }
            }
            Err(e) => log::warn!(target: "push", "failed to build content/ mirror: {e}"),
        }
    }

    if vfs_enabled {
        root = vfs::decorate(reader, cas, tracker, root, root_hash)?;
    }

    tracker.put(cache_key, &root)?;
    Ok(root)
}

fn link_path(kind: Kind, hash: Oid) -> String {
    format!(".git/{}/{}", kind.dir_name(), hash.to_hex())
}

/// Synthetic hash identifying a repeat push from the same starting root, so
/// `push` can short-circuit a second identical push to zero uploads (the
/// original's `"repo:"+root` tracker cache key).
fn push_cache_key(starting_root: &Address) -> Oid {
    let mut hasher = Sha1::new();
    hasher.update(b"repo:");
    hasher.update(starting_root.0.as_bytes());
    Oid::from_bytes(&hasher.finalize()).expect("sha1 digest is 20 bytes")
}

/// Returns `Ok(true)` if an upload job was dispatched (caller should count
/// it as in-flight), `Ok(false)` if the hash was handled synchronously
/// (already tracked).
fn dispatch(
    reader: &Reader,
    tracker: &Tracker,
    cas: &Client,
    root: &mut Address,
    hash: Oid,
    job_tx: &chan::Sender<UploadJob>,
    queue: &mut VecDeque<Oid>,
    seen: &mut HashSet<Oid>,
) -> Result<bool> {
    let object = reader.read_object(hash)?;
    for link in object.links() {
        if seen.insert(link) {
            queue.push_back(link);
        }
    }

    if let Some(address) = tracker.get(hash)? {
        *root = cas.patch_link(root, &link_path(object.kind, hash), &address, true)?;
        return Ok(false);
    }

    job_tx
        .send(UploadJob {
            hash,
            kind: object.kind,
            payload: object.payload,
        })
        .map_err(|_| Error::UploadFailed("worker pool closed unexpectedly".into()))?;
    Ok(true)
}

fn upload_one(cas: &Client, job: UploadJob) -> UploadOutcome {
    // Every kind uploads the bare payload (no canonical header): the shunt
    // must hold payload-only bytes, since fetch always reconstructs the
    // header itself from the shunt's recorded kind before hashing.
    let result = cas.add(&job.payload);
    match result {
        Ok(address) => UploadOutcome::Done {
            hash: job.hash,
            kind: job.kind,
            address,
        },
        Err(e) => UploadOutcome::Failed(e),
    }
}

fn install_interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    // ctrlc::set_handler can only be installed once per process; a second
    // push in the same process (e.g. in tests) tolerates the error.
    let _ = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    });
    flag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_path_uses_pluralized_kind_directory() {
        let hash = crate::git::hash_of(Kind::Blob, b"x");
        assert_eq!(link_path(Kind::Blob, hash), format!(".git/blobs/{}", hash.to_hex()));
        assert_eq!(link_path(Kind::Tree, hash), format!(".git/trees/{}", hash.to_hex()));
    }

    #[test]
    fn push_cache_key_is_stable_per_root_and_differs_across_roots() {
        let a = Address("bagroota".into());
        let b = Address("bagrootb".into());
        assert_eq!(push_cache_key(&a), push_cache_key(&a));
        assert_ne!(push_cache_key(&a), push_cache_key(&b));
    }
}
