//! Bounded-parallel download of a reachable git object graph out of the CAS,
//! reconstructing canonical git bytes and writing them as loose objects.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel as chan;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::cas::{Address, Client, EntryKind};
use crate::error::{Error, Result};
use crate::git::{canonical_bytes, Kind, Object, Oid};

pub const DEFAULT_CONCURRENCY: usize = 512;

/// `hash -> (kind, CAS address of the payload blob)`, built from listing
/// `.git/{blobs,commits,tags,trees}` under the root.
type ShuntMap = HashMap<Oid, (Kind, Address)>;

/// Downloads every object reachable from `wanted` and writes it under
/// `objects_dir` (git's loose-object layout).
pub fn fetch(cas: &Client, objects_dir: &Path, root: &Address, wanted: Oid, concurrency: usize) -> Result<()> {
    let shunts = Arc::new(build_shunt_map(cas, root)?);
    let mkdir_lock = Arc::new(Mutex::new(()));
    let seen = Arc::new(Mutex::new(HashSet::from([wanted])));
    let todoc = Arc::new(AtomicUsize::new(1));
    let donec = Arc::new(AtomicUsize::new(0));

    let (todo_tx, todo_rx) = chan::unbounded::<Option<Oid>>();
    let (done_tx, done_rx) = chan::unbounded::<()>();
    let (err_tx, err_rx) = chan::unbounded::<Error>();

    todo_tx
        .send(Some(wanted))
        .map_err(|_| Error::DownloadFailed("todo channel closed before seeding".into()))?;

    let workers: Vec<_> = (0..concurrency.max(1))
        .map(|_| {
            let todo_rx = todo_rx.clone();
            let todo_tx = todo_tx.clone();
            let done_tx = done_tx.clone();
            let err_tx = err_tx.clone();
            let cas = cas.clone();
            let shunts = shunts.clone();
            let seen = seen.clone();
            let todoc = todoc.clone();
            let mkdir_lock = mkdir_lock.clone();
            let objects_dir = objects_dir.to_path_buf();
            thread::spawn(move || loop {
                match todo_rx.recv() {
                    Ok(Some(hash)) => {
                        match process_one(&cas, &shunts, &objects_dir, &mkdir_lock, hash) {
                            Ok(children) => {
                                for child in children {
                                    let mut seen = seen.lock().unwrap();
                                    if seen.insert(child) {
                                        drop(seen);
                                        todoc.fetch_add(1, Ordering::SeqCst);
                                        let _ = todo_tx.send(Some(child));
                                    }
                                }
                                let _ = done_tx.send(());
                            }
                            Err(e) => {
                                let _ = err_tx.send(e);
                                return;
                            }
                        }
                    }
                    Ok(None) | Err(_) => return,
                }
            })
        })
        .collect();
    drop(todo_rx);
    drop(done_tx);
    drop(err_tx);

    let mut first_error = None;
    loop {
        chan::select! {
            recv(done_rx) -> _ => {
                donec.fetch_add(1, Ordering::SeqCst);
                if todoc.load(Ordering::SeqCst) == donec.load(Ordering::SeqCst) {
                    break;
                }
            }
            recv(err_rx) -> msg => {
                if let Ok(e) = msg {
                    first_error = Some(e);
                }
                break;
            }
        }
    }

    for _ in 0..workers.len() {
        let _ = todo_tx.send(None);
    }
    for w in workers {
        let _ = w.join();
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(())
}

fn build_shunt_map(cas: &Client, root: &Address) -> Result<ShuntMap> {
    let mut map = HashMap::new();
    for kind in Kind::ALL {
        let Ok(resolved) = cas.resolve(root, &format!(".git/{}", kind.dir_name())) else {
            continue;
        };
        let crate::cas::Resolved::Address(dir) = resolved else {
            continue; // category absent: best-effort, leave it out of the map
        };
        for entry in cas.list(&dir)? {
            if let Ok(hash) = entry.name.parse::<Oid>() {
                if !matches!(entry.kind, EntryKind::Directory) {
                    map.insert(hash, (kind, entry.address));
                }
            }
        }
    }
    Ok(map)
}

fn process_one(
    cas: &Client,
    shunts: &ShuntMap,
    objects_dir: &Path,
    mkdir_lock: &Mutex<()>,
    hash: Oid,
) -> Result<Vec<Oid>> {
    let (kind, address) = shunts
        .get(&hash)
        .ok_or_else(|| Error::MissingBlock(hash.to_hex()))?;
    let payload = cas.cat(address)?;
    let object = Object {
        hash,
        kind: *kind,
        payload,
    };
    let children = object.links();

    let path = loose_object_path(objects_dir, hash);
    if !path.exists() {
        write_loose_object(&path, mkdir_lock, &canonical_bytes(object.kind, &object.payload))?;
    }

    Ok(children)
}

fn loose_object_path(objects_dir: &Path, hash: Oid) -> PathBuf {
    let hex = hash.to_hex();
    objects_dir.join(&hex[0..2]).join(&hex[2..])
}

#[cfg(unix)]
fn write_loose_object(path: &Path, mkdir_lock: &Mutex<()>, canonical: &[u8]) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = path.parent().expect("loose object path always has a shard dir");
    {
        let _guard = mkdir_lock.lock().unwrap();
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o755))?;
        }
    }

    let mut deflated = Vec::new();
    {
        let mut encoder = ZlibEncoder::new(&mut deflated, Compression::default());
        encoder.write_all(canonical)?;
        encoder.finish()?;
    }

    let tmp = dir.join(format!(".tmp-{}-{:?}", std::process::id(), thread::current().id()));
    fs::write(&tmp, &deflated)?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(0o444))?;
    // Another fetch may have raced us and already created the final path;
    // a pre-existing object file is never overwritten (invariant I3).
    if !path.exists() {
        fs::rename(&tmp, path)?;
    } else {
        let _ = fs::remove_file(&tmp);
    }
    Ok(())
}

#[cfg(not(unix))]
fn write_loose_object(path: &Path, mkdir_lock: &Mutex<()>, canonical: &[u8]) -> Result<()> {
    let dir = path.parent().expect("loose object path always has a shard dir");
    {
        let _guard = mkdir_lock.lock().unwrap();
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    let mut deflated = Vec::new();
    {
        let mut encoder = ZlibEncoder::new(&mut deflated, Compression::default());
        encoder.write_all(canonical)?;
        encoder.finish()?;
    }
    let tmp = dir.join(format!(".tmp-{}", std::process::id()));
    fs::write(&tmp, &deflated)?;
    if !path.exists() {
        fs::rename(&tmp, path)?;
    } else {
        let _ = fs::remove_file(&tmp);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_object_path_shards_on_first_two_hex_chars() {
        let hash = crate::git::hash_of(Kind::Blob, b"shard-me");
        let path = loose_object_path(Path::new("/git/objects"), hash);
        let hex = hash.to_hex();
        assert_eq!(
            path,
            Path::new("/git/objects").join(&hex[0..2]).join(&hex[2..])
        );
    }
}
