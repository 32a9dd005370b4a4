//! Clone orchestration: discover refs, fetch one pack, unpack it.
//!
//! Nothing reaches the store until the pack checksum has verified and
//! every delta has resolved.

use crate::delta::DeltaResolver;
use crate::pack::PackParser;
use crate::protocol::{self, Advertisement, UPLOAD_PACK, UPLOAD_PACK_REQUEST};
use crate::stats::{PackStats, PackStatsSnapshot};
use crate::transport::Transport;
use crate::Result;
use kit_storage::{tree, Commit, ObjectId, ObjectStore, ObjectType, RefStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Branch cloned when none is given.
pub const DEFAULT_BRANCH: &str = "refs/heads/master";

/// Options for [`clone_repository`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneOptions {
    /// Repository URL, without the `/info/refs` suffix.
    pub url: String,
    /// Full name of the ref to fetch.
    pub branch: String,
    /// Walk the fetched history and check every object is present.
    pub verify_objects: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            verify_objects: true,
        }
    }
}

impl CloneOptions {
    /// Creates options for `url` with defaults for everything else.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Result of a successful clone.
#[derive(Debug, Clone, Serialize)]
pub struct CloneOutcome {
    /// Commit the cloned branch points at.
    pub head: ObjectId,
    /// Number of objects handed to the store.
    pub objects_written: usize,
    /// Counters collected while unpacking.
    pub stats: PackStatsSnapshot,
}

/// Fetches and parses the ref advertisement for `url`.
pub fn discover_refs(transport: &dyn Transport, url: &str) -> Result<Advertisement> {
    let url = format!("{}/info/refs?service={}", url.trim_end_matches('/'), UPLOAD_PACK);
    let body = transport.get(&url)?;
    protocol::parse_advertisement(&body)
}

/// Requests a pack containing `want` and returns the raw pack bytes.
pub fn fetch_pack(transport: &dyn Transport, url: &str, want: &ObjectId) -> Result<Vec<u8>> {
    let url = format!("{}/{}", url.trim_end_matches('/'), UPLOAD_PACK);
    let request = protocol::build_want_request(want);
    let body = transport.post(&url, UPLOAD_PACK_REQUEST, &request)?;
    Ok(protocol::split_pack_response(&body)?.to_vec())
}

/// Parses, resolves, and stores every object in `pack`.
///
/// Returns the ids written, in pack order.
pub fn unpack(pack: &[u8], store: &dyn ObjectStore, stats: &PackStats) -> Result<Vec<ObjectId>> {
    let parsed = PackParser::new(pack).with_stats(stats).parse()?;
    tracing::info!(
        version = parsed.version,
        objects = parsed.object_count,
        "pack verified"
    );

    let objects = DeltaResolver::new(&parsed, store)
        .with_stats(stats)
        .resolve_all()?;

    let ids = store.batch_put(&objects)?;
    stats.record_written(ids.len() as u64);
    tracing::info!(objects = ids.len(), "objects stored");
    Ok(ids)
}

/// Clones `options.branch` from `options.url` into `store`.
pub fn clone_repository(
    transport: &dyn Transport,
    store: &dyn ObjectStore,
    options: &CloneOptions,
) -> Result<CloneOutcome> {
    let url = options.base_url();
    tracing::info!(url = %url, branch = %options.branch, "discovering refs");
    let advertisement = discover_refs(transport, url)?;
    let head = protocol::find_ref(&advertisement.refs, &options.branch)?;

    tracing::info!(head = %head, "fetching pack");
    let pack = fetch_pack(transport, url, &head)?;

    let stats = PackStats::new();
    let ids = unpack(&pack, store, &stats)?;

    if options.verify_objects {
        verify_connectivity(store, &head)?;
    }

    Ok(CloneOutcome {
        head,
        objects_written: ids.len(),
        stats: stats.snapshot(),
    })
}

/// Points `branch` at `head` and makes `HEAD` a symbolic ref to it.
pub fn update_refs(refs: &RefStore, branch: &str, head: ObjectId) -> Result<()> {
    refs.set(branch, head)?;
    refs.set_symbolic("HEAD", branch)?;
    Ok(())
}

/// Checks that every commit, tree, and blob reachable from `head` is
/// present with the expected type.
pub fn verify_connectivity(store: &dyn ObjectStore, head: &ObjectId) -> Result<()> {
    let mut pending = vec![(*head, ObjectType::Commit)];
    let mut seen = HashSet::new();

    while let Some((id, expected)) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        let object = store.get(&id)?;
        if object.object_type != expected {
            return Err(StorageError::InvalidObject(format!(
                "{} is a {}, expected a {}",
                id, object.object_type, expected
            ))
            .into());
        }

        match object.object_type {
            ObjectType::Commit => {
                let commit = Commit::parse(&object.data)?;
                pending.push((commit.tree, ObjectType::Tree));
                pending.extend(commit.parents.into_iter().map(|p| (p, ObjectType::Commit)));
            }
            ObjectType::Tree => {
                for entry in tree::decode(&object.data)? {
                    // Submodule commits live in another repository.
                    if entry.object_type() != ObjectType::Commit {
                        pending.push((entry.hash, entry.object_type()));
                    }
                }
            }
            ObjectType::Blob | ObjectType::Tag => {}
        }
    }

    tracing::debug!(objects = seen.len(), "connectivity verified");
    Ok(())
}
