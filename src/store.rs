//! The hierarchical node store.
//!
//! Node records live in one backend tree keyed by absolute path; content
//! blobs live in a second tree keyed by generated identifier, next to a
//! per-id reference count so that a blob aliased by several records is only
//! deleted with its last reference. Every operation
//! that touches more than one record runs inside a single backend transaction
//! spanning both trees, so a caller never observes partial effects: missing
//! parents, missing nodes and destination collisions abort the whole
//! transaction.

use crate::config::FileDbConfig;
use crate::error::FileDbError;
use crate::guid::Guid;
use crate::node::{ChildInfo, NodeData, NodeRecord};
use crate::path::{self, PathInfo};
use crate::task::Task;
use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

const TREE_NODES: &str = "node-records";
const TREE_CONTENTS: &str = "content-blobs";
const TREE_META: &str = "filedb-meta";
const KEY_SCHEMA_VERSION: &[u8] = b"schema-version";

/// Key prefix for per-content-id reference counters in the contents tree.
/// Blob keys are hyphenated identifiers, so the prefix cannot collide.
const REF_PREFIX: &[u8] = b"refs:";

/// Bumped only when the persisted table layout changes.
pub const SCHEMA_VERSION: u32 = 1;

type TxError = ConflictableTransactionError<FileDbError>;
type TxResult<T> = Result<T, TxError>;

fn abort(err: FileDbError) -> TxError {
    ConflictableTransactionError::Abort(err)
}

fn unwrap_tx<T>(result: Result<T, TransactionError<FileDbError>>) -> Result<T, FileDbError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(FileDbError::Backend(err)),
    }
}

fn encode_record(record: &NodeRecord) -> Result<Vec<u8>, FileDbError> {
    Ok(bincode::serialize(record)?)
}

fn decode_record(raw: &[u8]) -> Result<NodeRecord, FileDbError> {
    Ok(bincode::deserialize(raw)?)
}

fn ref_key(id: &Guid) -> Vec<u8> {
    let mut key = REF_PREFIX.to_vec();
    key.extend_from_slice(id.to_string().as_bytes());
    key
}

fn decode_ref_count(raw: &[u8]) -> u64 {
    if raw.len() != 8 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(raw);
    u64::from_le_bytes(bytes)
}

fn tx_ref_count(contents: &TransactionalTree, id: &Guid) -> TxResult<u64> {
    Ok(contents
        .get(&ref_key(id)[..])?
        .map(|raw| decode_ref_count(&raw))
        .unwrap_or(0))
}

/// Record one more node referencing this content id.
fn tx_incr_ref(contents: &TransactionalTree, id: &Guid) -> TxResult<()> {
    let count = tx_ref_count(contents, id)? + 1;
    contents.insert(ref_key(id), count.to_le_bytes().to_vec())?;
    Ok(())
}

/// Drop one reference to this content id. The blob and its counter are
/// deleted with the last reference; earlier references leave both in place,
/// so content aliased from elsewhere in the tree stays reachable.
fn tx_decr_ref(contents: &TransactionalTree, id: &Guid) -> TxResult<()> {
    let count = tx_ref_count(contents, id)?.saturating_sub(1);
    if count == 0 {
        contents.remove(ref_key(id))?;
        contents.remove(id.key())?;
    } else {
        contents.insert(ref_key(id), count.to_le_bytes().to_vec())?;
    }
    Ok(())
}

fn tx_get(nodes: &TransactionalTree, abs_path: &str) -> TxResult<Option<NodeRecord>> {
    match nodes.get(abs_path.as_bytes())? {
        Some(raw) => Ok(Some(decode_record(&raw).map_err(abort)?)),
        None => Ok(None),
    }
}

fn tx_require(nodes: &TransactionalTree, abs_path: &str) -> TxResult<NodeRecord> {
    tx_get(nodes, abs_path)?.ok_or_else(|| abort(FileDbError::NotFound(abs_path.to_string())))
}

/// Resolve the node a child claims as its parent, aborting the transaction
/// when it does not exist.
fn tx_require_parent(nodes: &TransactionalTree, location: &str) -> TxResult<NodeRecord> {
    tx_get(nodes, location)?
        .ok_or_else(|| abort(FileDbError::MissingParent(location.to_string())))
}

fn tx_put(nodes: &TransactionalTree, record: &NodeRecord) -> TxResult<()> {
    let encoded = encode_record(record).map_err(abort)?;
    nodes.insert(record.absolute_path().into_bytes(), encoded)?;
    Ok(())
}

/// Fetch the subtree rooted at `root` in pre-order: a node is visited before
/// any of its descendants; siblings follow the children index's iteration
/// order. A dangling child reference aborts the transaction.
fn collect_subtree(nodes: &TransactionalTree, root: NodeRecord) -> TxResult<Vec<NodeRecord>> {
    let root_path = root.absolute_path();
    let fetches: Vec<Task<'_, Vec<NodeRecord>, TxError>> = root
        .children
        .values()
        .map(|child| {
            let child_path = path::absolute_path(&root_path, &child.name);
            Task::new(move || {
                let record = tx_get(nodes, &child_path)?
                    .ok_or_else(|| abort(FileDbError::NotFound(child_path.clone())))?;
                collect_subtree(nodes, record)
            })
        })
        .collect();

    let mut visited = vec![root];
    for subtree in Task::join(fetches).run()? {
        visited.extend(subtree);
    }
    Ok(visited)
}

/// Copy the subtree at `source` onto `destination` with strict create-only
/// writes, registering the copied root with the destination's parent.
/// Returns the original absolute path and content id of every copied node,
/// in visit order.
///
/// With `detach` set, each copied node receives a freshly generated content
/// id with the source blob duplicated under it, and copied parents' children
/// entries are rewritten to the children's fresh ids; otherwise content ids
/// are aliased and blobs untouched. Every written record adds one reference
/// to its content id.
fn copy_branch(
    nodes: &TransactionalTree,
    contents: &TransactionalTree,
    source: &str,
    destination: &str,
    dest_info: &PathInfo,
    detach: bool,
) -> TxResult<Vec<(String, Guid)>> {
    Task::new(|| tx_require(nodes, source))
        .then(|src_root| Task::new(move || collect_subtree(nodes, src_root)))
        .then(|subtree| {
            Task::new(move || {
                // Content ids for the copies are assigned up front so that a
                // copied parent's children entries can reference its copied
                // children's ids.
                let mut copied_ids: HashMap<String, Guid> = HashMap::new();
                for record in &subtree {
                    let id = if detach {
                        Guid::generate()
                    } else {
                        record.content_id
                    };
                    copied_ids.insert(record.absolute_path(), id);
                }

                let mut visited = Vec::with_capacity(subtree.len());
                for record in &subtree {
                    let old_path = record.absolute_path();
                    let new_path = if old_path == source {
                        destination.to_string()
                    } else {
                        format!("{}{}", destination, &old_path[source.len()..])
                    };
                    if tx_get(nodes, &new_path)?.is_some() {
                        return Err(abort(FileDbError::DestinationExists(new_path)));
                    }
                    let new_info = path::path_info(&new_path).map_err(abort)?;

                    let mut copied = record.clone();
                    copied.name = new_info.name;
                    copied.location = new_info.location;
                    copied.content_id = copied_ids[&old_path];
                    if detach {
                        for child in copied.children.values_mut() {
                            let child_old = path::absolute_path(&old_path, &child.name);
                            if let Some(id) = copied_ids.get(&child_old) {
                                child.content_id = *id;
                            }
                        }
                        if let Some(blob) = contents.get(&record.content_id.key()[..])? {
                            contents.insert(copied.content_id.key(), blob.to_vec())?;
                        }
                    }
                    tx_put(nodes, &copied)?;
                    tx_incr_ref(contents, &copied.content_id)?;
                    visited.push((old_path, record.content_id));
                }

                let root_kind = subtree[0].kind.clone();
                let root_id = copied_ids[&subtree[0].absolute_path()];
                Ok((visited, root_kind, root_id))
            })
        })
        .then(|(visited, root_kind, root_id)| {
            Task::new(move || {
                let mut parent = tx_require_parent(nodes, &dest_info.location)?;
                parent.add_child(ChildInfo {
                    name: dest_info.name.clone(),
                    kind: root_kind,
                    content_id: root_id,
                });
                tx_put(nodes, &parent)?;
                Ok(visited)
            })
        })
        .run()
}

/// A content identifier, either direct or resolved through the node at a
/// path.
#[derive(Debug, Clone)]
pub enum ContentRef {
    Id(Guid),
    Path(String),
}

impl From<Guid> for ContentRef {
    fn from(id: Guid) -> Self {
        ContentRef::Id(id)
    }
}

impl From<&str> for ContentRef {
    fn from(path: &str) -> Self {
        ContentRef::Path(path.to_string())
    }
}

impl From<String> for ContentRef {
    fn from(path: String) -> Self {
        ContentRef::Path(path)
    }
}

/// Handle to one open store. Cheap to clone; all clones share the backend.
#[derive(Clone)]
pub struct FileDb {
    name: String,
    db: Db,
    nodes: Tree,
    contents: Tree,
    meta: Tree,
}

impl FileDb {
    /// Open (creating if absent) the named store under the configured data
    /// directory, bootstrapping the root record on first open or schema
    /// version upgrade.
    pub fn open(config: &FileDbConfig) -> Result<Self, FileDbError> {
        let store_path = config.store_path();
        info!(
            name = %config.name,
            version = config.version,
            path = %store_path.display(),
            "opening store"
        );
        let db = sled::open(&store_path)?;
        let nodes = db.open_tree(TREE_NODES)?;
        let contents = db.open_tree(TREE_CONTENTS)?;
        let meta = db.open_tree(TREE_META)?;
        let store = FileDb {
            name: config.name.clone(),
            db,
            nodes,
            contents,
            meta,
        };
        store.bootstrap(config.version)?;
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the root record and stamp the schema version when the stored
    /// version is behind the requested one.
    fn bootstrap(&self, version: u32) -> Result<(), FileDbError> {
        let stored = match self.meta.get(KEY_SCHEMA_VERSION)? {
            Some(raw) if raw.len() == 4 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            _ => 0,
        };
        if stored >= version {
            return Ok(());
        }
        info!(name = %self.name, stored, version, "bootstrapping store schema");
        let version_bytes = version.to_le_bytes();
        let result = (&self.nodes, &self.meta).transaction(|(nodes, meta)| {
            if nodes.get("/".as_bytes())?.is_none() {
                tx_put(nodes, &NodeRecord::root())?;
            }
            meta.insert(KEY_SCHEMA_VERSION, &version_bytes[..])?;
            Ok(())
        });
        unwrap_tx(result)
    }

    /// Fetch the node at a path.
    #[instrument(skip(self), fields(store = %self.name))]
    pub fn get_node(&self, abs_path: &str) -> Result<NodeRecord, FileDbError> {
        let abs_path = path::normalize_path(abs_path);
        let raw = self
            .nodes
            .get(abs_path.as_bytes())?
            .ok_or_else(|| FileDbError::NotFound(abs_path.clone()))?;
        let record = decode_record(&raw)?;
        debug!(path = %abs_path, "fetched node");
        Ok(record)
    }

    /// Immediate children of the node at a path, in presentation order
    /// (containers first, then by name).
    pub fn get_children(&self, abs_path: &str) -> Result<Vec<ChildInfo>, FileDbError> {
        let node = self.get_node(abs_path)?;
        let mut children: Vec<ChildInfo> = node.children.into_values().collect();
        children.sort_by(|a, b| {
            (a.kind.sort_rank(), a.name.as_str()).cmp(&(b.kind.sort_rank(), b.name.as_str()))
        });
        Ok(children)
    }

    /// Create or overwrite a node. The parent must already exist; its
    /// children index, the node record, and any supplied content blob are
    /// written in one transaction.
    #[instrument(skip(self, data), fields(store = %self.name))]
    pub fn put_node(&self, data: NodeData) -> Result<NodeRecord, FileDbError> {
        let mut data = data;
        let content = data.content.take();
        let record = NodeRecord::new(data)?;
        if record.name.is_empty() {
            return Err(FileDbError::InvalidName(record.name));
        }
        let abs_path = record.absolute_path();
        info!(path = %abs_path, kind = record.kind.as_str(), "saving node");

        let result = (&self.nodes, &self.contents).transaction(|(nodes, contents)| {
            Task::new(|| tx_require_parent(nodes, &record.location))
                .then(|mut parent| {
                    parent.add_child(record.child_info());
                    Task::new(move || tx_put(nodes, &parent))
                })
                .then(|()| {
                    Task::new(|| {
                        // Overwriting a record releases its previous content
                        // reference; a record keeping its id changes nothing.
                        match tx_get(nodes, &abs_path)? {
                            Some(previous) if previous.content_id != record.content_id => {
                                tx_decr_ref(contents, &previous.content_id)?;
                                tx_incr_ref(contents, &record.content_id)?;
                            }
                            Some(_) => {}
                            None => tx_incr_ref(contents, &record.content_id)?,
                        }
                        tx_put(nodes, &record)
                    })
                })
                .then(|()| {
                    Task::new(|| {
                        if let Some(bytes) = &content {
                            contents.insert(record.content_id.key(), bytes.clone())?;
                        }
                        Ok(())
                    })
                })
                .run()
        });
        unwrap_tx(result)?;
        debug!(path = %abs_path, "node saved");
        Ok(record)
    }

    /// Fetch a content blob by direct identifier or by the path of the node
    /// referencing it.
    #[instrument(skip(self, identifier), fields(store = %self.name))]
    pub fn get_content(&self, identifier: impl Into<ContentRef>) -> Result<Vec<u8>, FileDbError> {
        match identifier.into() {
            ContentRef::Id(id) => {
                debug!(content_id = %id, "fetching content by id");
                let raw = self
                    .contents
                    .get(id.key())?
                    .ok_or_else(|| FileDbError::Unresolvable(id.to_string()))?;
                Ok(raw.to_vec())
            }
            ContentRef::Path(raw_path) => {
                let abs_path = path::normalize_path(&raw_path);
                debug!(path = %abs_path, "fetching content by path");
                let result = (&self.nodes, &self.contents).transaction(|(nodes, contents)| {
                    Task::new(|| tx_require(nodes, &abs_path))
                        .then(|node| {
                            let missing = abs_path.clone();
                            Task::new(move || match contents.get(node.content_id.key())? {
                                Some(raw) => Ok(raw.to_vec()),
                                None => Err(abort(FileDbError::Unresolvable(missing))),
                            })
                        })
                        .run()
                });
                unwrap_tx(result)
            }
        }
    }

    /// Write a content blob under a direct identifier or under the content id
    /// of the node at a path.
    #[instrument(skip(self, identifier, content), fields(store = %self.name))]
    pub fn put_content(
        &self,
        identifier: impl Into<ContentRef>,
        content: impl Into<Vec<u8>>,
    ) -> Result<(), FileDbError> {
        let content = content.into();
        match identifier.into() {
            ContentRef::Id(id) => {
                debug!(content_id = %id, bytes = content.len(), "writing content by id");
                self.contents.insert(id.key(), content)?;
                Ok(())
            }
            ContentRef::Path(raw_path) => {
                let abs_path = path::normalize_path(&raw_path);
                debug!(path = %abs_path, bytes = content.len(), "writing content by path");
                let result = (&self.nodes, &self.contents).transaction(|(nodes, contents)| {
                    Task::new(|| tx_require(nodes, &abs_path))
                        .then(|node| {
                            let bytes = content.clone();
                            Task::new(move || {
                                contents.insert(node.content_id.key(), bytes)?;
                                Ok(())
                            })
                        })
                        .run()
                });
                unwrap_tx(result)
            }
        }
    }

    /// Remove the node at a path and every descendant, detaching the entry
    /// from its parent's children index. Each deleted record drops one
    /// reference to its content id; blobs still referenced by records outside
    /// the subtree survive. All deletions share one transaction.
    #[instrument(skip(self), fields(store = %self.name))]
    pub fn remove(&self, abs_path: &str) -> Result<(), FileDbError> {
        let abs_path = path::normalize_path(abs_path);
        let info = path::path_info(&abs_path)?;
        if info.name.is_empty() {
            return Err(FileDbError::InvalidName(info.name));
        }
        info!(path = %abs_path, "removing subtree");

        let result = (&self.nodes, &self.contents).transaction(|(nodes, contents)| {
            Task::new(|| tx_require(nodes, &abs_path))
                .then(|root| {
                    Task::new(|| tx_require_parent(nodes, &info.location))
                        .then(|mut parent| {
                            parent.remove_child(&info.name);
                            Task::new(move || tx_put(nodes, &parent))
                        })
                        .then(move |()| Task::new(move || collect_subtree(nodes, root)))
                })
                .then(|subtree| {
                    Task::new(move || {
                        for record in &subtree {
                            nodes.remove(record.absolute_path().into_bytes())?;
                            tx_decr_ref(contents, &record.content_id)?;
                        }
                        Ok(subtree.len())
                    })
                })
                .run()
        });
        let removed = unwrap_tx(result)?;
        debug!(path = %abs_path, removed, "subtree removed");
        Ok(())
    }

    /// Copy the subtree at `source` onto `destination`. Fails with
    /// `DestinationExists` if any destination path is already occupied
    /// (including `destination == source`). With `detach` set the copy owns
    /// independent content blobs; otherwise it aliases the source's.
    #[instrument(skip(self), fields(store = %self.name))]
    pub fn copy(
        &self,
        source: &str,
        destination: &str,
        detach: bool,
    ) -> Result<String, FileDbError> {
        let source = path::normalize_path(source);
        let destination = path::normalize_path(destination);
        let src_info = path::path_info(&source)?;
        let dest_info = path::path_info(&destination)?;
        if src_info.name.is_empty() || dest_info.name.is_empty() {
            return Err(FileDbError::InvalidName(String::new()));
        }
        info!(%source, %destination, detach, "copying subtree");

        let result = (&self.nodes, &self.contents).transaction(|(nodes, contents)| {
            copy_branch(nodes, contents, &source, &destination, &dest_info, detach)?;
            Ok(())
        });
        unwrap_tx(result)?;
        debug!(%source, %destination, "subtree copied");
        Ok(destination)
    }

    /// Move the subtree at `source` to `destination`: records are re-keyed,
    /// content blobs untouched (aliasing preserved, nothing duplicated).
    #[instrument(skip(self), fields(store = %self.name))]
    pub fn mv(&self, source: &str, destination: &str) -> Result<String, FileDbError> {
        let source = path::normalize_path(source);
        let destination = path::normalize_path(destination);
        let src_info = path::path_info(&source)?;
        let dest_info = path::path_info(&destination)?;
        if src_info.name.is_empty() || dest_info.name.is_empty() {
            return Err(FileDbError::InvalidName(String::new()));
        }
        // Moving a subtree into itself would delete the source records out
        // from under the freshly written destination.
        if destination.starts_with(&format!("{}/", source)) {
            return Err(FileDbError::InvalidLocation(destination));
        }
        info!(%source, %destination, "moving subtree");

        let result = (&self.nodes, &self.contents).transaction(|(nodes, contents)| {
            Task::new(|| tx_require_parent(nodes, &src_info.location))
                .then(|mut parent| {
                    parent.remove_child(&src_info.name);
                    Task::new(move || tx_put(nodes, &parent))
                })
                .then(|()| {
                    Task::new(|| {
                        copy_branch(nodes, contents, &source, &destination, &dest_info, false)
                    })
                })
                .then(|originals| {
                    Task::new(move || {
                        for (old_path, content_id) in &originals {
                            nodes.remove(old_path.clone().into_bytes())?;
                            tx_decr_ref(contents, content_id)?;
                        }
                        Ok(())
                    })
                })
                .run()
        });
        unwrap_tx(result)?;
        debug!(%source, %destination, "subtree moved");
        Ok(destination)
    }

    /// Number of stored content blobs (reference counters excluded).
    pub fn content_count(&self) -> usize {
        self.contents
            .iter()
            .keys()
            .filter_map(Result::ok)
            .filter(|key| !key.starts_with(REF_PREFIX))
            .count()
    }

    /// Number of stored node records (including the root).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), FileDbError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Explicit registry of open store handles, one per store name.
///
/// Repeated opens of the same name reuse the cached handle; `close` flushes
/// and drops it. Interior mutability keeps the registry shareable without
/// the caller holding a lock.
pub struct FileDbRegistry {
    open: Mutex<HashMap<String, FileDb>>,
}

impl FileDbRegistry {
    pub fn new() -> Self {
        FileDbRegistry {
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Open the named store, reusing the cached handle when present.
    pub fn open(&self, config: &FileDbConfig) -> Result<FileDb, FileDbError> {
        let mut open = self.open.lock();
        if let Some(store) = open.get(&config.name) {
            debug!(name = %config.name, "reusing cached store handle");
            return Ok(store.clone());
        }
        let store = FileDb::open(config)?;
        open.insert(config.name.clone(), store.clone());
        Ok(store)
    }

    /// Flush and drop the cached handle for a store name. Returns whether a
    /// handle was open.
    pub fn close(&self, name: &str) -> Result<bool, FileDbError> {
        match self.open.lock().remove(name) {
            Some(store) => {
                store.flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for FileDbRegistry {
    fn default() -> Self {
        Self::new()
    }
}
