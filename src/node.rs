//! Node records: the filesystem-like entries held in the store.

use crate::error::FileDbError;
use crate::guid::Guid;
use crate::path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TAG_ROOT: &str = "application/vnd.baz.root";
const TAG_SOLUTION: &str = "application/vnd.baz.solution";
const TAG_PROJECT: &str = "application/vnd.baz.project";
const TAG_DIRECTORY: &str = "application/vnd.baz.directory";

/// Node classification.
///
/// Recognized tags get a variant for exhaustive matching; anything else
/// (typically a content mimetype such as `text/vnd.ms-typescript`) is carried
/// verbatim in `Other`. The store itself never validates the kind; it only
/// drives presentation (icon and sort order) in consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Root,
    Solution,
    Project,
    Directory,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Root => TAG_ROOT,
            NodeKind::Solution => TAG_SOLUTION,
            NodeKind::Project => TAG_PROJECT,
            NodeKind::Directory => TAG_DIRECTORY,
            NodeKind::Other(tag) => tag,
        }
    }

    /// Presentation ordering: containers sort before plain entries.
    pub fn sort_rank(&self) -> u8 {
        match self {
            NodeKind::Root => 0,
            NodeKind::Solution => 1,
            NodeKind::Project => 2,
            NodeKind::Directory => 3,
            NodeKind::Other(_) => 4,
        }
    }
}

impl From<String> for NodeKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            TAG_ROOT => NodeKind::Root,
            TAG_SOLUTION => NodeKind::Solution,
            TAG_PROJECT => NodeKind::Project,
            TAG_DIRECTORY => NodeKind::Directory,
            _ => NodeKind::Other(tag),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Denormalized entry in a parent's children index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildInfo {
    pub name: String,
    pub kind: NodeKind,
    pub content_id: Guid,
}

/// Caller-supplied data for creating or overwriting a node.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub name: String,
    pub location: String,
    pub kind: NodeKind,
    /// Generated when absent.
    pub content_id: Option<Guid>,
    pub children: Option<BTreeMap<String, ChildInfo>>,
    /// Initial content blob, written in the same transaction as the record.
    pub content: Option<Vec<u8>>,
}

impl NodeData {
    pub fn new(name: impl Into<String>, location: impl Into<String>, kind: NodeKind) -> Self {
        NodeData {
            name: name.into(),
            location: location.into(),
            kind,
            content_id: None,
            children: None,
            content: None,
        }
    }

    pub fn directory(name: impl Into<String>, location: impl Into<String>) -> Self {
        NodeData::new(name, location, NodeKind::Directory)
    }

    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_content_id(mut self, content_id: Guid) -> Self {
        self.content_id = Some(content_id);
        self
    }
}

/// One filesystem-like entry, keyed in the backend by its absolute path.
///
/// Integrity invariant: every `children` entry corresponds to an existing
/// record whose `location` equals this record's absolute path and whose
/// `name` matches the entry key. The store maintains this inside the same
/// transaction as any insert or delete of a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub location: String,
    pub kind: NodeKind,
    pub content_id: Guid,
    pub children: BTreeMap<String, ChildInfo>,
}

impl NodeRecord {
    /// Validate caller-supplied data into a record, generating a content id
    /// when none was provided. Fails before any transaction is opened.
    pub fn new(data: NodeData) -> Result<Self, FileDbError> {
        let name = path::validate_name(&data.name)?;
        let location = path::validate_location(&data.location)?;
        Ok(NodeRecord {
            name,
            location,
            kind: data.kind,
            content_id: data.content_id.unwrap_or_else(Guid::generate),
            children: data.children.unwrap_or_default(),
        })
    }

    /// The sentinel record at `/`, created once during store bootstrap.
    pub(crate) fn root() -> Self {
        NodeRecord {
            name: String::new(),
            location: "/".to_string(),
            kind: NodeKind::Root,
            content_id: Guid::generate(),
            children: BTreeMap::new(),
        }
    }

    pub fn absolute_path(&self) -> String {
        path::absolute_path(&self.location, &self.name)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Add or overwrite this record's entry in a parent's children index.
    pub fn add_child(&mut self, child: ChildInfo) {
        self.children.insert(child.name.clone(), child);
    }

    pub fn remove_child(&mut self, name: &str) {
        self.children.remove(name);
    }

    /// The denormalized form of this record for its parent's index.
    pub fn child_info(&self) -> ChildInfo {
        ChildInfo {
            name: self.name.clone(),
            kind: self.kind.clone(),
            content_id: self.content_id,
        }
    }
}
