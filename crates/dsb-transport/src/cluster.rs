//! Static cluster directory: node id → where to reach it.
//!
//! Loaded once at startup and read-only afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{NodeId, TransportError};

/// Reliable port of node `i` in a default layout is `5000 + i`.
pub const DEFAULT_RELIABLE_BASE_PORT: u16 = 5000;

/// Self-stabilizing port of node `i` in a default layout is `7000 + i`.
pub const DEFAULT_STABILIZING_BASE_PORT: u16 = 7000;

/// Monitoring (status API) port of node `i` is `4000 + i`.
pub const DEFAULT_MONITORING_BASE_PORT: u16 = 4000;

/// One cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub hostname: String,
    pub reliable_port: u16,
    pub stabilizing_port: u16,
}

impl NodeDescriptor {
    pub fn new(
        id: NodeId,
        hostname: impl Into<String>,
        reliable_port: u16,
        stabilizing_port: u16,
    ) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            reliable_port,
            stabilizing_port,
        }
    }

    /// Descriptor on `127.0.0.1` with the default port layout.
    pub fn localhost(id: NodeId) -> Self {
        Self::new(
            id,
            "127.0.0.1",
            offset_port(DEFAULT_RELIABLE_BASE_PORT, id),
            offset_port(DEFAULT_STABILIZING_BASE_PORT, id),
        )
    }

    /// Monitoring port derived from the node id.
    pub fn monitoring_port(&self, base: u16) -> u16 {
        offset_port(base, self.id)
    }
}

fn offset_port(base: u16, id: NodeId) -> u16 {
    base.saturating_add(u16::try_from(id.get()).unwrap_or(u16::MAX))
}

/// All cluster members, ordered by id. Includes the local node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterDirectory {
    nodes: BTreeMap<NodeId, NodeDescriptor>,
}

impl ClusterDirectory {
    /// Build a directory, rejecting duplicate ids.
    pub fn new(
        nodes: impl IntoIterator<Item = NodeDescriptor>,
    ) -> Result<Self, TransportError> {
        let mut map = BTreeMap::new();
        for node in nodes {
            let id = node.id;
            if map.insert(id, node).is_some() {
                return Err(TransportError::DuplicateNode(id));
            }
        }
        Ok(Self { nodes: map })
    }

    /// `n` nodes on localhost with the default port layout.
    pub fn localhost(n: u32) -> Self {
        Self {
            nodes: (0..n)
                .map(|i| {
                    let id = NodeId::new(i);
                    (id, NodeDescriptor::localhost(id))
                })
                .collect(),
        }
    }

    /// Load a hosts file.
    ///
    /// One node per line: `id hostname reliable_port [stabilizing_port]`,
    /// whitespace or comma separated. `#` starts a comment. A missing
    /// stabilizing port defaults to `7000 + id`.
    pub fn from_hosts_file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TransportError::ClusterFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse hosts-file text (see [`from_hosts_file`](Self::from_hosts_file)).
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let mut nodes = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty())
                .collect();

            let invalid = |reason: &str| TransportError::InvalidCluster {
                line: line_no,
                reason: reason.to_string(),
            };

            if fields.len() < 3 || fields.len() > 4 {
                return Err(invalid("expected `id hostname reliable_port [stabilizing_port]`"));
            }

            let id: NodeId = fields[0].parse().map_err(|_| invalid("bad node id"))?;
            let reliable_port: u16 = fields[2]
                .parse()
                .map_err(|_| invalid("bad reliable port"))?;
            let stabilizing_port = match fields.get(3) {
                Some(p) => p.parse().map_err(|_| invalid("bad stabilizing port"))?,
                None => offset_port(DEFAULT_STABILIZING_BASE_PORT, id),
            };

            nodes.push(NodeDescriptor::new(id, fields[1], reliable_port, stabilizing_port));
        }

        Self::new(nodes)
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeDescriptor> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.values()
    }

    /// Every member except `local`.
    pub fn peers_of(&self, local: NodeId) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.values().filter(move |n| n.id != local)
    }
}
