//! Static cluster topology.
//!
//! The topology is read once at startup from a plain-text peer list and is
//! immutable afterwards. Each meaningful line is an `id, address` pair:
//!
//! ```text
//! # id, address
//! 1, tcp://127.0.0.1:5001
//! 2, tcp://127.0.0.1:5002
//! ```
//!
//! Any line containing `#` is a comment and blank lines are skipped. Node IDs
//! and addresses must both be unique; the first violation aborts the load.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::node::NodeId;

/// Marks a line as a comment wherever it appears.
pub const COMMENT_MARKER: char = '#';

/// Separates the ID from the address.
pub const FIELD_DELIMITER: char = ',';

/// Validated, immutable set of `(id, address)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// IDs in configuration order.
    order: Vec<NodeId>,
    addresses: BTreeMap<NodeId, String>,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Parse a topology from configuration text.
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        Self::load(source.as_bytes())
    }

    /// Read a topology from a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::load(BufReader::new(file))
    }

    /// Read a topology line by line, stopping at the first rejected line.
    pub fn load<R: BufRead>(reader: R) -> Result<Self, ConfigError> {
        let mut builder = TopologyBuilder::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = index + 1;

            let accepted = parse_line(&line, line_no).and_then(|parsed| match parsed {
                Some((id, address)) => builder.insert(id, address).map(|_| ()),
                None => Ok(()),
            });

            if let Err(err) = accepted {
                warn!(line = line_no, error = %err, "rejecting topology");
                return Err(err);
            }
        }

        let topology = builder.build();
        debug!(nodes = topology.len(), "topology loaded");
        Ok(topology)
    }

    /// Node IDs in configuration order.
    pub fn ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn address(&self, id: NodeId) -> Option<&str> {
        self.addresses.get(&id).map(String::as_str)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.addresses.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(id, address)` pairs in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &str)> + '_ {
        self.order
            .iter()
            .map(move |id| (*id, self.addresses[id].as_str()))
    }
}

/// Incremental topology construction enforcing both uniqueness invariants.
///
/// A builder that returned an error holds a partial topology; callers drop
/// it rather than building from it.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    order: Vec<NodeId>,
    addresses: BTreeMap<NodeId, String>,
    owners: HashMap<String, NodeId>,
}

impl TopologyBuilder {
    pub fn insert(
        &mut self,
        id: NodeId,
        address: impl Into<String>,
    ) -> Result<&mut Self, ConfigError> {
        let address = address.into();

        if self.addresses.contains_key(&id) {
            return Err(ConfigError::DuplicateId { id });
        }
        if let Some(existing) = self.owners.get(&address) {
            return Err(ConfigError::DuplicateAddress {
                address,
                existing: *existing,
            });
        }

        self.order.push(id);
        self.owners.insert(address.clone(), id);
        self.addresses.insert(id, address);
        Ok(self)
    }

    pub fn build(self) -> Topology {
        Topology {
            order: self.order,
            addresses: self.addresses,
        }
    }
}

/// Returns `None` for comments and blank lines.
fn parse_line(line: &str, line_no: usize) -> Result<Option<(NodeId, String)>, ConfigError> {
    if line.contains(COMMENT_MARKER) || line.trim().is_empty() {
        return Ok(None);
    }

    let unparseable = |reason: String| ConfigError::Unparseable {
        line: line_no,
        reason,
    };

    let (id, address) = line
        .split_once(FIELD_DELIMITER)
        .ok_or_else(|| unparseable(format!("expected `id{FIELD_DELIMITER} address`")))?;

    let id = id.trim();
    let address = address.trim();

    let id: i32 = id
        .parse()
        .map_err(|_| unparseable(format!("node ID `{id}` is not an integer")))?;
    let id = NodeId(id);
    if id.is_broadcast() {
        return Err(unparseable(format!(
            "node ID {id} is reserved for broadcast"
        )));
    }

    if address.is_empty() {
        return Err(unparseable("missing address".to_string()));
    }
    if address.contains(FIELD_DELIMITER) {
        return Err(unparseable(format!("address `{address}` has extra fields")));
    }

    Ok(Some((id, address.to_owned())))
}
