//! Hierarchical grouping of entities, rebuilt from flat assembly records.
//!
//! A region reports its assemblies as a flat list of `{name, members}` records
//! where a member may itself be an assembly. The roots are the assemblies
//! that are nobody's member; they and their children are visited in
//! reporting order. Entity members resolve to flattened dataset indices
//! through a [`DatasetIndexMap`].

use crate::algs::collective::{Collective, ELECTED_RANK};
use crate::algs::communicator::Communicator;
use crate::database::regions::RegionMap;
use crate::database::registry::DatabaseRegistry;
use crate::database::timeline::Timeline;
use crate::io::{AssemblyMember, AssemblyRecord, Region, RegionSource};
use crate::mesh_error::MeshDbError;
use crate::metadata::schema::DatasetIndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Name of the root node of every assembly tree.
pub const ASSEMBLY_ROOT_NAME: &str = "Assemblies";

/// Identifier of a node within one [`DataAssembly`].
pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyNode {
    /// Sanitized name, usable as a path component.
    pub name: String,
    /// Original, user-facing name.
    pub label: String,
    pub children: Vec<NodeId>,
    pub dataset_indices: Vec<usize>,
}

/// Arena-backed tree; node `0` is the root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAssembly {
    nodes: Vec<AssemblyNode>,
}

/// Turn an arbitrary label into a valid node name.
///
/// Characters outside `[A-Za-z0-9_.-]` become `_`, and names that do not
/// start with a letter or `_` are prefixed with `_`.
pub fn make_valid_node_name(label: &str) -> String {
    let mut name: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

impl DataAssembly {
    pub fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![AssemblyNode {
                name: make_valid_node_name(root_name),
                label: root_name.to_string(),
                children: Vec::new(),
                dataset_indices: Vec::new(),
            }],
        }
    }

    pub const fn root(&self) -> NodeId {
        0
    }

    pub fn add_node(&mut self, label: &str, parent: NodeId) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(AssemblyNode {
            name: make_valid_node_name(label),
            label: label.to_string(),
            children: Vec::new(),
            dataset_indices: Vec::new(),
        });
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    pub fn add_dataset_index(&mut self, node: NodeId, index: usize) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.dataset_indices.push(index);
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&AssemblyNode> {
        self.nodes.get(id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Node reached by following child names from the root.
    pub fn find_path(&self, names: &[&str]) -> Option<NodeId> {
        names.iter().try_fold(self.root(), |node, name| {
            self.children(node)
                .iter()
                .copied()
                .find(|&c| self.nodes[c].name == *name)
        })
    }

    /// Dataset indices at and below `node`, depth first.
    pub fn dataset_indices_below(&self, node: NodeId) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            let Some(current) = self.nodes.get(n) else {
                continue;
            };
            out.extend_from_slice(&current.dataset_indices);
            stack.extend(current.children.iter().rev());
        }
        out
    }

    /// Build the tree for `records` under a fresh root.
    ///
    /// Returns `None` when there is no root assembly. With `add_leaves`, each
    /// entity member gets its own leaf node; otherwise its dataset index is
    /// attached to the owning assembly node.
    pub fn build(
        records: &[AssemblyRecord],
        index_map: &DatasetIndexMap,
        add_leaves: bool,
    ) -> Option<Self> {
        let children: HashSet<&str> = records
            .iter()
            .flat_map(|r| r.members.iter())
            .filter_map(|m| match m {
                AssemblyMember::Assembly(name) => Some(name.as_str()),
                AssemblyMember::Entity(..) => None,
            })
            .collect();
        let roots: Vec<&AssemblyRecord> = records
            .iter()
            .filter(|r| !children.contains(r.name.as_str()))
            .collect();
        if roots.is_empty() {
            return None;
        }

        let by_name: HashMap<&str, &AssemblyRecord> =
            records.iter().map(|r| (r.name.as_str(), r)).collect();
        let mut builder = Builder {
            assembly: Self::new(ASSEMBLY_ROOT_NAME),
            by_name,
            index_map,
            add_leaves,
            active: Vec::new(),
        };
        for record in roots {
            builder.process(record, 0);
        }
        Some(builder.assembly)
    }
}

struct Builder<'a> {
    assembly: DataAssembly,
    by_name: HashMap<&'a str, &'a AssemblyRecord>,
    index_map: &'a DatasetIndexMap,
    add_leaves: bool,
    active: Vec<&'a str>,
}

impl<'a> Builder<'a> {
    fn process(&mut self, record: &'a AssemblyRecord, parent: NodeId) {
        if self.active.contains(&record.name.as_str()) {
            log::warn!("assembly '{}' contains itself; ignoring the cycle", record.name);
            return;
        }
        self.active.push(&record.name);
        let node = self.assembly.add_node(&record.name, parent);
        for member in &record.members {
            match member {
                AssemblyMember::Assembly(child) => {
                    let found = self.by_name.get(child.as_str()).copied();
                    match found {
                        Some(nested) => self.process(nested, node),
                        None => log::warn!(
                            "assembly '{}' names unknown member '{child}'",
                            record.name
                        ),
                    }
                }
                AssemblyMember::Entity(kind, name) => {
                    let Some(index) = self.index_map.get(*kind, name) else {
                        log::trace!("no dataset index for {kind} '{name}'");
                        continue;
                    };
                    let target = if self.add_leaves {
                        self.assembly.add_node(name, node)
                    } else {
                        node
                    };
                    self.assembly.add_dataset_index(target, index);
                }
            }
        }
        self.active.pop();
    }
}

/// Assembly tree plus the tag identifying the pass that produced it.
///
/// A tag of `0` means no assembly was found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedAssembly {
    pub tag: u64,
    pub assembly: Option<DataAssembly>,
}

/// Build the assembly on the elected rank from the first file of the first
/// timestep and broadcast it.
pub fn update_assembly<S, C>(
    registry: &DatabaseRegistry,
    timeline: &Timeline,
    regions: &mut RegionMap<S>,
    coll: &mut Collective<C>,
    index_map: &DatasetIndexMap,
    tag: u64,
) -> Result<TaggedAssembly, MeshDbError>
where
    S: RegionSource,
    C: Communicator,
{
    let local = if coll.rank() == ELECTED_RANK {
        elected_assembly(registry, timeline, regions, coll.size(), index_map, tag)
    } else {
        Err(MeshDbError::CollectiveFailed { root: ELECTED_RANK })
    };
    coll.broadcast(ELECTED_RANK, local)
}

fn elected_assembly<S: RegionSource>(
    registry: &DatabaseRegistry,
    timeline: &Timeline,
    regions: &mut RegionMap<S>,
    size: usize,
    index_map: &DatasetIndexMap,
    tag: u64,
) -> Result<TaggedAssembly, MeshDbError> {
    let handles = timeline.resolve_handles(registry, ELECTED_RANK, size, 0)?;
    let Some(handle) = handles.first() else {
        return Ok(TaggedAssembly { tag: 0, assembly: None });
    };
    let records = regions.region(registry, handle)?.assemblies();
    let assembly = DataAssembly::build(&records, index_map, true);
    Ok(TaggedAssembly {
        tag: if assembly.is_some() { tag } else { 0 },
        assembly,
    })
}
