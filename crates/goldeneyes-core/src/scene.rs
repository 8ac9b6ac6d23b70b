//! Minimal scene graph surface used by the tracking session.
//!
//! The renderer owns the real scene; [`SceneGraph`] is the narrow set of
//! operations the session needs from it. [`SceneTree`] is an in-memory
//! implementation used by the daemon, the CLI replay and the tests.

use crate::types::Placement;
use glam::{Quat, Vec3};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SceneError {
    #[error("unknown scene node {0}")]
    UnknownNode(NodeId),
    #[error("node {0} is already attached")]
    AlreadyAttached(NodeId),
    #[error("node {0} is not attached")]
    NotAttached(NodeId),
    #[error("node {0} is still attached and cannot be removed")]
    StillAttached(NodeId),
    #[error("node {0} still has children")]
    HasChildren(NodeId),
    #[error("attaching {node} under {parent} would create a cycle")]
    Cycle { node: NodeId, parent: NodeId },
    #[error("the root node cannot be moved or removed")]
    Root,
}

/// Opaque handle to a node in a scene graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node renders as.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Root,
    /// Invisible transform parent.
    Anchor,
    Sphere { radius: f32 },
}

/// Operations the session performs on the host renderer's scene.
pub trait SceneGraph {
    fn root(&self) -> NodeId;

    /// Create a detached node with an identity transform.
    fn create_node(&mut self, kind: NodeKind) -> NodeId;

    fn attach(&mut self, node: NodeId, parent: NodeId) -> Result<(), SceneError>;

    fn detach(&mut self, node: NodeId) -> Result<(), SceneError>;

    /// Set a node's transform relative to its parent.
    fn set_transform(
        &mut self,
        node: NodeId,
        position: Vec3,
        orientation: Quat,
        scale: f32,
    ) -> Result<(), SceneError>;

    /// Destroy a detached, childless node.
    fn remove_node(&mut self, node: NodeId) -> Result<(), SceneError>;

    /// Number of live nodes, root included.
    fn node_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
struct SceneNode {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    position: Vec3,
    orientation: Quat,
    scale: f32,
}

impl SceneNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale: 1.0,
        }
    }
}

/// In-memory scene graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneTree {
    nodes: BTreeMap<NodeId, SceneNode>,
    root: NodeId,
    next_id: u32,
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneTree {
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(root, SceneNode::new(NodeKind::Root));
        Self {
            nodes,
            root,
            next_id: 1,
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(&node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node).map(|n| n.kind)
    }

    /// Whether the node is connected to the root through its parents.
    pub fn is_in_scene(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Transform relative to the parent, with its uniform scale.
    pub fn local_transform(&self, node: NodeId) -> Option<(Placement, f32)> {
        self.nodes
            .get(&node)
            .map(|n| (Placement::new(n.position, n.orientation), n.scale))
    }

    /// Placement in world space, ignoring parent scale.
    pub fn world_placement(&self, node: NodeId) -> Option<Placement> {
        let mut chain = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let n = self.nodes.get(&id)?;
            chain.push(Placement::new(n.position, n.orientation));
            current = n.parent;
        }
        Some(
            chain
                .iter()
                .rev()
                .fold(Placement::IDENTITY, |acc, local| acc.then(local)),
        )
    }

    fn node(&self, node: NodeId) -> Result<&SceneNode, SceneError> {
        self.nodes.get(&node).ok_or(SceneError::UnknownNode(node))
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut SceneNode, SceneError> {
        self.nodes.get_mut(&node).ok_or(SceneError::UnknownNode(node))
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }
}

impl SceneGraph for SceneTree {
    fn root(&self) -> NodeId {
        self.root
    }

    fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, SceneNode::new(kind));
        tracing::trace!(node = %id, ?kind, "scene node created");
        id
    }

    fn attach(&mut self, node: NodeId, parent: NodeId) -> Result<(), SceneError> {
        if node == self.root {
            return Err(SceneError::Root);
        }
        self.node(parent)?;
        if self.node(node)?.parent.is_some() {
            return Err(SceneError::AlreadyAttached(node));
        }
        if self.is_ancestor(node, parent) {
            return Err(SceneError::Cycle { node, parent });
        }

        self.node_mut(node)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(node);
        tracing::trace!(node = %node, parent = %parent, "scene node attached");
        Ok(())
    }

    fn detach(&mut self, node: NodeId) -> Result<(), SceneError> {
        if node == self.root {
            return Err(SceneError::Root);
        }
        let parent = self.node(node)?.parent.ok_or(SceneError::NotAttached(node))?;

        self.node_mut(parent)?.children.retain(|&c| c != node);
        self.node_mut(node)?.parent = None;
        tracing::trace!(node = %node, parent = %parent, "scene node detached");
        Ok(())
    }

    fn set_transform(
        &mut self,
        node: NodeId,
        position: Vec3,
        orientation: Quat,
        scale: f32,
    ) -> Result<(), SceneError> {
        if node == self.root {
            return Err(SceneError::Root);
        }
        let n = self.node_mut(node)?;
        n.position = position;
        n.orientation = orientation;
        n.scale = scale;
        Ok(())
    }

    fn remove_node(&mut self, node: NodeId) -> Result<(), SceneError> {
        if node == self.root {
            return Err(SceneError::Root);
        }
        let n = self.node(node)?;
        if n.parent.is_some() {
            return Err(SceneError::StillAttached(node));
        }
        if !n.children.is_empty() {
            return Err(SceneError::HasChildren(node));
        }
        self.nodes.remove(&node);
        tracing::trace!(node = %node, "scene node removed");
        Ok(())
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
