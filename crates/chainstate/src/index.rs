//! In-memory block tree covering every known branch.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hxd_consensus::Hash256;
use hxd_primitives::hash_to_hex;

use crate::blocknode::{BlockNode, NodeId};
use crate::state::ChainError;

/// Number of timestamps, ending at a block, whose median gives that block's
/// past median time.
pub const MEDIAN_TIME_BLOCKS: usize = 11;

fn invert_lowest_one(value: i64) -> i64 {
    value & value.saturating_sub(1)
}

fn get_skip_height(height: i64) -> i64 {
    if height < 2 {
        0
    } else if (height & 1) != 0 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// Arena of block nodes. Nodes are only ever appended and refer to their
/// ancestors by position, so a [`NodeId`] stays valid for the tree's life.
#[derive(Default)]
pub struct BlockTree {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<Hash256, NodeId>,
    chain_tips: HashMap<i64, Vec<NodeId>>,
}

/// Borrowed handle to a node that can walk its ancestry.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a BlockTree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'a BlockTree {
        self.tree
    }

    pub fn node(&self) -> &'a BlockNode {
        &self.tree.nodes[self.id]
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.node().parent.map(|id| self.tree.get(id))
    }

    /// Ancestor at `height`, or `None` when the height is negative or above
    /// this node.
    pub fn ancestor(&self, height: i64) -> Option<NodeRef<'a>> {
        self.tree
            .ancestor_id(self.id, height)
            .map(|id| self.tree.get(id))
    }

    pub fn relative_ancestor(&self, distance: i64) -> Option<NodeRef<'a>> {
        self.ancestor(self.node().height - distance)
    }

    /// Iterates from this node back to genesis.
    pub fn walk(&self) -> impl Iterator<Item = NodeRef<'a>> {
        std::iter::successors(Some(*self), |node| node.parent())
    }
}

impl Deref for NodeRef<'_> {
    type Target = BlockNode;

    fn deref(&self) -> &BlockNode {
        self.node()
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl std::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("height", &self.height)
            .field("hash", &hash_to_hex(&self.hash))
            .finish()
    }
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Panics if `id` did not come from this tree.
    pub fn get(&self, id: NodeId) -> NodeRef<'_> {
        debug_assert!(id < self.nodes.len());
        NodeRef { tree: self, id }
    }

    pub fn lookup_node(&self, hash: &Hash256) -> Option<NodeRef<'_>> {
        self.by_hash.get(hash).map(|id| self.get(*id))
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Links `node` to its parent and inserts it. The first node of an empty
    /// tree must be a genesis block at height zero; every later node needs
    /// its parent already present.
    pub fn add_node(&mut self, mut node: BlockNode) -> Result<NodeId, ChainError> {
        if self.by_hash.contains_key(&node.hash) {
            return Err(ChainError::DuplicateBlock(node.hash));
        }

        let parent = if self.nodes.is_empty() && node.height == 0 {
            None
        } else {
            let parent_id = *self
                .by_hash
                .get(&node.prev_hash)
                .ok_or(ChainError::MissingParent(node.prev_hash))?;
            let expected = self.nodes[parent_id].height + 1;
            if node.height != expected {
                return Err(ChainError::InvalidHeight {
                    expected,
                    got: node.height,
                });
            }
            Some(parent_id)
        };

        let id = self.nodes.len();
        node.parent = parent;
        node.skip = None;
        if let Some(parent_id) = parent {
            let parent_node = &self.nodes[parent_id];
            node.work_sum = node.work_sum.saturating_add(parent_node.work_sum);
            node.skip = self.ancestor_id(parent_id, get_skip_height(node.height));

            let parent_height = parent_node.height;
            if let Some(tips) = self.chain_tips.get_mut(&parent_height) {
                tips.retain(|tip| *tip != parent_id);
                if tips.is_empty() {
                    self.chain_tips.remove(&parent_height);
                }
            }
        }

        self.chain_tips.entry(node.height).or_default().push(id);
        self.by_hash.insert(node.hash, id);
        self.nodes.push(node);
        Ok(id)
    }

    /// Every node without a child, ordered by height then insertion.
    pub fn chain_tips(&self) -> Vec<NodeRef<'_>> {
        let mut heights: Vec<&i64> = self.chain_tips.keys().collect();
        heights.sort_unstable();
        heights
            .into_iter()
            .flat_map(|height| self.chain_tips[height].iter())
            .map(|id| self.get(*id))
            .collect()
    }

    /// Tip with the most cumulative work. Ties go to the tip inserted first.
    pub fn best_chain_tip(&self) -> Option<NodeRef<'_>> {
        self.chain_tips
            .values()
            .flatten()
            .map(|id| self.get(*id))
            .max_by(|a, b| a.work_sum.cmp(&b.work_sum).then(b.id.cmp(&a.id)))
    }

    /// Latest common ancestor of two nodes.
    pub fn find_fork<'a>(&'a self, a: NodeRef<'a>, b: NodeRef<'a>) -> Option<NodeRef<'a>> {
        let height = a.height.min(b.height);
        let mut a = a.ancestor(height)?;
        let mut b = b.ancestor(height)?;
        while a.id != b.id {
            a = a.parent()?;
            b = b.parent()?;
        }
        Some(a)
    }

    /// Median timestamp of up to [`MEDIAN_TIME_BLOCKS`] blocks ending at
    /// `node`. With an even count the upper middle element is used.
    pub fn calc_past_median_time(&self, node: NodeRef<'_>) -> i64 {
        let mut times: Vec<i64> = node
            .walk()
            .take(MEDIAN_TIME_BLOCKS)
            .map(|node| node.timestamp)
            .collect();
        times.sort_unstable();
        times[times.len() / 2]
    }

    pub fn set_status(&mut self, id: NodeId, flags: u8) {
        self.nodes[id].status |= flags;
    }

    pub fn clear_status(&mut self, id: NodeId, flags: u8) {
        self.nodes[id].status &= !flags;
    }

    fn ancestor_id(&self, id: NodeId, height: i64) -> Option<NodeId> {
        let start_height = self.nodes[id].height;
        if height < 0 || height > start_height {
            return None;
        }

        let mut walk = id;
        let mut walk_height = start_height;
        while walk_height > height {
            let node = &self.nodes[walk];
            let skip_height = get_skip_height(walk_height);
            let prev_skip_height = get_skip_height(walk_height - 1);
            let take_skip = skip_height == height
                || (skip_height > height
                    && !(prev_skip_height < skip_height - 2 && prev_skip_height >= height));
            match node.skip {
                Some(skip) if take_skip => {
                    walk = skip;
                    walk_height = skip_height;
                }
                _ => {
                    walk = node.parent?;
                    walk_height -= 1;
                }
            }
        }
        Some(walk)
    }
}

/// Block tree behind its own reader/writer lock.
#[derive(Default)]
pub struct BlockIndex {
    tree: RwLock<BlockTree>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BlockTree> {
        self.tree.read().expect("block index lock")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, BlockTree> {
        self.tree.write().expect("block index lock")
    }

    pub fn add_node(&self, node: BlockNode) -> Result<NodeId, ChainError> {
        let mut tree = self.write();
        let height = node.height;
        let hash = node.hash;
        let id = tree.add_node(node)?;
        hxd_log::log_debug!("new chain tip {} at height {}", hash_to_hex(&hash), height);
        Ok(id)
    }

    pub fn lookup_node(&self, hash: &Hash256) -> Option<BlockNode> {
        self.read().lookup_node(hash).map(|node| node.node().clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
