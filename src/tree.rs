//! The search tree. Nodes live in an arena addressed by `i32`; the arena
//! only grows while workers are sampling, so indices stay valid for the
//! lifetime of a root. Statistics are plain atomics and are updated without
//! structural locking; the readers-writer lock guards arena growth only.

use crate::movegen::{moves, random_move, Move};
use crate::state::State;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Playouts longer than this are scored as draws. Bounds the cost of
/// self-checking games that pseudo-legal play can extend via repetition.
pub const PLAYOUT_PLY_CAP: usize = 200;

const UCT_EXPLORATION: f64 = std::f64::consts::SQRT_2;

/// Compare-and-swap accumulator for f64 over atomic bits.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn fetch_add(&self, value: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(current) + value).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Debug)]
pub struct Node {
    parent: i32,
    mov: Move,
    children: Vec<i32>,
    expanded: bool,
    visits: AtomicU64,
    wins: AtomicF64,
}

impl Node {
    fn new(parent: i32, mov: Move) -> Self {
        Self {
            parent,
            mov,
            children: Vec::new(),
            expanded: false,
            visits: AtomicU64::new(0),
            wins: AtomicF64::new(0.0),
        }
    }

    fn carried(parent: i32, from: &Node) -> Self {
        Self {
            parent,
            mov: from.mov,
            children: Vec::new(),
            expanded: from.expanded,
            visits: AtomicU64::new(from.visits()),
            wins: AtomicF64::new(from.wins()),
        }
    }

    fn update(&self, result: f64) {
        self.visits.fetch_add(1, Ordering::Relaxed);
        self.wins.fetch_add(result);
    }

    pub fn visits(&self) -> u64 {
        self.visits.load(Ordering::Relaxed)
    }

    /// Accumulated results viewed from the side that moved into this node.
    pub fn wins(&self) -> f64 {
        self.wins.load()
    }
}

struct Arena {
    nodes: Vec<Node>,
    root: i32,
}

impl Arena {
    fn fresh() -> Self {
        Self {
            nodes: vec![Node::new(-1, Move::NULL)],
            root: 0,
        }
    }

    /// Copies the subtree under `new_root` into a fresh arena, preserving
    /// per-parent child order (the best-move tie break depends on it). The
    /// former root and every sibling subtree are dropped with the old arena.
    fn reparented(&self, new_root: i32) -> Self {
        let mut nodes: Vec<Node> = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((new_root, -1));
        while let Some((old, new_parent)) = queue.pop_front() {
            let old_node = &self.nodes[old as usize];
            let new_index = nodes.len() as i32;
            if new_parent >= 0 {
                nodes[new_parent as usize].children.push(new_index);
            }
            nodes.push(Node::carried(new_parent, old_node));
            for &child in &old_node.children {
                queue.push_back((child, new_index));
            }
        }
        Self { nodes, root: 0 }
    }
}

pub struct Tree {
    arena: RwLock<Arena>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("empty tree")]
    Empty,
    #[error("node index {0} out of range")]
    BadIndex(i32),
    #[error("unknown move encoding {0:#06x}")]
    BadMove(u16),
    #[error("node {0} disagrees with its parent about the link")]
    BadLink(i32),
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct SavedNode {
    pub parent: i32,
    pub mov: u16,
    pub expanded: bool,
    pub visits: u64,
    pub wins: f64,
    pub children: Vec<i32>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct SavedTree {
    pub root: i32,
    pub nodes: Vec<SavedNode>,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(Arena::fresh()),
        }
    }

    /// One selection, expansion, playout and backpropagation pass.
    pub fn sample<R: Rng>(&self, root_state: &State, rng: &mut R) {
        let mut state = root_state.clone();
        let mut path: Vec<i32> = Vec::with_capacity(32);

        // selection: descend fully expanded nodes by UCT, applying each
        // step's move to a working copy of the state
        let mut needs_expansion = false;
        {
            let arena = self.arena.read().unwrap();
            let mut index = arena.root;
            path.push(index);
            loop {
                let node = &arena.nodes[index as usize];
                if !node.expanded {
                    needs_expansion = true;
                    break;
                }
                if node.children.is_empty() {
                    break;
                }
                let parent_visits = node.visits().max(1) as f64;
                let mut best = node.children[0];
                let mut best_score = f64::NEG_INFINITY;
                for &child_index in &node.children {
                    let child = &arena.nodes[child_index as usize];
                    let visits = child.visits();
                    let score = if visits == 0 {
                        f64::INFINITY
                    } else {
                        child.wins() / visits as f64
                            + UCT_EXPLORATION * (parent_visits.ln() / visits as f64).sqrt()
                    };
                    if score > best_score {
                        best_score = score;
                        best = child_index;
                    }
                }
                state.make_move(arena.nodes[best as usize].mov);
                path.push(best);
                index = best;
            }
        }

        // expansion: create every child at once, then walk into one of
        // them at random
        if needs_expansion {
            let leaf = *path.last().unwrap();
            let list = moves(&state);
            let picked = {
                let mut arena = self.arena.write().unwrap();
                if arena.nodes[leaf as usize].expanded {
                    // another worker expanded this node in the meantime;
                    // fall through and evaluate from here
                    None
                } else {
                    let base = arena.nodes.len() as i32;
                    for &mov in &list {
                        arena.nodes.push(Node::new(leaf, mov));
                    }
                    let node = &mut arena.nodes[leaf as usize];
                    node.children = (base..base + list.len() as i32).collect();
                    node.expanded = true;
                    if list.is_empty() {
                        None
                    } else {
                        let pick = rng.random_range(0..list.len());
                        Some((base + pick as i32, list[pick]))
                    }
                }
            };
            if let Some((child, mov)) = picked {
                path.push(child);
                state.make_move(mov);
            }
        }

        let value = playout(state, rng);

        // backpropagation: the playout value is relative to the side that
        // moved into the deepest path node, and flips at every step up
        let arena = self.arena.read().unwrap();
        let mut value = value;
        for &index in path.iter().rev() {
            arena.nodes[index as usize].update(value);
            value = -value;
        }
    }

    /// The most-visited root child; ties go to the earliest-expanded child.
    pub fn best_move(&self) -> Option<Move> {
        let arena = self.arena.read().unwrap();
        let root = &arena.nodes[arena.root as usize];
        let mut best: Option<(Move, u64)> = None;
        for &child_index in &root.children {
            let child = &arena.nodes[child_index as usize];
            let visits = child.visits();
            if best.is_none_or(|(_, best_visits)| visits > best_visits) {
                best = Some((child.mov, visits));
            }
        }
        best.map(|(mov, _)| mov)
    }

    pub fn root_visits(&self) -> u64 {
        let arena = self.arena.read().unwrap();
        arena.nodes[arena.root as usize].visits()
    }

    /// (move, visits, wins) per root child, in expansion order.
    pub fn root_children(&self) -> Vec<(Move, u64, f64)> {
        let arena = self.arena.read().unwrap();
        arena.nodes[arena.root as usize]
            .children
            .iter()
            .map(|&index| {
                let child = &arena.nodes[index as usize];
                (child.mov, child.visits(), child.wins())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.arena.read().unwrap().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-roots the tree on the child reached by `mov`, keeping that
    /// subtree's statistics and dropping the former root with all sibling
    /// subtrees. An unexplored move starts a fresh tree instead.
    pub fn advance_root(&self, mov: Move) {
        let mut arena = self.arena.write().unwrap();
        let chosen = arena.nodes[arena.root as usize]
            .children
            .iter()
            .copied()
            .find(|&child| arena.nodes[child as usize].mov == mov);
        let next = match chosen {
            Some(child) => arena.reparented(child),
            None => Arena::fresh(),
        };
        *arena = next;
    }

    /// Drops everything and starts over with an unexpanded root.
    pub fn reset(&self) {
        *self.arena.write().unwrap() = Arena::fresh();
    }

    /// Swaps in the arena of `other`; used when loading a saved agent.
    pub fn replace(&self, other: Tree) {
        *self.arena.write().unwrap() = other.arena.into_inner().unwrap();
    }

    /// Flattens the tree for persistence.
    pub fn snapshot(&self) -> SavedTree {
        let arena = self.arena.read().unwrap();
        SavedTree {
            root: arena.root,
            nodes: arena
                .nodes
                .iter()
                .map(|node| SavedNode {
                    parent: node.parent,
                    mov: node.mov.bits(),
                    expanded: node.expanded,
                    visits: node.visits(),
                    wins: node.wins(),
                    children: node.children.clone(),
                })
                .collect(),
        }
    }

    /// Rebuilds a tree from a snapshot, validating indices and move words.
    pub fn restore(saved: &SavedTree) -> Result<Self, RestoreError> {
        let len = saved.nodes.len() as i32;
        if saved.nodes.is_empty() {
            return Err(RestoreError::Empty);
        }
        if !(0..len).contains(&saved.root) {
            return Err(RestoreError::BadIndex(saved.root));
        }

        let mut nodes = Vec::with_capacity(saved.nodes.len());
        for (index, snap) in saved.nodes.iter().enumerate() {
            let mov = Move::from_bits(snap.mov).ok_or(RestoreError::BadMove(snap.mov))?;
            if snap.parent != -1 && !(0..len).contains(&snap.parent) {
                return Err(RestoreError::BadIndex(snap.parent));
            }
            for &child in &snap.children {
                if !(0..len).contains(&child) {
                    return Err(RestoreError::BadIndex(child));
                }
                if saved.nodes[child as usize].parent != index as i32 {
                    return Err(RestoreError::BadLink(child));
                }
            }
            nodes.push(Node {
                parent: snap.parent,
                mov,
                children: snap.children.clone(),
                expanded: snap.expanded,
                visits: AtomicU64::new(snap.visits),
                wins: AtomicF64::new(snap.wins),
            });
        }

        Ok(Self {
            arena: RwLock::new(Arena {
                nodes,
                root: saved.root,
            }),
        })
    }
}

/// Uniform-random play until one side has no replies or the ply cap hits.
/// The returned value is -1/0/+1 relative to the side that moved into the
/// position the playout started from.
fn playout<R: Rng>(mut state: State, rng: &mut R) -> f64 {
    let mut flip = 1.0;
    for _ in 0..PLAYOUT_PLY_CAP {
        let Some(mov) = random_move(&state, rng) else {
            let result = match state.winner() {
                Some(winner) => {
                    if winner == state.us() {
                        -1.0
                    } else {
                        1.0
                    }
                }
                None => 0.0,
            };
            return flip * result;
        };
        state.make_move(mov);
        flip = -flip;
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitboard::sq::*;
    use crate::movegen::Kind;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn sampling_accumulates_statistics() {
        let tree = Tree::new();
        let state = State::default();
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..200 {
            tree.sample(&state, &mut rng);
        }
        assert_eq!(tree.root_visits(), 200);
        let children = tree.root_children();
        assert_eq!(children.len(), 20);
        assert_eq!(children.iter().map(|(_, v, _)| v).sum::<u64>(), 200);
        let list = moves(&state);
        assert!(list.contains(&tree.best_move().unwrap()));
    }

    #[test]
    fn forced_win_is_found_immediately() {
        // black king walked into check; the only white move takes it
        let mut state = State::from_fen("8/5B2/8/Q1pk4/8/8/PPP5/6K1 b - - 0 0").unwrap();
        state.make_move(Move::new(D5, C4, Kind::NORMAL));

        let tree = Tree::new();
        let mut rng = SmallRng::seed_from_u64(2);
        for _ in 0..10 {
            tree.sample(&state, &mut rng);
        }
        assert_eq!(tree.best_move(), Some(Move::new(F7, C4, Kind::CAPTURE)));
        let (_, visits, wins) = tree.root_children()[0];
        assert_eq!(visits as f64, wins, "king captures must score +1 each");
    }

    #[test]
    fn advance_root_keeps_the_chosen_subtree() {
        let tree = Tree::new();
        let state = State::default();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..500 {
            tree.sample(&state, &mut rng);
        }
        let mov = tree.best_move().unwrap();
        let (_, child_visits, child_wins) = tree
            .root_children()
            .into_iter()
            .find(|&(m, _, _)| m == mov)
            .unwrap();

        tree.advance_root(mov);
        assert_eq!(tree.root_visits(), child_visits);
        // the chosen child's own first visit played out without descending,
        // every later one went through exactly one grandchild
        let children = tree.root_children();
        assert_eq!(
            children.iter().map(|&(_, v, _)| v).sum::<u64>(),
            child_visits - 1
        );
        assert!(child_wins.abs() <= child_visits as f64 + 1e-9);
    }

    #[test]
    fn advance_root_on_unexplored_move_starts_fresh() {
        let tree = Tree::new();
        let state = State::default();
        let mut rng = SmallRng::seed_from_u64(4);
        for _ in 0..50 {
            tree.sample(&state, &mut rng);
        }
        // a move the tree has never seen
        tree.advance_root(Move::new(A7, A6, Kind::NORMAL));
        assert_eq!(tree.root_visits(), 0);
        assert!(tree.root_children().is_empty());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn snapshot_round_trip() {
        let tree = Tree::new();
        let state = State::default();
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..300 {
            tree.sample(&state, &mut rng);
        }
        let saved = tree.snapshot();
        let restored = Tree::restore(&saved).unwrap();
        assert_eq!(saved, restored.snapshot());
        assert_eq!(tree.best_move(), restored.best_move());
    }

    #[test]
    fn restore_rejects_corrupt_snapshots() {
        let mut saved = SavedTree {
            root: 0,
            nodes: vec![SavedNode {
                parent: -1,
                mov: 0,
                expanded: false,
                visits: 0,
                wins: 0.0,
                children: vec![],
            }],
        };
        assert!(Tree::restore(&saved).is_ok());

        saved.root = 3;
        assert!(matches!(
            Tree::restore(&saved),
            Err(RestoreError::BadIndex(3))
        ));
        saved.root = 0;
        saved.nodes[0].children = vec![7];
        assert!(Tree::restore(&saved).is_err());
        saved.nodes[0].children = vec![];
        saved.nodes[0].mov = 0b0110; // unused kind encoding
        assert!(matches!(
            Tree::restore(&saved),
            Err(RestoreError::BadMove(_))
        ));
    }
}
