//! Canonical Ethereum Merkle-Patricia trie over a key-value node store.
//!
//! Nodes are addressed by the Keccak-256 of their RLP encoding; encodings
//! shorter than 32 bytes stay inlined in their parent. Mutations build an
//! in-memory working set on top of lazily resolved persistent nodes;
//! [`Trie::commit`] is the only operation that produces new persistent
//! nodes, handing the caller the node set to write and the superseded
//! keys to delete in one batch.

mod nibbles;
mod node;

use std::collections::HashMap;
use std::sync::Arc;

use ethereum_types::H256;

use crate::errors::{ChainError, ChainResult};
use crate::kv::{KeyValueStore, MemoryDb, WriteBatch};
use crate::params::EMPTY_ROOT_HASH;
use crate::types::ConsensusEncode;

use nibbles::Nibbles;
use node::{decode_node, empty_children, owned, Node, NodeEncoder, NodeRef};

/// Result of [`Trie::commit`]: the new root, the nodes to persist and the
/// keys of nodes this commit superseded.
pub struct TrieCommit {
    pub root: H256,
    pub nodes: Vec<(H256, Vec<u8>)>,
    pub obsolete: Vec<H256>,
}

impl TrieCommit {
    /// Stages the node writes and deletions onto a KV batch.
    pub fn stage(&self, batch: &mut WriteBatch) {
        for (hash, encoded) in &self.nodes {
            batch.put(hash.as_bytes().to_vec(), encoded.clone());
        }
        for hash in &self.obsolete {
            batch.delete(hash.as_bytes().to_vec());
        }
    }
}

pub struct Trie {
    db: Arc<dyn KeyValueStore>,
    root: NodeRef,
    obsolete: Vec<H256>,
}

impl Trie {
    pub fn new(root: H256, db: Arc<dyn KeyValueStore>) -> Self {
        let root = if root == EMPTY_ROOT_HASH || root.is_zero() {
            NodeRef::Empty
        } else {
            NodeRef::Hash(root)
        };
        Self {
            db,
            root,
            obsolete: Vec::new(),
        }
    }

    /// A fresh trie over a private in-memory store; used for root
    /// derivation of item lists.
    pub fn in_memory() -> Self {
        Self::new(EMPTY_ROOT_HASH, Arc::new(MemoryDb::new()))
    }

    fn resolve(&self, hash: H256) -> ChainResult<Node> {
        let bytes = self
            .db
            .get(hash.as_bytes())?
            .ok_or(ChainError::MissingNode(hash))?;
        decode_node(&bytes)
    }

    pub fn get(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        let path = Nibbles::from_bytes(key);
        self.get_ref(&self.root, &path, 0)
    }

    fn get_ref(&self, node: &NodeRef, path: &Nibbles, pos: usize) -> ChainResult<Option<Vec<u8>>> {
        match node {
            NodeRef::Empty => Ok(None),
            NodeRef::Hash(hash) => {
                let resolved = self.resolve(*hash)?;
                self.get_node(&resolved, path, pos)
            }
            NodeRef::Owned(inner) => self.get_node(inner, path, pos),
        }
    }

    fn get_node(&self, node: &Node, path: &Nibbles, pos: usize) -> ChainResult<Option<Vec<u8>>> {
        match node {
            Node::Leaf { path: leaf_path, value } => {
                if path.slice_from(pos) == *leaf_path {
                    Ok(Some(value.clone()))
                } else {
                    Ok(None)
                }
            }
            Node::Extension { path: ext_path, child } => {
                if path.slice_from(pos).starts_with(ext_path) {
                    self.get_ref(child, path, pos + ext_path.len())
                } else {
                    Ok(None)
                }
            }
            Node::Branch { children, value } => {
                if pos == path.len() {
                    Ok(value.clone())
                } else {
                    self.get_ref(&children[path.at(pos) as usize], path, pos + 1)
                }
            }
        }
    }

    /// Inserts or replaces `key`. An empty value is a deletion, matching
    /// the behaviour expected by root derivation over RLP values.
    pub fn update(&mut self, key: &[u8], value: Vec<u8>) -> ChainResult<()> {
        if value.is_empty() {
            return self.delete(key);
        }
        let path = Nibbles::from_bytes(key);
        let root = std::mem::take(&mut self.root);
        self.root = self.insert_ref(root, &path, 0, value)?;
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> ChainResult<()> {
        let path = Nibbles::from_bytes(key);
        let root = std::mem::take(&mut self.root);
        self.root = self.delete_ref(root, &path, 0)?;
        Ok(())
    }

    /// Root hash of the current content. Pure: nothing is persisted.
    pub fn hash(&self) -> H256 {
        NodeEncoder::hashing().hash_root(&self.root)
    }

    /// Flushes the working set. After commit the trie is rebound to the
    /// returned root with an empty working set.
    pub fn commit(&mut self) -> ChainResult<TrieCommit> {
        let mut collected = Vec::new();
        let root = NodeEncoder::collecting(&mut collected).hash_root(&self.root);

        let mut nodes: HashMap<H256, Vec<u8>> = HashMap::with_capacity(collected.len());
        for (hash, encoded) in collected {
            nodes.insert(hash, encoded);
        }
        let mut obsolete = std::mem::take(&mut self.obsolete);
        obsolete.sort_unstable();
        obsolete.dedup();
        // a node rewritten with identical content must survive the batch
        obsolete.retain(|hash| !nodes.contains_key(hash));

        self.root = if root == EMPTY_ROOT_HASH {
            NodeRef::Empty
        } else {
            NodeRef::Hash(root)
        };
        Ok(TrieCommit {
            root,
            nodes: nodes.into_iter().collect(),
            obsolete,
        })
    }

    fn take_resolved(&mut self, node: NodeRef) -> ChainResult<Option<Node>> {
        match node {
            NodeRef::Empty => Ok(None),
            NodeRef::Hash(hash) => {
                let resolved = self.resolve(hash)?;
                self.obsolete.push(hash);
                Ok(Some(resolved))
            }
            NodeRef::Owned(inner) => Ok(Some(*inner)),
        }
    }

    fn insert_ref(
        &mut self,
        node: NodeRef,
        path: &Nibbles,
        pos: usize,
        value: Vec<u8>,
    ) -> ChainResult<NodeRef> {
        match self.take_resolved(node)? {
            None => Ok(owned(Node::Leaf {
                path: path.slice_from(pos),
                value,
            })),
            Some(resolved) => self.insert_node(resolved, path, pos, value),
        }
    }

    fn insert_node(
        &mut self,
        node: Node,
        path: &Nibbles,
        pos: usize,
        value: Vec<u8>,
    ) -> ChainResult<NodeRef> {
        match node {
            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                let remainder = path.slice_from(pos);
                let common = leaf_path.common_prefix(&remainder);
                if common == leaf_path.len() && common == remainder.len() {
                    return Ok(owned(Node::Leaf {
                        path: leaf_path,
                        value,
                    }));
                }
                let mut children = empty_children();
                let mut branch_value = None;
                if leaf_path.len() == common {
                    branch_value = Some(leaf_value);
                } else {
                    children[leaf_path.at(common) as usize] = owned(Node::Leaf {
                        path: leaf_path.slice_from(common + 1),
                        value: leaf_value,
                    });
                }
                if remainder.len() == common {
                    branch_value = Some(value);
                } else {
                    children[remainder.at(common) as usize] = owned(Node::Leaf {
                        path: remainder.slice_from(common + 1),
                        value,
                    });
                }
                let branch = owned(Node::Branch {
                    children,
                    value: branch_value,
                });
                if common > 0 {
                    Ok(owned(Node::Extension {
                        path: remainder.slice(0, common),
                        child: branch,
                    }))
                } else {
                    Ok(branch)
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                let remainder = path.slice_from(pos);
                let common = ext_path.common_prefix(&remainder);
                if common == ext_path.len() {
                    let child = self.insert_ref(child, path, pos + common, value)?;
                    return Ok(owned(Node::Extension {
                        path: ext_path,
                        child,
                    }));
                }
                let mut children = empty_children();
                let mut branch_value = None;
                if ext_path.len() == common + 1 {
                    children[ext_path.at(common) as usize] = child;
                } else {
                    children[ext_path.at(common) as usize] = owned(Node::Extension {
                        path: ext_path.slice_from(common + 1),
                        child,
                    });
                }
                if remainder.len() == common {
                    branch_value = Some(value);
                } else {
                    children[remainder.at(common) as usize] = owned(Node::Leaf {
                        path: remainder.slice_from(common + 1),
                        value,
                    });
                }
                let branch = owned(Node::Branch {
                    children,
                    value: branch_value,
                });
                if common > 0 {
                    Ok(owned(Node::Extension {
                        path: ext_path.slice(0, common),
                        child: branch,
                    }))
                } else {
                    Ok(branch)
                }
            }
            Node::Branch {
                mut children,
                value: branch_value,
            } => {
                if pos == path.len() {
                    return Ok(owned(Node::Branch {
                        children,
                        value: Some(value),
                    }));
                }
                let index = path.at(pos) as usize;
                let child = std::mem::take(&mut children[index]);
                children[index] = self.insert_ref(child, path, pos + 1, value)?;
                Ok(owned(Node::Branch {
                    children,
                    value: branch_value,
                }))
            }
        }
    }

    fn delete_ref(&mut self, node: NodeRef, path: &Nibbles, pos: usize) -> ChainResult<NodeRef> {
        match self.take_resolved(node)? {
            None => Ok(NodeRef::Empty),
            Some(resolved) => self.delete_node(resolved, path, pos),
        }
    }

    fn delete_node(&mut self, node: Node, path: &Nibbles, pos: usize) -> ChainResult<NodeRef> {
        match node {
            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                if path.slice_from(pos) == leaf_path {
                    Ok(NodeRef::Empty)
                } else {
                    Ok(owned(Node::Leaf {
                        path: leaf_path,
                        value,
                    }))
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                if !path.slice_from(pos).starts_with(&ext_path) {
                    return Ok(owned(Node::Extension {
                        path: ext_path,
                        child,
                    }));
                }
                let child = self.delete_ref(child, path, pos + ext_path.len())?;
                match child {
                    NodeRef::Empty => Ok(NodeRef::Empty),
                    NodeRef::Hash(hash) => Ok(owned(Node::Extension {
                        path: ext_path,
                        child: NodeRef::Hash(hash),
                    })),
                    NodeRef::Owned(inner) => Ok(match *inner {
                        // a collapsed child merges into the extension path
                        Node::Leaf {
                            path: child_path,
                            value,
                        } => owned(Node::Leaf {
                            path: ext_path.join(&child_path),
                            value,
                        }),
                        Node::Extension {
                            path: child_path,
                            child: grandchild,
                        } => owned(Node::Extension {
                            path: ext_path.join(&child_path),
                            child: grandchild,
                        }),
                        branch @ Node::Branch { .. } => owned(Node::Extension {
                            path: ext_path,
                            child: owned(branch),
                        }),
                    }),
                }
            }
            Node::Branch {
                mut children,
                mut value,
            } => {
                if pos == path.len() {
                    if value.is_none() {
                        return Ok(owned(Node::Branch { children, value }));
                    }
                    value = None;
                } else {
                    let index = path.at(pos) as usize;
                    let child = std::mem::take(&mut children[index]);
                    children[index] = self.delete_ref(child, path, pos + 1)?;
                }

                let live: Vec<usize> = children
                    .iter()
                    .enumerate()
                    .filter(|(_, child)| !matches!(child, NodeRef::Empty))
                    .map(|(index, _)| index)
                    .collect();
                if live.is_empty() {
                    return Ok(match value {
                        None => NodeRef::Empty,
                        Some(value) => owned(Node::Leaf {
                            path: Nibbles::empty(),
                            value,
                        }),
                    });
                }
                if live.len() == 1 && value.is_none() {
                    let index = live[0];
                    let child = std::mem::take(&mut children[index]);
                    return self.collapse(index as u8, child);
                }
                Ok(owned(Node::Branch { children, value }))
            }
        }
    }

    /// A branch reduced to a single child absorbs that child, prefixing
    /// it with the child's nibble.
    fn collapse(&mut self, nibble: u8, child: NodeRef) -> ChainResult<NodeRef> {
        let resolved = match self.take_resolved(child)? {
            Some(node) => node,
            None => return Ok(NodeRef::Empty),
        };
        Ok(match resolved {
            Node::Leaf { path, value } => owned(Node::Leaf {
                path: Nibbles::prepend(nibble, &path),
                value,
            }),
            Node::Extension { path, child } => owned(Node::Extension {
                path: Nibbles::prepend(nibble, &path),
                child,
            }),
            branch @ Node::Branch { .. } => owned(Node::Extension {
                path: Nibbles::single(nibble),
                child: owned(branch),
            }),
        })
    }
}

/// Root of the trie keyed by `rlp(index)` over the canonical encodings of
/// `items`; this is how transaction and receipt roots are derived.
pub fn derive_root<T: ConsensusEncode>(items: &[T]) -> ChainResult<H256> {
    let mut trie = Trie::in_memory();
    for (index, item) in items.iter().enumerate() {
        trie.update(&rlp::encode(&index), item.consensus_bytes())?;
    }
    Ok(trie.hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn filled(pairs: &[(&[u8], &[u8])]) -> Trie {
        let mut trie = Trie::in_memory();
        for (key, value) in pairs {
            trie.update(key, value.to_vec()).unwrap();
        }
        trie
    }

    #[test]
    fn empty_trie_root() {
        assert_eq!(Trie::in_memory().hash(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn canonical_branching_vector() {
        // shared fixture of every Ethereum trie implementation
        let trie = filled(&[
            (b"doe", b"reindeer"),
            (b"dog", b"puppy"),
            (b"dogglesworth", b"cat"),
        ]);
        assert_eq!(
            trie.hash(),
            ethereum_types::H256(hex!(
                "8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3"
            ))
        );
    }

    #[test]
    fn canonical_foo_vector() {
        let trie = filled(&[(b"foo", b"bar"), (b"food", b"bass")]);
        assert_eq!(
            trie.hash(),
            ethereum_types::H256(hex!(
                "17beaa1648bafa633cda809c90c04af50fc8aed3cb40d16efbddee6fdf63c4c3"
            ))
        );
    }

    #[test]
    fn canonical_vector_with_deletions() {
        let mut trie = Trie::in_memory();
        let script: &[(&[u8], &[u8])] = &[
            (b"do", b"verb"),
            (b"ether", b"wookiedoo"),
            (b"horse", b"stallion"),
            (b"shaman", b"horse"),
            (b"doge", b"coin"),
            (b"ether", b""),
            (b"dog", b"puppy"),
            (b"shaman", b""),
        ];
        for (key, value) in script {
            trie.update(key, value.to_vec()).unwrap();
        }
        assert_eq!(
            trie.hash(),
            ethereum_types::H256(hex!(
                "5991bb8c6514148a29db676a14ac506cd2cd5775ace63c30a4fe457715e9ac84"
            ))
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0u8..32)
            .map(|i| (vec![i, i.wrapping_mul(7)], vec![i; (i as usize % 40) + 1]))
            .collect();
        let mut forward = Trie::in_memory();
        for (key, value) in &pairs {
            forward.update(key, value.clone()).unwrap();
        }
        let mut backward = Trie::in_memory();
        for (key, value) in pairs.iter().rev() {
            backward.update(key, value.clone()).unwrap();
        }
        assert_eq!(forward.hash(), backward.hash());
    }

    #[test]
    fn get_after_update_and_delete() {
        let mut trie = filled(&[(b"alpha", b"1"), (b"alphabet", b"2"), (b"beta", b"3")]);
        assert_eq!(trie.get(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trie.get(b"alphabet").unwrap(), Some(b"2".to_vec()));
        assert_eq!(trie.get(b"gamma").unwrap(), None);

        let before = {
            let snapshot = filled(&[(b"alpha", b"1"), (b"beta", b"3")]);
            snapshot.hash()
        };
        trie.delete(b"alphabet").unwrap();
        assert_eq!(trie.get(b"alphabet").unwrap(), None);
        assert_eq!(trie.hash(), before);
    }

    #[test]
    fn overwrite_changes_root_and_value() {
        let mut trie = filled(&[(b"key", b"old")]);
        let old_root = trie.hash();
        trie.update(b"key", b"new".to_vec()).unwrap();
        assert_ne!(trie.hash(), old_root);
        assert_eq!(trie.get(b"key").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn commit_and_reload_round_trip() {
        let db: Arc<dyn KeyValueStore> = Arc::new(MemoryDb::new());
        let mut trie = Trie::new(EMPTY_ROOT_HASH, db.clone());
        for i in 0u8..16 {
            trie.update(&[i], vec![i; 40]).unwrap();
        }
        let expected = trie.hash();
        let commit = trie.commit().unwrap();
        assert_eq!(commit.root, expected);
        let mut batch = WriteBatch::new();
        commit.stage(&mut batch);
        db.write(batch).unwrap();

        let reloaded = Trie::new(commit.root, db.clone());
        for i in 0u8..16 {
            assert_eq!(reloaded.get(&[i]).unwrap(), Some(vec![i; 40]));
        }
        assert_eq!(reloaded.hash(), expected);
    }

    #[test]
    fn second_commit_drops_obsolete_nodes_but_stays_readable() {
        let db: Arc<dyn KeyValueStore> = Arc::new(MemoryDb::new());
        let mut trie = Trie::new(EMPTY_ROOT_HASH, db.clone());
        for i in 0u8..16 {
            trie.update(&[i], vec![i; 40]).unwrap();
        }
        let first = trie.commit().unwrap();
        let mut batch = WriteBatch::new();
        first.stage(&mut batch);
        db.write(batch).unwrap();

        let mut trie = Trie::new(first.root, db.clone());
        trie.update(&[3], vec![0xff; 48]).unwrap();
        trie.delete(&[9]).unwrap();
        let second = trie.commit().unwrap();
        assert!(!second.obsolete.is_empty());
        let mut batch = WriteBatch::new();
        second.stage(&mut batch);
        db.write(batch).unwrap();

        let reloaded = Trie::new(second.root, db.clone());
        assert_eq!(reloaded.get(&[3]).unwrap(), Some(vec![0xff; 48]));
        assert_eq!(reloaded.get(&[9]).unwrap(), None);
        assert_eq!(reloaded.get(&[5]).unwrap(), Some(vec![5; 40]));
    }

    #[test]
    fn missing_root_node_is_reported() {
        let db: Arc<dyn KeyValueStore> = Arc::new(MemoryDb::new());
        let trie = Trie::new(ethereum_types::H256::repeat_byte(0x42), db);
        match trie.get(b"anything") {
            Err(ChainError::MissingNode(hash)) => {
                assert_eq!(hash, ethereum_types::H256::repeat_byte(0x42));
            }
            other => panic!("expected missing node, got {other:?}"),
        }
    }

    #[test]
    fn derive_root_of_empty_list_is_empty_root() {
        let items: Vec<crate::types::Transaction> = Vec::new();
        assert_eq!(derive_root(&items).unwrap(), EMPTY_ROOT_HASH);
    }
}
