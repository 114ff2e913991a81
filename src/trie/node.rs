use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::{Rlp, RlpStream};

use crate::errors::{ChainError, ChainResult};
use crate::params::EMPTY_ROOT_HASH;
use crate::trie::nibbles::Nibbles;

/// The three materialised node shapes of the canonical Ethereum trie; the
/// fourth (empty) lives in [`NodeRef`].
#[derive(Clone, Debug)]
pub(crate) enum Node {
    Leaf {
        path: Nibbles,
        value: Vec<u8>,
    },
    Extension {
        path: Nibbles,
        child: NodeRef,
    },
    Branch {
        children: Box<[NodeRef; 16]>,
        value: Option<Vec<u8>>,
    },
}

/// Reference to a child node: absent, addressed by the hash of its
/// encoding in the node store, or held in memory (freshly written or an
/// inlined short node).
#[derive(Clone, Debug, Default)]
pub(crate) enum NodeRef {
    #[default]
    Empty,
    Hash(H256),
    Owned(Box<Node>),
}

pub(crate) fn owned(node: Node) -> NodeRef {
    NodeRef::Owned(Box::new(node))
}

pub(crate) fn empty_children() -> Box<[NodeRef; 16]> {
    Box::new(std::array::from_fn(|_| NodeRef::Empty))
}

/// Recursive RLP encoder. Child encodings shorter than 32 bytes embed
/// verbatim in the parent; longer ones are replaced by the Keccak-256 of
/// the encoding and, when a sink is attached, recorded for persistence.
pub(crate) struct NodeEncoder<'a> {
    collect: Option<&'a mut Vec<(H256, Vec<u8>)>>,
}

impl<'a> NodeEncoder<'a> {
    pub fn hashing() -> NodeEncoder<'static> {
        NodeEncoder { collect: None }
    }

    pub fn collecting(sink: &'a mut Vec<(H256, Vec<u8>)>) -> Self {
        NodeEncoder {
            collect: Some(sink),
        }
    }

    /// Hash of the (possibly in-memory) root. The root node is always
    /// addressed by hash, even when its encoding is short.
    pub fn hash_root(&mut self, root: &NodeRef) -> H256 {
        match root {
            NodeRef::Empty => EMPTY_ROOT_HASH,
            NodeRef::Hash(hash) => *hash,
            NodeRef::Owned(node) => {
                let encoded = self.encode(node);
                let hash = keccak(&encoded);
                if let Some(sink) = self.collect.as_deref_mut() {
                    sink.push((hash, encoded));
                }
                hash
            }
        }
    }

    pub fn encode(&mut self, node: &Node) -> Vec<u8> {
        let mut stream = RlpStream::new();
        match node {
            Node::Leaf { path, value } => {
                stream.begin_list(2);
                stream.append(&path.compact(true));
                stream.append(value);
            }
            Node::Extension { path, child } => {
                stream.begin_list(2);
                stream.append(&path.compact(false));
                self.append_ref(&mut stream, child);
            }
            Node::Branch { children, value } => {
                stream.begin_list(17);
                for child in children.iter() {
                    self.append_ref(&mut stream, child);
                }
                match value {
                    Some(value) => stream.append(value),
                    None => stream.append_empty_data(),
                };
            }
        }
        stream.out().to_vec()
    }

    fn append_ref(&mut self, stream: &mut RlpStream, node: &NodeRef) {
        match node {
            NodeRef::Empty => {
                stream.append_empty_data();
            }
            NodeRef::Hash(hash) => {
                stream.append(hash);
            }
            NodeRef::Owned(child) => {
                let encoded = self.encode(child);
                if encoded.len() < 32 {
                    stream.append_raw(&encoded, 1);
                } else {
                    let hash = keccak(&encoded);
                    if let Some(sink) = self.collect.as_deref_mut() {
                        sink.push((hash, encoded));
                    }
                    stream.append(&hash);
                }
            }
        }
    }
}

pub(crate) fn decode_node(bytes: &[u8]) -> ChainResult<Node> {
    decode_rlp(&Rlp::new(bytes))
}

fn decode_rlp(rlp: &Rlp) -> ChainResult<Node> {
    match rlp.item_count()? {
        2 => {
            let (path, is_leaf) = Nibbles::decode_compact(rlp.at(0)?.data()?);
            if is_leaf {
                Ok(Node::Leaf {
                    path,
                    value: rlp.at(1)?.data()?.to_vec(),
                })
            } else {
                Ok(Node::Extension {
                    path,
                    child: decode_ref(&rlp.at(1)?)?,
                })
            }
        }
        17 => {
            let mut children = empty_children();
            for (index, slot) in children.iter_mut().enumerate() {
                *slot = decode_ref(&rlp.at(index)?)?;
            }
            let value_item = rlp.at(16)?;
            let value = value_item.data()?;
            Ok(Node::Branch {
                children,
                value: if value.is_empty() {
                    None
                } else {
                    Some(value.to_vec())
                },
            })
        }
        _ => Err(ChainError::Codec(rlp::DecoderError::Custom(
            "unexpected trie node arity",
        ))),
    }
}

fn decode_ref(rlp: &Rlp) -> ChainResult<NodeRef> {
    if rlp.is_data() {
        let data = rlp.data()?;
        match data.len() {
            0 => Ok(NodeRef::Empty),
            32 => Ok(NodeRef::Hash(H256::from_slice(data))),
            _ => Err(ChainError::Codec(rlp::DecoderError::Custom(
                "invalid trie node reference",
            ))),
        }
    } else {
        Ok(owned(decode_rlp(rlp)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_encoding_round_trips() {
        let node = Node::Leaf {
            path: Nibbles::from_bytes(b"k"),
            value: b"value".to_vec(),
        };
        let encoded = NodeEncoder::hashing().encode(&node);
        match decode_node(&encoded).unwrap() {
            Node::Leaf { path, value } => {
                assert_eq!(path, Nibbles::from_bytes(b"k"));
                assert_eq!(value, b"value");
            }
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn short_child_is_inlined() {
        let mut children = empty_children();
        children[3] = owned(Node::Leaf {
            path: Nibbles::empty(),
            value: b"x".to_vec(),
        });
        let node = Node::Branch {
            children,
            value: None,
        };
        let mut sink = Vec::new();
        let encoded = NodeEncoder::collecting(&mut sink).encode(&node);
        // the one-byte leaf must not have been hashed out
        assert!(sink.is_empty());
        match decode_node(&encoded).unwrap() {
            Node::Branch { children, .. } => {
                assert!(matches!(children[3], NodeRef::Owned(_)));
                assert!(matches!(children[0], NodeRef::Empty));
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn large_child_is_hashed_and_collected() {
        let mut children = empty_children();
        children[0] = owned(Node::Leaf {
            path: Nibbles::from_bytes(&[0u8; 8]),
            value: vec![0xaa; 64],
        });
        let node = Node::Branch {
            children,
            value: None,
        };
        let mut sink = Vec::new();
        NodeEncoder::collecting(&mut sink).encode(&node);
        assert_eq!(sink.len(), 1);
        let (hash, encoded) = &sink[0];
        assert_eq!(*hash, keccak(encoded));
    }
}
