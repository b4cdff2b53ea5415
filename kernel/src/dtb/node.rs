use super::parser::{read_name, skip_node, skip_property, Parser};
use super::{FDT_BEGIN_NODE, FDT_END_NODE, FDT_NOP, FDT_PROP};

fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// A node in the tree, named by the token offset of the first item inside
/// it (after its own name). Borrows the parser and never allocates.
#[derive(Clone, Copy)]
pub struct Node<'p, 'a> {
    parser: &'p Parser<'a>,
    /// Offset of the first token following this node's name.
    body_offset: usize,
}

impl<'p, 'a> Node<'p, 'a> {
    pub(super) fn new(parser: &'p Parser<'a>, body_offset: usize) -> Self {
        Self { parser, body_offset }
    }

    pub fn properties(&self) -> PropertyIter<'p, 'a> {
        PropertyIter {
            parser: self.parser,
            offset: self.body_offset,
        }
    }

    pub fn property(&self, name: &str) -> Option<Property<'a>> {
        self.properties().find(|p| p.name == name)
    }

    pub fn children(&self) -> NodeIter<'p, 'a> {
        // Fast-forward past this node's own properties to the first child
        // (or the END_NODE token if it has none).
        let bytes = self.parser.bytes();
        let mut offset = self.body_offset;
        loop {
            match get_u32(bytes, offset) {
                t if t == FDT_NOP => offset += 4,
                t if t == FDT_PROP => offset = skip_property(bytes, offset),
                _ => break,
            }
        }
        NodeIter {
            parser: self.parser,
            offset,
        }
    }

    /// Find an immediate child by name, matching either an exact name or
    /// the part before `@unit-address` (e.g. `find_child("memory")` matches
    /// a node named `memory@40000000`).
    pub fn find_child(&self, name: &str) -> Option<Node<'p, 'a>> {
        self.children()
            .find(|n| {
                let own = n.own_name();
                own == name || own.split('@').next() == Some(name)
            })
            .map(|n| *n)
    }
}

#[derive(Clone, Copy)]
pub struct Property<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
}

impl<'a> Property<'a> {
    pub fn get_u32(&self, index: usize) -> Option<u32> {
        let off = index * 4;
        let b = self.data.get(off..off + 4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&self, index: usize) -> Option<u64> {
        let hi = self.get_u32(index * 2)? as u64;
        let lo = self.get_u32(index * 2 + 1)? as u64;
        Some((hi << 32) | lo)
    }

    /// Read a single `reg`-style cell whose width depends only on how many
    /// bytes are present: 4 bytes -> u32, 8 bytes -> u64. Sufficient for
    /// the single-cell properties this kernel actually reads (`reg` base
    /// of simple peripherals); multi-cell `#address-cells`/`#size-cells`
    /// interpretation is left to callers that know the enclosing node's
    /// cell widths.
    pub fn get_u64_or_u32(&self, index: usize) -> Option<u64> {
        match self.data.len() {
            4 => self.get_u32(index).map(|v| v as u64),
            _ => self.get_u64(index),
        }
    }

    /// Iterate the NUL-separated strings packed into a `compatible`-style
    /// property value.
    pub fn strings(&self) -> StringListIter<'a> {
        StringListIter { data: self.data }
    }
}

pub struct StringListIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for StringListIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.data.is_empty() {
            return None;
        }
        let len = self.data.iter().position(|&b| b == 0).unwrap_or(self.data.len());
        let s = core::str::from_utf8(&self.data[..len]).unwrap_or("");
        self.data = self.data.get(len + 1..).unwrap_or(&[]);
        Some(s)
    }
}

pub struct PropertyIter<'p, 'a> {
    parser: &'p Parser<'a>,
    offset: usize,
}

impl<'p, 'a> Iterator for PropertyIter<'p, 'a> {
    type Item = Property<'a>;

    fn next(&mut self) -> Option<Property<'a>> {
        let bytes = self.parser.bytes();
        loop {
            match get_u32(bytes, self.offset) {
                t if t == FDT_NOP => self.offset += 4,
                t if t == FDT_PROP => {
                    let len = get_u32(bytes, self.offset + 4) as usize;
                    let nameoff = get_u32(bytes, self.offset + 8);
                    let data_start = self.offset + 12;
                    let data = &bytes[data_start..data_start + len];
                    let name = self.parser.string_at(nameoff);
                    self.offset = skip_property(bytes, self.offset);
                    return Some(Property { name, data });
                }
                _ => return None,
            }
        }
    }
}

pub struct NodeIter<'p, 'a> {
    parser: &'p Parser<'a>,
    offset: usize,
}

impl<'p, 'a> NodeIter<'p, 'a> {
    /// Returns the next child along with its name, distinct from the
    /// `Iterator` impl so callers like `find_child` can match on name
    /// without re-deriving it from the body offset.
    fn next_named(&mut self) -> Option<(&'a str, Node<'p, 'a>)> {
        let bytes = self.parser.bytes();
        loop {
            match get_u32(bytes, self.offset) {
                t if t == FDT_NOP => self.offset += 4,
                t if t == FDT_BEGIN_NODE => {
                    let (name, body_offset) = read_name(bytes, self.offset + 4);
                    let node = Node {
                        parser: self.parser,
                        body_offset,
                    };
                    self.offset = skip_node(bytes, self.offset);
                    return Some((name, node));
                }
                _ => return None,
            }
        }
    }
}

impl<'p, 'a> Iterator for NodeIter<'p, 'a> {
    type Item = NamedNode<'p, 'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_named().map(|(name, node)| NamedNode { name, node })
    }
}

/// A child node paired with the name it was found under, since [`Node`]
/// itself does not retain its own name (the root has none).
#[derive(Clone, Copy)]
pub struct NamedNode<'p, 'a> {
    name: &'a str,
    node: Node<'p, 'a>,
}

impl<'p, 'a> NamedNode<'p, 'a> {
    pub fn own_name(&self) -> &'a str {
        self.name
    }
}

impl<'p, 'a> core::ops::Deref for NamedNode<'p, 'a> {
    type Target = Node<'p, 'a>;
    fn deref(&self) -> &Node<'p, 'a> {
        &self.node
    }
}
