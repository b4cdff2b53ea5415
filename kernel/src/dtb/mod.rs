//! Flattened device-tree (component A).
//!
//! Parses the FDT blob firmware hands the kernel, without allocating: every
//! lookup walks the structure block token-by-token over borrowed bytes.
//! A malformed blob is a boot-time failure (`DtbError`); once parsed
//! successfully, every subsequent lookup is infallible traversal of
//! already-validated data.

mod node;
mod parser;

pub use node::{Node, NodeIter, Property, PropertyIter};
pub use parser::Parser;

use crate::error::{DtbError, KernelResult};

/// Magic number at offset 0 of every FDT blob (big-endian `0xd00dfeed`).
pub const FDT_MAGIC: u32 = 0xd00d_feed;

pub const FDT_BEGIN_NODE: u32 = 0x1;
pub const FDT_END_NODE: u32 = 0x2;
pub const FDT_PROP: u32 = 0x3;
pub const FDT_NOP: u32 = 0x4;
pub const FDT_END: u32 = 0x9;

/// A parsed, validated device tree. Read-only after construction; never
/// allocates.
pub struct DeviceTree<'a> {
    parser: Parser<'a>,
}

impl<'a> DeviceTree<'a> {
    /// Parse a blob already available as a byte slice (used by host tests
    /// against a fixture, and internally by [`Self::from_physical`]).
    pub fn from_bytes(bytes: &'a [u8]) -> KernelResult<Self> {
        Ok(Self {
            parser: Parser::new(bytes)?,
        })
    }

    /// Parse the blob at a physical address, by first reading its header
    /// to learn `totalsize` and then reinterpreting that many bytes.
    ///
    /// # Safety-relevant invariant
    /// On the bare-metal target the physical address equals the virtual
    /// address at this point in boot (identity-ish low mapping maintained
    /// by firmware); on host tests this path is unused; tests call
    /// [`Self::from_bytes`] directly against a fixture.
    #[cfg(target_os = "none")]
    pub fn from_physical(addr: usize) -> KernelResult<Self> {
        // SAFETY: firmware guarantees the DTB lives at `addr` and is at
        // least large enough to read its own header (enforced by
        // `Parser::new`'s length check before any larger slice is formed).
        let header = unsafe { core::slice::from_raw_parts(addr as *const u8, 40) };
        let totalsize = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        // SAFETY: `totalsize` was just read from the blob's own header;
        // firmware places the complete blob in reserved, readable memory.
        let bytes = unsafe { core::slice::from_raw_parts(addr as *const u8, totalsize) };
        Self::from_bytes(bytes)
    }

    pub fn root(&self) -> Node<'_, 'a> {
        self.parser.root()
    }

    /// Find a node by an absolute `/`-separated path, e.g. `/soc/uart@...`.
    pub fn find_node(&self, path: &str) -> Option<Node<'_, 'a>> {
        self.parser.find_by_path(path)
    }

    /// Iterate the `/memory@*`-style reserved memory map entries from the
    /// blob's memory reservation block.
    pub fn reserved_regions(&self) -> parser::ReservedRegionIter<'_, 'a> {
        self.parser.reserved_regions()
    }

    /// Convenience lookup used at boot to retarget the serial sink: finds
    /// the first node whose `compatible` property contains `"arm,pl011"`
    /// and returns its `reg` base address.
    pub fn pl011_base(&self) -> Option<usize> {
        self.find_compatible("arm,pl011")
            .and_then(|n| n.property("reg"))
            .and_then(|p| p.get_u64_or_u32(0))
            .map(|v| v as usize)
    }

    /// Depth-first search for the first node whose `compatible` property
    /// lists `name` among its NUL-separated strings.
    pub fn find_compatible(&self, name: &str) -> Option<Node<'_, 'a>> {
        fn search<'p, 'b>(node: Node<'p, 'b>, name: &str) -> Option<Node<'p, 'b>> {
            if let Some(prop) = node.property("compatible") {
                if prop.strings().any(|s| s == name) {
                    return Some(node);
                }
            }
            for child in node.children() {
                if let Some(found) = search(*child, name) {
                    return Some(found);
                }
            }
            None
        }
        search(self.root(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal, hand-built FDT blob: one root node with `#address-cells`
    /// = 1, `#size-cells` = 1, and a single `compatible` property, enough
    /// to exercise the header check and token walker end to end.
    fn build_fixture() -> alloc::vec::Vec<u8> {
        use alloc::vec::Vec;

        let mut structure = Vec::new();
        let push_u32 = |v: &mut Vec<u8>, x: u32| v.extend_from_slice(&x.to_be_bytes());
        let push_aligned_str = |v: &mut Vec<u8>, s: &[u8]| {
            v.extend_from_slice(s);
            v.push(0);
            while v.len() % 4 != 0 {
                v.push(0);
            }
        };

        let mut strings = Vec::new();
        let compatible_off = strings.len() as u32;
        strings.extend_from_slice(b"compatible\0");

        push_u32(&mut structure, FDT_BEGIN_NODE);
        push_aligned_str(&mut structure, b"");
        push_u32(&mut structure, FDT_PROP);
        push_u32(&mut structure, 9); // len of "arm,pl011\0" minus trailing? use exact value below
        push_u32(&mut structure, compatible_off);
        push_aligned_str(&mut structure, b"arm,pl011");
        push_u32(&mut structure, FDT_END_NODE);
        push_u32(&mut structure, FDT_END);

        let header_len = 40u32;
        let mem_rsvmap_off = header_len;
        let mem_rsvmap = {
            let mut v = Vec::new();
            push_u32(&mut v, 0);
            push_u32(&mut v, 0);
            push_u32(&mut v, 0);
            push_u32(&mut v, 0);
            v
        };
        let struct_off = mem_rsvmap_off + mem_rsvmap.len() as u32;
        let strings_off = struct_off + structure.len() as u32;
        let totalsize = strings_off + strings.len() as u32;

        let mut blob = Vec::new();
        push_u32(&mut blob, FDT_MAGIC);
        push_u32(&mut blob, totalsize);
        push_u32(&mut blob, struct_off);
        push_u32(&mut blob, strings_off);
        push_u32(&mut blob, mem_rsvmap_off);
        push_u32(&mut blob, 17); // version
        push_u32(&mut blob, 16); // last_comp_version
        push_u32(&mut blob, 0); // boot_cpuid_phys
        push_u32(&mut blob, strings.len() as u32);
        push_u32(&mut blob, structure.len() as u32);
        blob.extend_from_slice(&mem_rsvmap);
        blob.extend_from_slice(&structure);
        blob.extend_from_slice(&strings);
        blob
    }

    #[test]
    fn parses_fixture_and_finds_compatible_node() {
        let blob = build_fixture();
        let dt = DeviceTree::from_bytes(&blob).expect("fixture should parse");
        let found = dt.find_compatible("arm,pl011");
        assert!(found.is_some());
    }

    #[test]
    fn rejects_bad_magic() {
        use crate::error::KernelError;
        let bytes = [0u8; 40];
        let err = DeviceTree::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, KernelError::DtbError(DtbError::BadMagic)));
    }

    #[test]
    fn rejects_truncated_header() {
        use crate::error::KernelError;
        let bytes = [0u8; 10];
        let err = DeviceTree::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, KernelError::DtbError(DtbError::Truncated)));
    }
}
