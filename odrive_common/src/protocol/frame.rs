//! Bus frame and node addressing.
//!
//! Every frame on the bus carries an 11-bit standard identifier built as
//! `(node_address << 5) | command_id`: the low 5 bits select the command,
//! the high 6 bits select the node.

use heapless::Vec;
use static_assertions::const_assert;
use std::fmt;

/// Maximum payload of a classic CAN data frame.
pub const MAX_PAYLOAD: usize = 8;

/// Number of identifier bits reserved for the command id.
pub const COMMAND_BITS: u32 = 5;

/// Mask selecting the command id from an arbitration id.
pub const COMMAND_MASK: u16 = (1 << COMMAND_BITS) - 1;

/// Largest node address that fits an 11-bit identifier.
pub const MAX_NODE_ADDRESS: u8 = 0x3F;

/// Largest standard (11-bit) identifier.
pub const MAX_STANDARD_ID: u16 = 0x7FF;

const_assert!(((MAX_NODE_ADDRESS as u16) << COMMAND_BITS) | COMMAND_MASK == MAX_STANDARD_ID);

/// Identifier of one actuator on a shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress(u8);

impl NodeAddress {
    /// Create a node address, rejecting values that do not fit 6 bits.
    pub const fn new(address: u8) -> Option<Self> {
        if address <= MAX_NODE_ADDRESS {
            Some(Self(address))
        } else {
            None
        }
    }

    /// Address from the high bits of a stored value; bits above 6 are dropped.
    #[inline]
    pub const fn from_masked(address: u8) -> Self {
        Self(address & MAX_NODE_ADDRESS)
    }

    /// Raw address value.
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Arbitration id for `command_id` sent to / from this node.
    #[inline]
    pub const fn arbitration_id(self, command_id: u8) -> u16 {
        ((self.0 as u16) << COMMAND_BITS) | (command_id as u16 & COMMAND_MASK)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// Split an arbitration id into `(node, command_id)`.
#[inline]
pub const fn split_arbitration_id(id: u16) -> (u8, u8) {
    (((id & MAX_STANDARD_ID) >> COMMAND_BITS) as u8, (id & COMMAND_MASK) as u8)
}

/// One frame on the shared bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u16,
    data: Vec<u8, MAX_PAYLOAD>,
    remote: bool,
}

impl CanFrame {
    /// Data frame. Returns `None` if the payload exceeds 8 bytes.
    pub fn new(id: u16, data: &[u8]) -> Option<Self> {
        Some(Self {
            id: id & MAX_STANDARD_ID,
            data: Vec::from_slice(data).ok()?,
            remote: false,
        })
    }

    /// Remote (request) frame asking the node to transmit `id`.
    pub fn remote(id: u16) -> Self {
        Self {
            id: id & MAX_STANDARD_ID,
            data: Vec::new(),
            remote: true,
        }
    }

    /// Arbitration id.
    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Node part of the identifier.
    #[inline]
    pub fn node(&self) -> u8 {
        split_arbitration_id(self.id).0
    }

    /// Command part of the identifier.
    #[inline]
    pub fn command_id(&self) -> u8 {
        split_arbitration_id(self.id).1
    }

    /// Payload bytes (empty for remote frames).
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether this is a remote transmission request.
    #[inline]
    pub fn is_remote(&self) -> bool {
        self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arbitration_id_layout() {
        let node = NodeAddress::new(3).unwrap();
        assert_eq!(node.arbitration_id(0x07), 0x67);
        assert_eq!(split_arbitration_id(0x67), (3, 0x07));
    }

    #[test]
    fn node_address_bounds() {
        assert!(NodeAddress::new(MAX_NODE_ADDRESS).is_some());
        assert!(NodeAddress::new(MAX_NODE_ADDRESS + 1).is_none());
    }

    #[test]
    fn frame_rejects_oversized_payload() {
        assert!(CanFrame::new(0x01, &[0; 9]).is_none());
        let frame = CanFrame::new(0x29, &[1, 2, 3]).unwrap();
        assert_eq!(frame.node(), 1);
        assert_eq!(frame.command_id(), 0x09);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert!(!frame.is_remote());
    }

    #[test]
    fn remote_frame_has_no_payload() {
        let frame = CanFrame::remote(0x29);
        assert!(frame.is_remote());
        assert!(frame.data().is_empty());
    }
}
