//! PMIC Glink battery-charger message layout
//!
//! Requests to the power-management coprocessor are a fixed header followed by
//! an opcode-specific payload. Only the property-write request used by the
//! battery-charger service is modelled:
//!
//! ```text
//! offset  size  field
//! 0       4     owner         (owner::BATTERY_CHARGER)
//! 4       4     msg_type      (msg_type::REQ_RESP)
//! 8       4     opcode        (opcode::USB_STATUS_SET, ...)
//! 12      4     len
//! 16      4     battery_id
//! 20      4     property_id   (usb_property::INPUT_CURR_LIMIT, ...)
//! 24      4     value
//! ```
//!
//! All fields are little-endian. The structs are `Unaligned` so a view can be
//! laid over any caller-owned byte buffer without copying.

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Message owners
pub mod owner {
    pub const BATTERY_CHARGER: u32 = 32778;
}

/// Message types
pub mod msg_type {
    pub const REQ_RESP: u32 = 1;
    pub const NOTIFY: u32 = 2;
}

/// Battery-charger opcodes
pub mod opcode {
    pub const BATT_STATUS_GET: u32 = 0x30;
    pub const BATT_STATUS_SET: u32 = 0x31;
    pub const USB_STATUS_GET: u32 = 0x32;
    pub const USB_STATUS_SET: u32 = 0x33;
}

/// Property identifiers of the USB status opcodes
pub mod usb_property {
    pub const ONLINE: u32 = 0;
    pub const VOLT_NOW: u32 = 1;
    pub const VOLT_MAX: u32 = 2;
    pub const CURR_NOW: u32 = 3;
    pub const CURR_MAX: u32 = 4;
    pub const INPUT_CURR_LIMIT: u32 = 5;
}

/// Common Glink header
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GlinkHeader {
    pub owner: U32,
    pub msg_type: U32,
    pub opcode: U32,
    pub len: U32,
}

impl GlinkHeader {
    /// Check the (owner, type, opcode) triple
    #[inline]
    pub fn matches(&self, owner: u32, msg_type: u32, opcode: u32) -> bool {
        self.owner.get() == owner && self.msg_type.get() == msg_type && self.opcode.get() == opcode
    }
}

/// Battery-charger property request
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ChargerRequest {
    pub hdr: GlinkHeader,
    pub battery_id: U32,
    pub property_id: U32,
    pub value: U32,
}

/// Payload length carried in `hdr.len` for a `ChargerRequest`
const PAYLOAD_LEN: u32 = (ChargerRequest::SIZE - core::mem::size_of::<GlinkHeader>()) as u32;

impl ChargerRequest {
    /// Wire size of header + payload
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Build a battery-charger request/response message.
    pub fn new(opcode: u32, property_id: u32, value: u32) -> Self {
        Self {
            hdr: GlinkHeader {
                owner: U32::new(owner::BATTERY_CHARGER),
                msg_type: U32::new(msg_type::REQ_RESP),
                opcode: U32::new(opcode),
                len: U32::new(PAYLOAD_LEN),
            },
            battery_id: U32::new(0),
            property_id: U32::new(property_id),
            value: U32::new(value),
        }
    }

    /// Lay a mutable view over the front of `data`.
    ///
    /// Returns `None` when the buffer is shorter than header + payload.
    /// Trailing bytes are left alone.
    #[inline]
    pub fn view_mut(data: &mut [u8]) -> Option<&mut Self> {
        Self::mut_from_prefix(data).ok().map(|(req, _rest)| req)
    }

    /// USB status write targeting the input current limit
    #[inline]
    pub fn is_usb_input_current_limit(&self) -> bool {
        self.hdr
            .matches(owner::BATTERY_CHARGER, msg_type::REQ_RESP, opcode::USB_STATUS_SET)
            && self.property_id.get() == usb_property::INPUT_CURR_LIMIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_size() {
        assert_eq!(core::mem::size_of::<GlinkHeader>(), 16);
        assert_eq!(ChargerRequest::SIZE, 28);
    }

    #[test]
    fn test_field_offsets() {
        let req = ChargerRequest::new(
            opcode::USB_STATUS_SET,
            usb_property::INPUT_CURR_LIMIT,
            3_000_000,
        );
        let bytes = req.as_bytes();
        assert_eq!(&bytes[0..4], &32778u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0x33u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &12u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &5u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &3_000_000u32.to_le_bytes());
    }

    #[test]
    fn test_view_rejects_short_buffer() {
        let mut short = [0u8; ChargerRequest::SIZE - 1];
        assert!(ChargerRequest::view_mut(&mut short).is_none());
    }

    #[test]
    fn test_view_over_longer_buffer() {
        let mut buf = [0xAAu8; 40];
        let req = ChargerRequest::new(opcode::USB_STATUS_SET, usb_property::INPUT_CURR_LIMIT, 1);
        buf[..ChargerRequest::SIZE].copy_from_slice(req.as_bytes());
        let req = ChargerRequest::view_mut(&mut buf).unwrap();
        assert!(req.is_usb_input_current_limit());
        req.value.set(7);
        assert_eq!(&buf[24..28], &7u32.to_le_bytes());
        assert!(buf[28..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_match_requires_exact_triple() {
        let mut req =
            ChargerRequest::new(opcode::USB_STATUS_SET, usb_property::INPUT_CURR_LIMIT, 0);
        assert!(req.is_usb_input_current_limit());

        req.hdr.opcode.set(opcode::BATT_STATUS_SET);
        assert!(!req.is_usb_input_current_limit());

        let mut req = ChargerRequest::new(opcode::USB_STATUS_SET, usb_property::CURR_MAX, 0);
        assert!(!req.is_usb_input_current_limit());
        req.property_id.set(usb_property::INPUT_CURR_LIMIT);
        req.hdr.msg_type.set(msg_type::NOTIFY);
        assert!(!req.is_usb_input_current_limit());
    }
}
