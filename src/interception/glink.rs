//! Outbound PMIC Glink message rewrite
//!
//! Pre-handler on the coprocessor transmit path. A USB-status write of the
//! input current limit gets its value replaced by the configured override.
//! Everything else passes through byte-for-byte.

use std::sync::Arc;

use psy_probes::{ChargerRequest, PreHandler};

use super::stats::RewriteStats;
use crate::config::{ConfigStore, Field};

/// Rewrite `data` in place. Returns the replaced value if the message was changed.
///
/// Runs in the restricted domain: atomics and a stack view only.
pub fn rewrite_input_current_limit(store: &ConfigStore, data: &mut [u8]) -> Option<u32> {
    let req = ChargerRequest::view_mut(data)?;
    if !req.is_usb_input_current_limit() {
        return None;
    }
    let target = store.get(Field::InputCurrentLimit);
    if target <= 0 {
        return None;
    }
    let original = req.value.get();
    req.value.set(target.unsigned_abs());
    Some(original)
}

/// Glink transmit hook
pub struct GlinkRewriter {
    store: Arc<ConfigStore>,
    stats: Arc<RewriteStats>,
}

impl GlinkRewriter {
    pub fn new(store: Arc<ConfigStore>, stats: Arc<RewriteStats>) -> Self {
        Self { store, stats }
    }
}

impl PreHandler for GlinkRewriter {
    fn pre(&self, data: &mut [u8]) {
        self.stats.glink_seen();
        if let Some(original) = rewrite_input_current_limit(&self.store, data) {
            self.stats.glink_rewritten(original);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psy_probes::glink::{msg_type, opcode, owner, usb_property};
    use zerocopy::IntoBytes;

    fn icl_message(value: u32) -> Vec<u8> {
        ChargerRequest::new(opcode::USB_STATUS_SET, usb_property::INPUT_CURR_LIMIT, value)
            .as_bytes()
            .to_vec()
    }

    fn store_with_icl(icl: i32) -> ConfigStore {
        let store = ConfigStore::new();
        store.lock().set(Field::InputCurrentLimit, icl).unwrap();
        store
    }

    #[test]
    fn test_rewrites_matching_message() {
        let store = store_with_icl(1_500_000);
        let mut msg = icl_message(3_000_000);
        let before = msg.clone();

        assert_eq!(rewrite_input_current_limit(&store, &mut msg), Some(3_000_000));
        assert_eq!(&msg[24..28], &1_500_000u32.to_le_bytes());
        assert_eq!(&msg[..24], &before[..24]);
    }

    #[test]
    fn test_unset_override_leaves_message() {
        let store = ConfigStore::new();
        let mut msg = icl_message(3_000_000);
        let before = msg.clone();
        assert_eq!(rewrite_input_current_limit(&store, &mut msg), None);
        assert_eq!(msg, before);
    }

    #[test]
    fn test_non_matching_messages_untouched() {
        let store = store_with_icl(1_500_000);

        let mut wrong_prop =
            ChargerRequest::new(opcode::USB_STATUS_SET, usb_property::CURR_MAX, 3_000_000)
                .as_bytes()
                .to_vec();
        let mut wrong_opcode =
            ChargerRequest::new(opcode::BATT_STATUS_SET, usb_property::INPUT_CURR_LIMIT, 3_000_000)
                .as_bytes()
                .to_vec();
        let mut wrong_owner = icl_message(3_000_000);
        wrong_owner[..4].copy_from_slice(&(owner::BATTERY_CHARGER + 1).to_le_bytes());
        let mut wrong_type = icl_message(3_000_000);
        wrong_type[4..8].copy_from_slice(&msg_type::NOTIFY.to_le_bytes());
        let mut short = icl_message(3_000_000);
        short.truncate(ChargerRequest::SIZE - 1);

        for msg in [
            &mut wrong_prop,
            &mut wrong_opcode,
            &mut wrong_owner,
            &mut wrong_type,
            &mut short,
        ] {
            let before = msg.clone();
            assert_eq!(rewrite_input_current_limit(&store, msg), None);
            assert_eq!(*msg, before);
        }
    }

    #[test]
    fn test_trailing_bytes_preserved() {
        let store = store_with_icl(2_000_000);
        let mut msg = icl_message(500_000);
        msg.extend_from_slice(&[0xde, 0xad]);
        rewrite_input_current_limit(&store, &mut msg).unwrap();
        assert_eq!(&msg[28..], &[0xde, 0xad]);
    }

    #[test]
    fn test_handler_counts() {
        let store = Arc::new(store_with_icl(1_500_000));
        let stats = Arc::new(RewriteStats::new());
        let hook = GlinkRewriter::new(store, stats.clone());

        hook.pre(&mut icl_message(3_000_000));
        hook.pre(&mut [0u8; 4]);
        let counts = stats.drain();
        assert_eq!(counts.glink_seen, 2);
        assert_eq!(counts.glink_rewritten, 1);
        assert_eq!(counts.glink_last_original, 3_000_000);
    }
}
