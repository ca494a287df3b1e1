//! Fixed `pd_verifed` show rewrite
//!
//! Every successful read of the vendor PD verification flag reports "1".
//! There is no configuration gate: the layer is either registered or absent.

use std::sync::Arc;

use psy_probes::{InvocationScratch, ReturnHandler, ReturnSlot, ShowArgs};

use super::stats::RewriteStats;

const FORCED: &[u8] = b"1\n";

pub struct PdVerifiedRewriter {
    stats: Arc<RewriteStats>,
}

impl PdVerifiedRewriter {
    pub fn new(stats: Arc<RewriteStats>) -> Self {
        Self { stats }
    }
}

impl ReturnHandler for PdVerifiedRewriter {
    // Only the output buffer matters here
    fn entry(&self, _args: &ShowArgs<'_>, _scratch: &mut InvocationScratch) {}

    fn ret(&self, _scratch: &InvocationScratch, slot: ReturnSlot<'_>) {
        if *slot.ret < 0 {
            return;
        }
        if let Some(out) = slot.buf.get_mut(..FORCED.len()) {
            out.copy_from_slice(FORCED);
            *slot.ret = FORCED.len() as isize;
            self.stats.pd_forced();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psy_probes::{symbol, InstrumentationHost, ProbeHost};

    fn render_zero(_args: &ShowArgs<'_>, buf: &mut [u8]) -> isize {
        buf[..2].copy_from_slice(b"0\n");
        2
    }

    #[test]
    fn test_forces_one() {
        let host = ProbeHost::new();
        let site = host.define(symbol::PD_VERIFED_SHOW);
        let stats = Arc::new(RewriteStats::new());
        let _handle = host
            .register_kretprobe(
                symbol::PD_VERIFED_SHOW,
                Arc::new(PdVerifiedRewriter::new(stats.clone())),
            )
            .unwrap();

        let args = ShowArgs {
            device: "qcom-battery",
            attr: "pd_verifed",
        };
        let mut buf = [0u8; 16];
        assert_eq!(site.call_show(args, &mut buf, render_zero), 2);
        assert_eq!(&buf[..2], b"1\n");

        let ret = site.call_show(args, &mut buf, |_, _| -(libc::EIO as isize));
        assert_eq!(ret, -(libc::EIO as isize));
        assert_eq!(stats.drain().pd_forced, 1);
    }
}
