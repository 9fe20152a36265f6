//! Connection flags reported by the target.

use bitflags::bitflags;

bitflags! {
    /// Capability / status snapshot carried by the target's status reply.
    ///
    /// The link layer treats this as opaque: bits without a name here
    /// are kept as received and passed on to listeners untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConnectionFlags: u32 {
        /// The DSP loop is running a patch.
        const DSP_RUNNING = 1 << 0;
        /// A patch image is resident in target memory.
        const PATCH_LOADED = 1 << 1;

        const _ = !0;
    }
}
