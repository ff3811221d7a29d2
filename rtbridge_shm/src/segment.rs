//! Segment identity, status record and per-segment policies

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt;

/// Key under which a segment is registered.
///
/// Integer keys and names share one key space: names are hashed with
/// 32-bit FNV-1a and masked to a positive, non-zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey(i32);

impl SegmentKey {
    /// Wrap a raw integer key. Zero is representable but rejected by the
    /// registry.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Derive a key from a segment name.
    pub fn from_name(name: &str) -> Self {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in name.bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        match (hash & 0x7fff_ffff) as i32 {
            0 => Self(1),
            key => Self(key),
        }
    }

    /// Raw integer value.
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl From<i32> for SegmentKey {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl From<&str> for SegmentKey {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Which side of the RT boundary an identity lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// RT context (kernel module, RT thread).
    Kernel,
    /// Ordinary process.
    User,
}

/// Caller identity for registry operations.
///
/// A segment accepts at most one attach per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Module or process id. Must be non-zero.
    pub id: i32,
    /// Side of the RT boundary.
    pub side: Side,
}

impl Identity {
    /// RT-side identity.
    pub const fn kernel(id: i32) -> Self {
        Self {
            id,
            side: Side::Kernel,
        }
    }

    /// Non-RT identity.
    pub const fn user(id: i32) -> Self {
        Self {
            id,
            side: Side::User,
        }
    }

    /// Identity of the calling process.
    pub fn current_process() -> Self {
        Self::user(nix::unistd::getpid().as_raw())
    }
}

bitflags! {
    /// State bits recorded on a segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u32 {
        /// Pages are locked in RAM.
        const LOCKED = 1 << 0;
        /// Held by the POSIX fallback backend.
        const POSIX = 1 << 1;
        /// Survives its last detach.
        const RESIDENT = 1 << 2;
        /// Access is restricted to an allow-list.
        const RESTRICTED = 1 << 3;
        /// Mapped from a file another registry created.
        const ADOPTED = 1 << 4;
    }
}

/// What happens when the last holder detaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Free backend memory as soon as both attach counts reach zero.
    #[default]
    CollectOnLastDetach,
    /// Keep the segment until [`SegmentRegistry::destroy`] is called.
    ///
    /// [`SegmentRegistry::destroy`]: crate::SegmentRegistry::destroy
    Resident,
}

/// Who may attach to a segment. The creator is always allowed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Any identity.
    #[default]
    Open,
    /// Only the listed identity ids.
    Restricted(Vec<i32>),
}

impl AccessPolicy {
    /// Whether `id` may attach to a segment created by `creator`.
    pub fn allows(&self, id: i32, creator: i32) -> bool {
        match self {
            AccessPolicy::Open => true,
            AccessPolicy::Restricted(allowed) => id == creator || allowed.contains(&id),
        }
    }
}

/// Per-segment options supplied at creation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SegmentOptions {
    /// Lifetime policy.
    pub retention: Retention,
    /// Attach policy.
    pub access: AccessPolicy,
}

impl SegmentOptions {
    /// Options with the given retention and open access.
    pub fn with_retention(retention: Retention) -> Self {
        Self {
            retention,
            access: AccessPolicy::Open,
        }
    }

    pub(crate) fn flags(&self) -> SegmentFlags {
        let mut flags = SegmentFlags::empty();
        if self.retention == Retention::Resident {
            flags |= SegmentFlags::RESIDENT;
        }
        if matches!(self.access, AccessPolicy::Restricted(_)) {
            flags |= SegmentFlags::RESTRICTED;
        }
        flags
    }
}

/// Snapshot of one registry entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStatus {
    /// Registry key
    pub key: i32,
    /// Table id (1-based)
    pub id: i32,
    /// Requested size in bytes
    pub size: usize,
    /// Backend-aligned size in bytes
    pub act_size: usize,
    /// RT-side attach count
    pub n_kattach: i32,
    /// Non-RT attach count
    pub n_uattach: i32,
    /// Identity that created the segment
    pub creator: i32,
    /// [`SegmentFlags`] bits
    pub flags: u32,
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(std::mem::size_of::<SegmentStatus>(), 40);

impl SegmentStatus {
    /// Total holders on both sides.
    pub fn attach_count(&self) -> i32 {
        self.n_kattach + self.n_uattach
    }

    /// Decoded flag bits.
    pub fn segment_flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_keys_are_stable_and_positive() {
        let a = SegmentKey::from_name("seg.A");
        assert_eq!(a, SegmentKey::from_name("seg.A"));
        assert_ne!(a, SegmentKey::from_name("seg.B"));
        assert!(a.raw() > 0);
    }

    #[test]
    fn test_fnv1a_reference_value() {
        // FNV-1a("a") = 0xe40c292c, masked to 31 bits.
        assert_eq!(SegmentKey::from_name("a").raw(), 0x640c_292c);
    }

    #[test]
    fn test_restricted_policy_always_admits_creator() {
        let policy = AccessPolicy::Restricted(vec![5]);
        assert!(policy.allows(5, 1));
        assert!(policy.allows(1, 1));
        assert!(!policy.allows(9, 1));
        assert!(AccessPolicy::Open.allows(9, 1));
    }

    #[test]
    fn test_option_flags() {
        let opts = SegmentOptions {
            retention: Retention::Resident,
            access: AccessPolicy::Restricted(vec![]),
        };
        assert_eq!(
            opts.flags(),
            SegmentFlags::RESIDENT | SegmentFlags::RESTRICTED
        );
        assert!(SegmentOptions::default().flags().is_empty());
    }
}
