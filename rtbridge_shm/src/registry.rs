//! Segment registry
//!
//! A bounded table of reference-counted segments. Every mutation runs under
//! one write lock acquired with a timeout; [`SegmentRegistry::status`] and
//! [`SegmentRegistry::list`] take the read side.
//!
//! Memory stays valid from the first successful attach until both attach
//! counts are back at zero. Only then may it be freed, either immediately on
//! the last detach ([`Retention::CollectOnLastDetach`]) or never until an
//! explicit [`SegmentRegistry::destroy`] ([`Retention::Resident`]).

use crate::backend::{
    BackendChoice, BackendKind, Backing, Mapping, PosixBackend, SegmentBackend, SharedBackend,
    align_up,
};
use crate::error::{ShmError, ShmResult};
use crate::segment::{
    AccessPolicy, Identity, Retention, SegmentFlags, SegmentKey, SegmentOptions, SegmentStatus,
    Side,
};
use parking_lot::RwLock;
use rtbridge_common::consts::DEFAULT_LOCK_TIMEOUT_MS;
use rtbridge_common::shm::consts::{
    DEFAULT_MAX_SEGMENTS, POSIX_SHM_PREFIX, RESERVED_SEGMENT_KEY, SHM_MAX_SIZE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registry construction parameters.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Backend selection
    pub backend: BackendChoice,
    /// Number of table slots
    pub max_segments: usize,
    /// Largest accepted segment size in bytes
    pub max_segment_size: usize,
    /// Bound on waiting for the registry lock
    pub lock_timeout: Duration,
    /// Retention handed out by [`SegmentRegistry::default_options`]
    pub default_retention: Retention,
    /// Directory for POSIX segment files
    pub posix_dir: PathBuf,
    /// File name prefix for POSIX segment files
    pub posix_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            max_segments: DEFAULT_MAX_SEGMENTS,
            max_segment_size: SHM_MAX_SIZE,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            default_retention: Retention::CollectOnLastDetach,
            posix_dir: PathBuf::from("/dev/shm"),
            posix_prefix: POSIX_SHM_PREFIX.to_string(),
        }
    }
}

struct Entry {
    key: i32,
    id: i32,
    size: usize,
    act_size: usize,
    n_kattach: i32,
    n_uattach: i32,
    creator: i32,
    flags: SegmentFlags,
    retention: Retention,
    access: AccessPolicy,
    backend: BackendKind,
    backing: Backing,
    holders: Vec<Identity>,
}

impl Entry {
    fn status(&self) -> SegmentStatus {
        SegmentStatus {
            key: self.key,
            id: self.id,
            size: self.size,
            act_size: self.act_size,
            n_kattach: self.n_kattach,
            n_uattach: self.n_uattach,
            creator: self.creator,
            flags: self.flags.bits(),
        }
    }

    fn holders(&self) -> i32 {
        self.n_kattach + self.n_uattach
    }

    fn counter_for(&mut self, side: Side, counts_kernel_side: bool) -> &mut i32 {
        match side {
            Side::Kernel if counts_kernel_side => &mut self.n_kattach,
            _ => &mut self.n_uattach,
        }
    }
}

struct Table {
    slots: Vec<Option<Entry>>,
}

impl Table {
    fn find(&self, key: i32) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|e| e.key == key))
    }

    fn entry_mut(&mut self, idx: usize) -> ShmResult<&mut Entry> {
        self.slots
            .get_mut(idx)
            .and_then(Option::as_mut)
            .ok_or_else(|| ShmError::Fatal {
                reason: format!("registry slot {idx} vanished under lock"),
            })
    }
}

struct Inner {
    config: RegistryConfig,
    shared: Option<SharedBackend>,
    posix: PosixBackend,
    table: RwLock<Table>,
}

impl Inner {
    fn backend(&self, kind: BackendKind) -> ShmResult<&dyn SegmentBackend> {
        match kind {
            BackendKind::Posix => Ok(&self.posix as &dyn SegmentBackend),
            BackendKind::Shared => self
                .shared
                .as_ref()
                .map(|b| b as &dyn SegmentBackend)
                .ok_or_else(|| ShmError::Fatal {
                    reason: "segment held by unavailable shared backend".to_string(),
                }),
        }
    }

    /// Free an entry's memory. The entry must have no holders.
    fn free_entry(&self, entry: Entry) -> ShmResult<()> {
        assert_eq!(
            entry.holders(),
            0,
            "segment {} freed with {} holders",
            entry.key,
            entry.holders()
        );
        debug!("freeing segment key={} id={}", entry.key, entry.id);
        self.backend(entry.backend)?.free(entry.backing)
    }

    fn validate_key(key: SegmentKey) -> ShmResult<i32> {
        match key.raw() {
            RESERVED_SEGMENT_KEY => Err(ShmError::invalid("segment key 0 is reserved")),
            raw => Ok(raw),
        }
    }

    fn validate_size(&self, size: usize) -> ShmResult<()> {
        if size == 0 || size > self.config.max_segment_size {
            return Err(ShmError::invalid(format!(
                "segment size {size} outside 1..={}",
                self.config.max_segment_size
            )));
        }
        Ok(())
    }

    fn allocate(&self, key: i32, size: usize) -> ShmResult<(BackendKind, usize, Backing)> {
        if let Some(shared) = &self.shared {
            let act_size = align_up(size, shared.alignment())?;
            match shared.allocate(key, act_size) {
                Ok(backing) => return Ok((shared.kind(), act_size, backing)),
                Err(ShmError::PermissionDenied { reason }) => {
                    warn!("shared backend refused segment {key:#x} ({reason}); using posix");
                }
                Err(e) => return Err(e),
            }
        }
        let act_size = align_up(size, self.posix.alignment())?;
        let backing = self.posix.allocate(key, act_size)?;
        Ok((self.posix.kind(), act_size, backing))
    }

    fn free_slot(table: &Table) -> ShmResult<usize> {
        table
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| ShmError::AllocationFailed {
                reason: format!("segment table full ({} slots)", table.slots.len()),
            })
    }

    /// Record a POSIX segment file created by another registry.
    ///
    /// Returns `None` if no such file exists.
    fn adopt(
        &self,
        table: &mut Table,
        who: Identity,
        key: i32,
        opts: &SegmentOptions,
    ) -> ShmResult<Option<usize>> {
        let Some(backing) = self.posix.adopt(key)? else {
            return Ok(None);
        };
        let idx = Self::free_slot(table)?;
        let len = backing.len();

        table.slots[idx] = Some(Entry {
            key,
            id: idx as i32 + 1,
            size: len,
            act_size: len,
            n_kattach: 0,
            n_uattach: 0,
            creator: who.id,
            flags: opts.flags() | SegmentFlags::POSIX | SegmentFlags::ADOPTED,
            retention: opts.retention,
            access: opts.access.clone(),
            backend: self.posix.kind(),
            backing,
            holders: Vec::new(),
        });
        info!("adopted segment key={key:#x} id={} size={len}", idx + 1);
        Ok(Some(idx))
    }

    fn insert(
        &self,
        table: &mut Table,
        who: Identity,
        key: i32,
        size: usize,
        opts: &SegmentOptions,
    ) -> ShmResult<usize> {
        if table.find(key).is_some() {
            return Err(ShmError::AlreadyExists { key });
        }
        let idx = Self::free_slot(table)?;

        let (backend, act_size, backing) = self.allocate(key, size)?;
        let mut flags = opts.flags();
        match backend {
            BackendKind::Shared => flags |= SegmentFlags::LOCKED,
            BackendKind::Posix => flags |= SegmentFlags::POSIX,
        }

        table.slots[idx] = Some(Entry {
            key,
            id: idx as i32 + 1,
            size,
            act_size,
            n_kattach: 0,
            n_uattach: 0,
            creator: who.id,
            flags,
            retention: opts.retention,
            access: opts.access.clone(),
            backend,
            backing,
            holders: Vec::new(),
        });
        info!(
            "created segment key={key:#x} id={} size={size} act_size={act_size} backend={backend:?}",
            idx + 1
        );
        Ok(idx)
    }

    fn attach_slot(&self, table: &mut Table, idx: usize, who: Identity) -> ShmResult<AttachGrant> {
        let entry = table.entry_mut(idx)?;
        if !entry.access.allows(who.id, entry.creator) {
            return Err(ShmError::AccessDenied {
                key: entry.key,
                id: who.id,
            });
        }
        if entry.holders.contains(&who) {
            return Err(ShmError::invalid(format!(
                "identity {} already attached to segment {:#x}",
                who.id, entry.key
            )));
        }

        // Map before counting so a failed mapping leaves the entry untouched.
        let backend = self.backend(entry.backend)?;
        let mapping = backend.map(&entry.backing)?;
        *entry.counter_for(who.side, backend.counts_kernel_side()) += 1;
        entry.holders.push(who);
        debug!(
            "attach key={:#x} who={} k={} u={}",
            entry.key, who.id, entry.n_kattach, entry.n_uattach
        );
        Ok(AttachGrant {
            key: entry.key,
            id: entry.id,
            mapping,
        })
    }

    fn release(&self, key: i32, id: i32, who: Identity) -> ShmResult<()> {
        let mut table = self.table.write();
        let idx = (id - 1) as usize;
        let entry = match table.slots.get_mut(idx).and_then(Option::as_mut) {
            Some(entry) if entry.key == key => entry,
            _ => return Err(ShmError::NotFound { key }),
        };
        let pos = entry
            .holders
            .iter()
            .position(|h| *h == who)
            .ok_or_else(|| ShmError::invalid(format!("identity {} not attached", who.id)))?;
        entry.holders.swap_remove(pos);
        let counts_kernel_side = self.backend(entry.backend)?.counts_kernel_side();
        *entry.counter_for(who.side, counts_kernel_side) -= 1;
        debug!(
            "detach key={key:#x} who={} k={} u={}",
            who.id, entry.n_kattach, entry.n_uattach
        );

        if entry.holders() == 0 && entry.retention == Retention::CollectOnLastDetach {
            if let Some(entry) = table.slots[idx].take() {
                self.free_entry(entry)?;
            }
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut self.table.get_mut().slots);
        for entry in slots.into_iter().flatten() {
            if let Err(e) = self.free_entry(entry) {
                warn!("failed to free segment at registry shutdown: {e}");
            }
        }
    }
}

struct AttachGrant {
    key: i32,
    id: i32,
    mapping: Arc<Mapping>,
}

/// Table of named, reference-counted shared memory segments.
///
/// Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct SegmentRegistry {
    inner: Arc<Inner>,
}

impl SegmentRegistry {
    /// Build a registry and preallocate its table.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a zero-slot table
    /// - `Fatal` if the table cannot be allocated
    /// - `PermissionDenied` if [`BackendChoice::Shared`] is forced and the
    ///   probe fails
    pub fn new(config: RegistryConfig) -> ShmResult<Self> {
        if config.max_segments == 0 {
            return Err(ShmError::invalid("max_segments must be positive"));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(config.max_segments)
            .map_err(|e| ShmError::Fatal {
                reason: format!("segment table of {} slots: {e}", config.max_segments),
            })?;
        slots.resize_with(config.max_segments, || None);

        let shared = match config.backend {
            BackendChoice::Posix => None,
            BackendChoice::Shared => Some(SharedBackend::probe()?),
            BackendChoice::Auto => match SharedBackend::probe() {
                Ok(backend) => Some(backend),
                Err(ShmError::PermissionDenied { reason }) => {
                    warn!("shared backend unavailable ({reason}); falling back to posix");
                    None
                }
                Err(e) => return Err(e),
            },
        };
        let posix = PosixBackend::new(&config.posix_dir, &config.posix_prefix);

        info!(
            "segment registry ready: {} slots, backend {:?}",
            config.max_segments,
            if shared.is_some() {
                BackendKind::Shared
            } else {
                BackendKind::Posix
            }
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                shared,
                posix,
                table: RwLock::new(Table { slots }),
            }),
        })
    }

    /// Backend used for new segments.
    pub fn backend(&self) -> BackendKind {
        if self.inner.shared.is_some() {
            BackendKind::Shared
        } else {
            BackendKind::Posix
        }
    }

    /// Configuration the registry was built with.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Options carrying the configured default retention.
    pub fn default_options(&self) -> SegmentOptions {
        SegmentOptions::with_retention(self.inner.config.default_retention)
    }

    /// Snapshot of one segment.
    pub fn status(&self, key: impl Into<SegmentKey>) -> ShmResult<SegmentStatus> {
        let key = key.into().raw();
        let table = self
            .inner
            .table
            .try_read_for(self.inner.config.lock_timeout)
            .ok_or(ShmError::Busy)?;
        table
            .find(key)
            .and_then(|idx| table.slots[idx].as_ref())
            .map(Entry::status)
            .ok_or(ShmError::NotFound { key })
    }

    /// Snapshot of every segment, in table order.
    pub fn list(&self) -> ShmResult<Vec<SegmentStatus>> {
        let table = self
            .inner
            .table
            .try_read_for(self.inner.config.lock_timeout)
            .ok_or(ShmError::Busy)?;
        Ok(table.slots.iter().flatten().map(Entry::status).collect())
    }

    /// Register a new segment with no holders. Returns its table id.
    pub fn create(
        &self,
        who: Identity,
        key: impl Into<SegmentKey>,
        size: usize,
        opts: &SegmentOptions,
    ) -> ShmResult<i32> {
        let key = Inner::validate_key(key.into())?;
        self.inner.validate_size(size)?;
        let mut table = self.lock()?;
        let idx = self.inner.insert(&mut table, who, key, size, opts)?;
        Ok(idx as i32 + 1)
    }

    /// Attach to an existing segment.
    ///
    /// A key missing from the table is looked up as a POSIX segment file, so
    /// a registry in another process can share segments by name.
    pub fn attach(&self, who: Identity, key: impl Into<SegmentKey>) -> ShmResult<SegmentHandle> {
        let key = Inner::validate_key(key.into())?;
        let mut table = self.lock()?;
        let (idx, fresh) = match table.find(key) {
            Some(idx) => (idx, false),
            None => {
                let opts = self.default_options();
                let idx = self
                    .inner
                    .adopt(&mut table, who, key, &opts)?
                    .ok_or(ShmError::NotFound { key })?;
                (idx, true)
            }
        };
        let result = self.inner.attach_slot(&mut table, idx, who);
        self.finish_attach(&mut table, idx, fresh, result, who)
    }

    /// Attach, creating the segment first if it does not exist.
    ///
    /// An existing segment smaller than `size` is refused. A POSIX segment
    /// file left by another registry is adopted rather than replaced. If the
    /// entry was added here and the attach fails, it is rolled back.
    pub fn attach_or_create(
        &self,
        who: Identity,
        key: impl Into<SegmentKey>,
        size: usize,
        opts: &SegmentOptions,
    ) -> ShmResult<SegmentHandle> {
        let key = Inner::validate_key(key.into())?;
        self.inner.validate_size(size)?;
        let mut table = self.lock()?;

        let (idx, fresh) = match table.find(key) {
            Some(idx) => (idx, false),
            None => match self.inner.adopt(&mut table, who, key, opts)? {
                Some(idx) => (idx, true),
                None => match self.inner.insert(&mut table, who, key, size, opts) {
                    Ok(idx) => (idx, true),
                    // Another process created the file since the lookup.
                    Err(ShmError::AlreadyExists { .. }) => {
                        let idx = self
                            .inner
                            .adopt(&mut table, who, key, opts)?
                            .ok_or(ShmError::NotFound { key })?;
                        (idx, true)
                    }
                    Err(e) => return Err(e),
                },
            },
        };

        let existing = table.entry_mut(idx)?.size;
        let result = if size > existing {
            Err(ShmError::invalid(format!(
                "segment {key:#x} is {existing} bytes, {size} requested"
            )))
        } else {
            self.inner.attach_slot(&mut table, idx, who)
        };
        self.finish_attach(&mut table, idx, fresh, result, who)
    }

    /// Free every collectable segment whose attach counts are zero.
    ///
    /// Returns the number of segments freed. Resident segments and segments
    /// with holders are never touched.
    pub fn gc(&self) -> ShmResult<usize> {
        let mut table = self.lock()?;
        let mut freed = 0;
        for slot in table.slots.iter_mut() {
            let collectable = slot.as_ref().is_some_and(|e| {
                e.retention == Retention::CollectOnLastDetach && e.holders() == 0
            });
            if collectable {
                if let Some(entry) = slot.take() {
                    self.inner.free_entry(entry)?;
                    freed += 1;
                }
            }
        }
        if freed > 0 {
            info!("gc freed {freed} segment(s)");
        }
        Ok(freed)
    }

    /// Free a segment regardless of retention. It must have no holders.
    pub fn destroy(&self, key: impl Into<SegmentKey>) -> ShmResult<()> {
        let key = key.into().raw();
        let mut table = self.lock()?;
        let idx = table.find(key).ok_or(ShmError::NotFound { key })?;
        let holders = table.entry_mut(idx)?.holders();
        if holders != 0 {
            return Err(ShmError::invalid(format!(
                "segment {key:#x} still has {holders} holder(s)"
            )));
        }
        if let Some(entry) = table.slots[idx].take() {
            self.inner.free_entry(entry)?;
        }
        Ok(())
    }

    fn lock(&self) -> ShmResult<parking_lot::RwLockWriteGuard<'_, Table>> {
        self.inner
            .table
            .try_write_for(self.inner.config.lock_timeout)
            .ok_or(ShmError::Busy)
    }

    fn finish_attach(
        &self,
        table: &mut Table,
        idx: usize,
        fresh: bool,
        result: ShmResult<AttachGrant>,
        who: Identity,
    ) -> ShmResult<SegmentHandle> {
        match result {
            Ok(grant) => Ok(self.handle(grant, who)),
            Err(e) => {
                if fresh {
                    if let Some(entry) = table.slots[idx].take() {
                        self.inner.free_entry(entry)?;
                    }
                }
                Err(e)
            }
        }
    }

    fn handle(&self, grant: AttachGrant, who: Identity) -> SegmentHandle {
        SegmentHandle {
            registry: Arc::clone(&self.inner),
            key: grant.key,
            id: grant.id,
            who,
            mapping: grant.mapping,
            attached: true,
        }
    }
}

/// One holder's attachment to a segment. Dropping it detaches.
pub struct SegmentHandle {
    registry: Arc<Inner>,
    key: i32,
    id: i32,
    who: Identity,
    mapping: Arc<Mapping>,
    attached: bool,
}

impl SegmentHandle {
    /// Segment key.
    pub fn key(&self) -> SegmentKey {
        SegmentKey::from_raw(self.key)
    }

    /// Table id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Identity holding this attachment.
    pub fn identity(&self) -> Identity {
        self.who
    }

    /// Mapped size (the backend-aligned size).
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// True if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.mapping.as_ptr()
    }

    /// Copy `data` into the segment at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> ShmResult<()> {
        self.check_range(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Copy bytes from the segment at `offset` into `buf`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> ShmResult<()> {
        self.check_range(offset, buf.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Detach explicitly, reporting errors that `Drop` would only log.
    pub fn detach(mut self) -> ShmResult<()> {
        self.attached = false;
        self.registry.release(self.key, self.id, self.who)
    }

    fn check_range(&self, offset: usize, len: usize) -> ShmResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(ShmError::invalid(format!(
                "range {offset}+{len} outside segment of {} bytes",
                self.len()
            ))),
        }
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        if self.attached {
            if let Err(e) = self.registry.release(self.key, self.id, self.who) {
                warn!("detach of segment {:#x} failed: {e}", self.key);
            }
        }
    }
}

impl std::fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("key", &self.key())
            .field("id", &self.id)
            .field("who", &self.who)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posix_registry(dir: &tempfile::TempDir, slots: usize) -> SegmentRegistry {
        SegmentRegistry::new(RegistryConfig {
            backend: BackendChoice::Posix,
            max_segments: slots,
            posix_dir: dir.path().to_path_buf(),
            ..RegistryConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_reserved_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = posix_registry(&dir, 4);
        let err = reg
            .create(Identity::user(1), 0, 64, &SegmentOptions::default())
            .unwrap_err();
        assert!(matches!(err, ShmError::InvalidArgument { .. }));
    }

    #[test]
    fn test_size_limits() {
        let dir = tempfile::tempdir().unwrap();
        let reg = posix_registry(&dir, 4);
        let opts = SegmentOptions::default();
        assert!(reg.create(Identity::user(1), 5, 0, &opts).is_err());
        assert!(
            reg.create(Identity::user(1), 5, SHM_MAX_SIZE + 1, &opts)
                .is_err()
        );
    }

    #[test]
    fn test_full_table() {
        let dir = tempfile::tempdir().unwrap();
        let reg = posix_registry(&dir, 2);
        let opts = SegmentOptions::default();
        reg.create(Identity::user(1), 1, 64, &opts).unwrap();
        reg.create(Identity::user(1), 2, 64, &opts).unwrap();
        let err = reg.create(Identity::user(1), 3, 64, &opts).unwrap_err();
        assert!(matches!(err, ShmError::AllocationFailed { .. }));
    }

    #[test]
    fn test_double_attach_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let reg = posix_registry(&dir, 4);
        let who = Identity::user(1);
        let _h = reg
            .attach_or_create(who, 9, 64, &SegmentOptions::default())
            .unwrap();
        let err = reg.attach(who, 9).unwrap_err();
        assert!(matches!(err, ShmError::InvalidArgument { .. }));
        assert_eq!(reg.status(9).unwrap().n_uattach, 1);
    }

    #[test]
    fn test_posix_counts_kernel_as_user() {
        let dir = tempfile::tempdir().unwrap();
        let reg = posix_registry(&dir, 4);
        let _h = reg
            .attach_or_create(Identity::kernel(3), 9, 64, &SegmentOptions::default())
            .unwrap();
        let st = reg.status(9).unwrap();
        assert_eq!((st.n_kattach, st.n_uattach), (0, 1));
        assert!(st.segment_flags().contains(SegmentFlags::POSIX));
    }

    #[test]
    fn test_lock_timeout_reports_busy() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SegmentRegistry::new(RegistryConfig {
            backend: BackendChoice::Posix,
            posix_dir: dir.path().to_path_buf(),
            lock_timeout: Duration::from_millis(10),
            ..RegistryConfig::default()
        })
        .unwrap();

        let _guard = reg.inner.table.write();
        let err = reg
            .create(Identity::user(1), 1, 64, &SegmentOptions::default())
            .unwrap_err();
        assert!(matches!(err, ShmError::Busy));
    }
}
