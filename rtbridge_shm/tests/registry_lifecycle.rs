//! Segment registry lifecycle tests

use rtbridge_shm::{
    AccessPolicy, BackendChoice, BackendKind, ErrorKind, Identity, RegistryConfig, Retention,
    SegmentFlags, SegmentOptions, SegmentRegistry, ShmError, ShmResult, page_size,
};
use std::sync::{Arc, Barrier};
use tempfile::TempDir;

fn posix_registry(dir: &TempDir) -> ShmResult<SegmentRegistry> {
    SegmentRegistry::new(RegistryConfig {
        backend: BackendChoice::Posix,
        posix_dir: dir.path().to_path_buf(),
        ..RegistryConfig::default()
    })
}

#[test]
fn test_attach_observes_aligned_size() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    let creator = Identity::user(10);

    registry.create(creator, "seg.aligned", 1000, &SegmentOptions::default())?;
    let handle = registry.attach(creator, "seg.aligned")?;

    assert_eq!(handle.len(), page_size());
    let status = registry.status("seg.aligned")?;
    assert_eq!(status.size, 1000);
    assert_eq!(status.act_size, page_size());
    assert_eq!(status.creator, 10);
    Ok(())
}

#[test]
fn test_create_twice_is_already_exists() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    let opts = SegmentOptions::default();

    registry.create(Identity::user(1), 42, 64, &opts)?;
    let err = registry
        .create(Identity::user(2), 42, 64, &opts)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    Ok(())
}

#[test]
fn test_attach_missing_is_not_found() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    let err = registry.attach(Identity::user(1), "seg.none").unwrap_err();
    assert!(matches!(err, ShmError::NotFound { .. }));
    assert!(registry.status("seg.none").is_err());
    Ok(())
}

#[test]
fn test_memory_shared_and_freed_after_last_detach() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    let opts = SegmentOptions::default();

    let a = registry.attach_or_create(Identity::user(1), "seg.A", 4096, &opts)?;
    let b = registry.attach(Identity::user(2), "seg.A")?;

    // Fresh memory is zeroed.
    let mut word = [0xFFu8; 8];
    b.read_at(0, &mut word)?;
    assert_eq!(word, [0u8; 8]);

    a.write_at(128, b"shared")?;
    let mut buf = [0u8; 6];
    b.read_at(128, &mut buf)?;
    assert_eq!(&buf, b"shared");

    drop(a);
    assert_eq!(registry.status("seg.A")?.attach_count(), 1);
    b.read_at(128, &mut buf)?;
    assert_eq!(&buf, b"shared");

    b.detach()?;
    assert!(matches!(
        registry.status("seg.A"),
        Err(ShmError::NotFound { .. })
    ));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_resident_segment_survives_detach_and_gc() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    let opts = SegmentOptions::with_retention(Retention::Resident);

    let handle = registry.attach_or_create(Identity::user(1), 7, 256, &opts)?;
    handle.write_at(0, b"keep")?;
    drop(handle);

    assert_eq!(registry.gc()?, 0);
    let status = registry.status(7)?;
    assert_eq!(status.attach_count(), 0);

    let again = registry.attach(Identity::user(2), 7)?;
    let mut buf = [0u8; 4];
    again.read_at(0, &mut buf)?;
    assert_eq!(&buf, b"keep");
    drop(again);

    registry.destroy(7)?;
    assert!(registry.status(7).is_err());
    Ok(())
}

#[test]
fn test_gc_sweeps_only_unattached() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    let opts = SegmentOptions::default();

    registry.create(Identity::user(1), 1, 64, &opts)?;
    registry.create(Identity::user(1), 2, 64, &opts)?;
    let held = registry.attach(Identity::user(1), 2)?;

    assert_eq!(registry.gc()?, 1);
    assert!(registry.status(1).is_err());
    assert_eq!(registry.status(2)?.n_uattach, 1);

    drop(held);
    assert!(registry.list()?.is_empty());
    Ok(())
}

#[test]
fn test_attach_or_create_refuses_larger_size() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    let opts = SegmentOptions::default();

    let _small = registry.attach_or_create(Identity::user(1), 5, 100, &opts)?;
    let err = registry
        .attach_or_create(Identity::user(2), 5, 200, &opts)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let _same = registry.attach_or_create(Identity::user(3), 5, 100, &opts)?;
    assert_eq!(registry.status(5)?.n_uattach, 2);
    Ok(())
}

#[test]
fn test_restricted_access_policy() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    let opts = SegmentOptions {
        retention: Retention::CollectOnLastDetach,
        access: AccessPolicy::Restricted(vec![2]),
    };

    let _owner = registry.attach_or_create(Identity::user(1), 9, 64, &opts)?;
    let _allowed = registry.attach(Identity::user(2), 9)?;
    let err = registry.attach(Identity::user(3), 9).unwrap_err();
    assert!(matches!(err, ShmError::AccessDenied { key: 9, id: 3 }));
    Ok(())
}

#[test]
fn test_concurrent_attaches_from_two_identities() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = posix_registry(&dir)?;
    registry.create(Identity::user(1), "seg.A", 4096, &SegmentOptions::default())?;

    let barrier = Arc::new(Barrier::new(3));
    let workers: Vec<_> = [Identity::user(100), Identity::kernel(200)]
        .into_iter()
        .map(|who| {
            let registry = registry.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || -> ShmResult<()> {
                let handle = registry.attach(who, "seg.A")?;
                barrier.wait();
                // Hold until the main thread has checked the counts.
                barrier.wait();
                handle.detach()
            })
        })
        .collect();

    barrier.wait();
    let status = registry.status("seg.A")?;
    assert_eq!(status.n_kattach + status.n_uattach, 2);
    barrier.wait();

    for worker in workers {
        worker.join().unwrap()?;
    }
    assert!(registry.status("seg.A").is_err());
    Ok(())
}

#[test]
fn test_shared_backend_counts_sides_apart() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let registry = SegmentRegistry::new(RegistryConfig {
        backend: BackendChoice::Auto,
        posix_dir: dir.path().to_path_buf(),
        ..RegistryConfig::default()
    })?;
    let opts = SegmentOptions::default();

    let _user = registry.attach_or_create(Identity::user(1), 11, 64, &opts)?;
    let _rt = registry.attach(Identity::kernel(2), 11)?;
    let status = registry.status(11)?;

    // Without page-locking privileges the segment lands on POSIX, where RT
    // attaches are counted as user attaches.
    if status.segment_flags().contains(SegmentFlags::POSIX) {
        assert_eq!((status.n_kattach, status.n_uattach), (0, 2));
    } else {
        assert_eq!(registry.backend(), BackendKind::Shared);
        assert_eq!((status.n_kattach, status.n_uattach), (1, 1));
    }
    Ok(())
}

#[test]
fn test_independent_registries_share_posix_segment() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let first = posix_registry(&dir)?;
    let second = posix_registry(&dir)?;
    let opts = SegmentOptions::default();

    let a = first.attach_or_create(Identity::user(1), "seg.X", 64, &opts)?;
    a.write_at(0, b"hello")?;

    let b = second.attach(Identity::user(2), "seg.X")?;
    let mut buf = [0u8; 5];
    b.read_at(0, &mut buf)?;
    assert_eq!(&buf, b"hello");
    assert!(
        second
            .status("seg.X")?
            .segment_flags()
            .contains(SegmentFlags::ADOPTED)
    );

    let c = second.attach_or_create(Identity::user(3), "seg.X", 64, &opts)?;
    c.write_at(0, b"world")?;
    a.read_at(0, &mut buf)?;
    assert_eq!(&buf, b"world");

    // Dropping the adopted side must not unlink the creator's file.
    drop((b, c));
    assert!(second.status("seg.X").is_err());
    let again = second.attach(Identity::user(2), "seg.X")?;
    drop(again);

    drop(a);
    let err = second.attach(Identity::user(2), "seg.X").unwrap_err();
    assert!(matches!(err, ShmError::NotFound { .. }));
    Ok(())
}

#[test]
fn test_create_over_foreign_file_is_already_exists() -> ShmResult<()> {
    let dir = TempDir::new()?;
    let first = posix_registry(&dir)?;
    let second = posix_registry(&dir)?;
    let opts = SegmentOptions::default();

    let _held = first.attach_or_create(Identity::user(1), "seg.Y", 64, &opts)?;
    let err = second
        .create(Identity::user(2), "seg.Y", 64, &opts)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(second.list()?.is_empty());

    let big = page_size() * 4;
    let err = second
        .attach_or_create(Identity::user(2), "seg.Y", big, &opts)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(second.list()?.is_empty());
    Ok(())
}
