use hoard_cache::{CacheItem, CacheMode, LocalCache};
use hoard_remote::mock::{MockObject, MockRemote};
use hoard_remote::{HashKind, ManualClock, RemoteHandle, RetryPolicy};
use hoard_vfs::error::ErrorKind;
use hoard_vfs::{FileHandle, Mode, OpenFlags, Vfs, VfsOptions};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use time::{OffsetDateTime, UtcDateTime};
use tokio::time::Instant;

fn data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Helper: a filesystem over `remote` with its cache in `dir`.
fn mount(dir: &TempDir, remote: &Arc<MockRemote>, mode: CacheMode, options: VfsOptions) -> Vfs {
    let cache = LocalCache::new(dir.path(), mode).unwrap();
    let handle: RemoteHandle = remote.clone();
    Vfs::new(handle, cache, options)
}

/// Helper: a remote holding a single 1000 byte object at `a.bin`.
fn setup(mode: CacheMode) -> (TempDir, Arc<MockRemote>, Arc<MockObject>, Vfs) {
    setup_with(mode, VfsOptions::default(), MockObject::new("a.bin", data(1000)))
}

fn setup_with(mode: CacheMode, options: VfsOptions, object: MockObject) -> (TempDir, Arc<MockRemote>, Arc<MockObject>, Vfs) {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MockRemote::default());
    let object = remote.insert(object);
    let vfs = mount(&dir, &remote, mode, options);
    (dir, remote, object, vfs)
}

async fn read_at(handle: &FileHandle, off: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let n = handle.read_at(&mut buf, off).await.unwrap();
    buf.truncate(n);
    buf
}

#[tokio::test]
async fn test_write_then_read_back() {
    let (_dir, _remote, _object, vfs) = setup(CacheMode::Full);
    let handle = vfs.open("notes.txt", OpenFlags::read_write().create().truncate()).await.unwrap();
    assert_eq!(handle.size().await, 0);
    assert_eq!(handle.name(), "notes.txt");
    assert_eq!(handle.write(b"0123456789").await.unwrap(), 10);
    assert_eq!(handle.size().await, 10);
    assert_eq!(handle.mode().await, Mode::CacheBacked);
    handle.close().await.unwrap();

    let handle = vfs.open("notes.txt", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 64).await, b"0123456789");
    assert_eq!(handle.stat().await.size, 10);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_modified_file_reads_through_cache_in_dynamic_mode() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("a.bin", OpenFlags::read_write()).await.unwrap();
    handle.write_at(b"xyz", 0).await.unwrap();
    assert_eq!(read_at(&handle, 0, 5).await, [b'x', b'y', b'z', 3, 4]);
    assert_eq!(handle.mode().await, Mode::CacheBacked);
    handle.close().await.unwrap();
    assert_eq!(object.requests(), vec![(3, Some(2))]);
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_read_goes_direct_and_reseeks() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();

    let start = Instant::now();
    assert_eq!(read_at(&handle, 500, 100).await, data(1000)[500..600]);
    assert!(start.elapsed() >= vfs.options().read_wait);
    assert_eq!(handle.mode().await, Mode::DirectSource);

    assert_eq!(read_at(&handle, 0, 500).await, data(1000)[..500]);
    assert_eq!(object.requests(), vec![(500, Some(500)), (0, Some(1000))]);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_sequential_direct_reads_share_one_request() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 100).await, data(1000)[..100]);
    assert_eq!(read_at(&handle, 100, 100).await, data(1000)[100..200]);
    assert_eq!(object.requests(), vec![(0, Some(1000))]);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_resident_ranges_never_hit_the_remote() {
    let (dir, remote, object, full) = setup(CacheMode::Full);
    let handle = full.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 1000).await, data(1000));
    handle.close().await.unwrap();
    assert_eq!(object.open_count(), 1);

    let dynamic = mount(&dir, &remote, CacheMode::Dynamic, VfsOptions::default());
    let handle = dynamic.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 400).await, data(1000)[..400]);
    assert_eq!(read_at(&handle, 400, 600).await, data(1000)[400..]);
    assert_eq!(handle.mode().await, Mode::DirectSource);
    handle.close().await.unwrap();
    assert_eq!(object.open_count(), 1);
}

#[tokio::test]
async fn test_changed_remote_discards_stale_residency() {
    let dir = tempfile::tempdir().unwrap();
    let old = Arc::new(MockRemote::with_objects([MockObject::new("a.bin", vec![1u8; 100])]));
    let full = mount(&dir, &old, CacheMode::Full, VfsOptions::default());
    let handle = full.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 100).await, vec![1u8; 100]);
    handle.close().await.unwrap();

    let modified = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    let new = Arc::new(MockRemote::default());
    let object = new.insert(MockObject::new("a.bin", vec![2u8; 100]).with_modified(modified));
    let dynamic = mount(&dir, &new, CacheMode::Dynamic, VfsOptions::default());
    let handle = dynamic.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 100).await, vec![2u8; 100]);
    handle.close().await.unwrap();
    assert_eq!(object.requests(), vec![(0, Some(100))]);

    let item = dynamic.cache().item("a.bin").await.unwrap();
    assert!(!item.range_present(0, 1));
}

#[tokio::test]
async fn test_full_mode_fetches_each_span_once() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Full);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 100).await, data(1000)[..100]);
    assert_eq!(read_at(&handle, 0, 100).await, data(1000)[..100]);
    assert_eq!(read_at(&handle, 50, 100).await, data(1000)[50..150]);
    assert_eq!(object.requests(), vec![(0, Some(100)), (100, Some(50))]);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_direct_reads_are_not_written_back() {
    let (_dir, _remote, _object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 1000).await, data(1000));
    handle.close().await.unwrap();

    let item = vfs.cache().item("a.bin").await.unwrap();
    assert!(!item.range_present(0, 1));
    assert!(!item.exists());
}

#[tokio::test]
async fn test_read_past_end() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert!(read_at(&handle, 1000, 10).await.is_empty());
    assert!(read_at(&handle, 5000, 10).await.is_empty());
    assert_eq!(read_at(&handle, 995, 10).await, data(1000)[995..]);
    handle.close().await.unwrap();
    assert_eq!(object.requests(), vec![(995, Some(5))]);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_size_discovered_at_end_of_stream() {
    let object = MockObject::new("a.bin", data(300)).with_unknown_size();
    let (_dir, _remote, object, vfs) = setup_with(CacheMode::Dynamic, VfsOptions::default(), object);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 1000).await, data(300));
    let requests = object.open_count();
    assert!(read_at(&handle, 400, 100).await.is_empty());
    assert_eq!(object.open_count(), requests);
    handle.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_read_at_discovered_size_is_eof() {
    let object = MockObject::new("a.bin", data(300)).with_unknown_size();
    let (_dir, _remote, object, vfs) = setup_with(CacheMode::Dynamic, VfsOptions::default(), object);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 1000).await, data(300));
    let requests = object.requests();
    assert!(read_at(&handle, 300, 1000).await.is_empty());
    assert_eq!(object.requests(), requests);
    handle.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_read_waits_for_stream() {
    let options = VfsOptions {
        read_wait: Duration::from_secs(5),
        ..VfsOptions::default()
    };
    let (_dir, _remote, object, vfs) = setup_with(CacheMode::Dynamic, options, MockObject::new("a.bin", data(1000)));
    let handle = Arc::new(vfs.open("a.bin", OpenFlags::read_only()).await.unwrap());

    let start = Instant::now();
    let ahead = tokio::spawn({
        let handle = Arc::clone(&handle);
        async move { read_at(&handle, 100, 100).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(read_at(&handle, 0, 100).await, data(1000)[..100]);
    assert_eq!(ahead.await.unwrap(), data(1000)[100..200]);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(object.requests(), vec![(0, Some(1000))]);
    handle.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_wakes_waiting_reader() {
    let options = VfsOptions {
        read_wait: Duration::from_secs(5),
        ..VfsOptions::default()
    };
    let (_dir, _remote, _object, vfs) = setup_with(CacheMode::Dynamic, options, MockObject::new("a.bin", data(1000)));
    let handle = Arc::new(vfs.open("a.bin", OpenFlags::read_only()).await.unwrap());

    let start = Instant::now();
    let ahead = tokio::spawn({
        let handle = Arc::clone(&handle);
        async move {
            let mut buf = vec![0u8; 100];
            handle.read_at(&mut buf, 100).await
        }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    handle.close().await.unwrap();
    let err = ahead.await.unwrap().unwrap_err();
    assert!(matches!(&*err, ErrorKind::AlreadyClosed));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_close_unused_handle() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(handle.mode().await, Mode::Unopened);
    handle.close().await.unwrap();
    handle.close().await.unwrap();
    assert_eq!(object.open_count(), 0);
}

#[tokio::test]
async fn test_double_close() {
    let (_dir, _remote, _object, vfs) = setup(CacheMode::Full);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    read_at(&handle, 0, 10).await;
    handle.close().await.unwrap();
    handle.close().await.unwrap();
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_integrity_check_passes() {
    let (_dir, _remote, _object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    let mut buf = vec![0u8; 300];
    let mut read = Vec::new();
    loop {
        let n = handle.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        read.extend_from_slice(&buf[..n]);
    }
    assert_eq!(read, data(1000));
    handle.flush().await.unwrap();
    handle.close().await.unwrap();
    assert_eq!(vfs.stats().completed(), 1);
    assert_eq!(vfs.stats().bytes(), 1000);
}

#[tokio::test]
async fn test_corrupted_transfer_keeps_cached_data() {
    let object = MockObject::new("a.bin", data(1000)).with_digest(HashKind::Blake3, Some("0000"));
    let (dir, remote, object, full) = setup_with(CacheMode::Full, VfsOptions::default(), object);
    let handle = full.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 900, 100).await, data(1000)[900..]);
    handle.close().await.unwrap();

    let vfs = mount(&dir, &remote, CacheMode::Dynamic, VfsOptions::default());
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 900, 100).await, data(1000)[900..]);
    assert_eq!(read_at(&handle, 0, 1000).await, data(1000));
    let err = handle.close().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::CorruptedTransfer { kind: HashKind::Blake3, .. }));
    assert_eq!(err.errno(), libc::EIO);
    let err = handle.close().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::AlreadyClosed));
    assert_eq!(vfs.stats().failed(), 1);

    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 900, 100).await, data(1000)[900..]);
    handle.close().await.unwrap();
    assert_eq!(object.requests(), vec![(900, Some(100)), (0, Some(1000))]);
}

#[tokio::test(start_paused = true)]
async fn test_seek_skips_integrity_check() {
    let object = MockObject::new("a.bin", data(1000)).with_digest(HashKind::Blake3, Some("0000"));
    let (_dir, _remote, _object, vfs) = setup_with(CacheMode::Dynamic, VfsOptions::default(), object);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    read_at(&handle, 500, 500).await;
    read_at(&handle, 0, 1000).await;
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_vanished_object_skips_integrity_check() {
    let object = MockObject::new("a.bin", data(1000)).with_digest(HashKind::Blake3, Some("0000"));
    let (_dir, _remote, object, vfs) = setup_with(CacheMode::Dynamic, VfsOptions::default(), object);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    read_at(&handle, 0, 1000).await;
    object.vanish();
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_checksum_disabled() {
    let options = VfsOptions {
        checksum: false,
        ..VfsOptions::default()
    };
    let object = MockObject::new("a.bin", data(1000)).with_digest(HashKind::Blake3, Some("0000"));
    let (_dir, _remote, _object, vfs) = setup_with(CacheMode::Dynamic, options, object);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    read_at(&handle, 0, 1000).await;
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_reads_are_retried() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Dynamic);
    object.fail_next_streams(2);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 1000).await, data(1000));
    assert_eq!(object.requests(), vec![(0, Some(1000)); 3]);
    // The stream was reopened at the same offset, so the hash still covers everything.
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_retries_exhausted() {
    let options = VfsOptions {
        retry: RetryPolicy::new(1),
        ..VfsOptions::default()
    };
    let (_dir, _remote, object, vfs) = setup_with(CacheMode::Dynamic, options, MockObject::new("a.bin", data(1000)));
    object.fail_next_streams(5);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    let mut buf = vec![0u8; 100];
    let err = handle.read_at(&mut buf, 0).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Remote));
    assert_eq!(object.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_seek() {
    let options = VfsOptions {
        no_seek: true,
        ..VfsOptions::default()
    };
    let (_dir, _remote, object, vfs) = setup_with(CacheMode::Dynamic, options, MockObject::new("a.bin", data(1000)));
    object.fail_next_streams(1);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    let mut buf = vec![0u8; 100];
    // Without seeking a failed stream can't be repositioned.
    let err = handle.read_at(&mut buf, 0).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Remote));

    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    let err = handle.read_at(&mut buf, 500).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotSeekable));
    let err = handle.seek(SeekFrom::Start(0)).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotSeekable));
}

#[tokio::test]
async fn test_open_errors() {
    let (_dir, _remote, _object, vfs) = setup(CacheMode::Full);
    let err = vfs.open("a.bin", OpenFlags::read_write().create().exclusive()).await.err().unwrap();
    assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    let err = vfs.open("missing.bin", OpenFlags::read_only()).await.err().unwrap();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));
    let err = vfs.open("../escape", OpenFlags::read_only()).await.err().unwrap();
    assert!(matches!(&*err, ErrorKind::InvalidPath(_)));

    let handle = vfs.open("new.bin", OpenFlags::write_only().create().exclusive()).await.unwrap();
    handle.close().await.unwrap();
    assert!(vfs.dir("").contains("new.bin"));
    let err = vfs.open("new.bin", OpenFlags::write_only().create().exclusive()).await.err().unwrap();
    assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
}

#[tokio::test]
async fn test_access_mode_errors() {
    let (_dir, _remote, _object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("out.bin", OpenFlags::write_only().create()).await.unwrap();
    let mut buf = vec![0u8; 10];
    let err = handle.read_at(&mut buf, 0).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::BadFileDescriptor));
    handle.close().await.unwrap();

    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    let err = handle.write_at(b"x", 0).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::BadFileDescriptor));
    let err = handle.truncate(0).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::BadFileDescriptor));
    let err = handle.readdir().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotSupported));
    handle.sync().await.unwrap();
    handle.close().await.unwrap();

    let err = handle.read_at(&mut buf, 0).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::AlreadyClosed));
    let err = handle.seek(SeekFrom::Start(1)).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::AlreadyClosed));
}

#[tokio::test]
async fn test_append() {
    let (_dir, _remote, _object, vfs) = setup(CacheMode::Full);
    let handle = vfs.open("log.txt", OpenFlags::read_write().create()).await.unwrap();
    handle.write_str("abc").await.unwrap();
    handle.close().await.unwrap();

    let handle = vfs.open("log.txt", OpenFlags::write_only().append()).await.unwrap();
    handle.write_at(b"def", 0).await.unwrap();
    handle.write(b"gh").await.unwrap();
    handle.sync().await.unwrap();
    handle.close().await.unwrap();

    let handle = vfs.open("log.txt", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 64).await, b"abcdefgh");
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_truncate_on_open_and_explicit() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Full);
    let handle = vfs.open("a.bin", OpenFlags::read_write().truncate()).await.unwrap();
    assert_eq!(handle.size().await, 0);
    assert!(read_at(&handle, 0, 10).await.is_empty());
    handle.truncate(4).await.unwrap();
    assert_eq!(read_at(&handle, 0, 10).await, [0, 0, 0, 0]);
    handle.close().await.unwrap();
    assert_eq!(object.open_count(), 0);
}

#[tokio::test]
async fn test_seek_through_cache() {
    let (_dir, _remote, _object, vfs) = setup(CacheMode::Full);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(handle.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    assert_eq!(handle.seek(SeekFrom::Start(10)).await.unwrap(), 10);
    let mut buf = [0u8; 5];
    assert_eq!(handle.read(&mut buf).await.unwrap(), 5);
    assert_eq!(buf.to_vec(), data(1000)[10..15]);
    assert_eq!(handle.seek(SeekFrom::End(-2)).await.unwrap(), 998);
    let mut buf = [0u8; 10];
    assert_eq!(handle.read(&mut buf).await.unwrap(), 2);
    assert_eq!(handle.read(&mut buf).await.unwrap(), 0);
    let err = handle.seek(SeekFrom::Current(-2000)).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::InvalidSeek));
    handle.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_seek_direct_skips_buffered_bytes() {
    let (_dir, _remote, object, vfs) = setup(CacheMode::Dynamic);
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    let mut buf = [0u8; 100];
    assert_eq!(handle.read(&mut buf).await.unwrap(), 100);
    assert_eq!(handle.seek(SeekFrom::Start(500)).await.unwrap(), 500);
    assert_eq!(handle.read(&mut buf).await.unwrap(), 100);
    assert_eq!(buf.to_vec(), data(1000)[500..600]);
    assert_eq!(object.open_count(), 1);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_listing_is_cached_until_it_expires() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MockRemote::with_objects([MockObject::new("a.bin", data(10))]));
    let clock = ManualClock::new(UtcDateTime::UNIX_EPOCH);
    let cache = LocalCache::new(dir.path(), CacheMode::Full).unwrap();
    let handle: RemoteHandle = remote.clone();
    let vfs = Vfs::with_clock(handle, cache, VfsOptions::default(), clock.clone());

    assert!(vfs.lookup("a.bin").await.unwrap().is_some());
    remote.insert(MockObject::new("b.bin", data(10)));
    assert!(vfs.lookup("b.bin").await.unwrap().is_none());
    assert_eq!(remote.listings(), 1);

    clock.advance(vfs.options().dir_cache_time + Duration::from_secs(1));
    assert!(vfs.lookup("b.bin").await.unwrap().is_some());
    assert_eq!(remote.listings(), 2);

    remote.insert(MockObject::new("c.bin", data(10)));
    vfs.invalidate_listing().await;
    let handle = vfs.open("c.bin", OpenFlags::read_only()).await.unwrap();
    handle.close().await.unwrap();
    assert_eq!(remote.listings(), 3);
}

#[tokio::test]
async fn test_reopen_after_refresh_uses_new_object() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MockRemote::with_objects([MockObject::new("a.bin", data(10))]));
    let clock = ManualClock::new(UtcDateTime::UNIX_EPOCH);
    let cache = LocalCache::new(dir.path(), CacheMode::Full).unwrap();
    let handle: RemoteHandle = remote.clone();
    let vfs = Vfs::with_clock(handle, cache, VfsOptions::default(), clock.clone());

    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    assert_eq!(read_at(&handle, 0, 100).await, data(10));
    handle.close().await.unwrap();

    let modified = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    let object = remote.insert(MockObject::new("a.bin", vec![9u8; 20]).with_modified(modified));
    clock.advance(vfs.options().dir_cache_time + Duration::from_secs(1));
    let handle = vfs.open("a.bin", OpenFlags::read_only()).await.unwrap();
    let stat = handle.stat().await;
    assert_eq!(stat.size, 20);
    assert_eq!(stat.modified, modified);
    assert_eq!(read_at(&handle, 0, 100).await, vec![9u8; 20]);
    handle.close().await.unwrap();
    assert_eq!(object.requests(), vec![(0, Some(20))]);
}
