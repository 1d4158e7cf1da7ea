use std::fs;

use tempfile::TempDir;
use webdiff::config::Config;
use webdiff::identity::{hash_to_hex, ContentIdentity, Hasher};
use webdiff::DiffService;

use super::support::{service_with, write_file, FakeMagick, PROBE};

#[test]
fn test_identity_never_touches_the_toolkit() {
    let dir = TempDir::new().unwrap();
    let fake = FakeMagick::new();
    let service = service_with(&dir, &fake);
    let a = write_file(&dir, "a.txt", b"hello");
    let b = write_file(&dir, "b.txt", b"hello");

    assert!(service.are_identical(&a, &b).unwrap());
    assert_eq!(fake.launches(PROBE), 0);
    assert_eq!(fake.work_launches(), 0);
}

#[test]
fn test_one_byte_difference() {
    let dir = TempDir::new().unwrap();
    let mut content = vec![b'x'; 8192];
    let a = write_file(&dir, "a.bin", &content);
    content[8191] = b'y';
    let b = write_file(&dir, "b.bin", &content);

    let service = DiffService::new(Config::default());
    assert!(!service.are_identical(&a, &b).unwrap());
}

#[test]
fn test_relative_and_absolute_paths_share_a_cache_entry() {
    let dir = TempDir::new().unwrap();
    let a = write_file(&dir, "a.txt", b"shared");
    let cwd = std::env::current_dir().unwrap();

    let identity = ContentIdentity::new(Hasher::new(), 8);
    identity.content_hash(&a).unwrap();

    // Only meaningful when the temp dir sits under the working directory.
    if let Ok(relative) = a.strip_prefix(&cwd) {
        identity.content_hash(relative).unwrap();
        assert_eq!(identity.stats().hits, 1);
    }
}

#[test]
fn test_cache_capacity_bounds_entries() {
    let dir = TempDir::new().unwrap();
    let identity = ContentIdentity::new(Hasher::new(), 2);

    for i in 0..4 {
        let path = write_file(&dir, &format!("f{i}"), format!("file {i}").as_bytes());
        identity.content_hash(&path).unwrap();
    }

    let stats = identity.stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.evictions, 2);
}

#[test]
fn test_evicted_digest_is_recomputed() {
    let dir = TempDir::new().unwrap();
    let identity = ContentIdentity::new(Hasher::new(), 1);
    let a = write_file(&dir, "a", b"aaa");
    let b = write_file(&dir, "b", b"bbb");

    let first = identity.content_hash(&a).unwrap();
    identity.content_hash(&b).unwrap();
    assert_eq!(identity.content_hash(&a).unwrap(), first);
    assert_eq!(identity.stats().misses, 3);
}

#[test]
fn test_mmap_and_streaming_agree() {
    let dir = TempDir::new().unwrap();
    let content: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let path = write_file(&dir, "big.bin", &content);

    let mapped = Hasher::new()
        .with_mmap(true)
        .with_mmap_threshold(1024)
        .full_hash(&path)
        .unwrap();
    let streamed = Hasher::new().with_mmap(false).full_hash(&path).unwrap();

    assert_eq!(hash_to_hex(&mapped), hash_to_hex(&streamed));
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_io_error() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let a = write_file(&dir, "a", b"secret");
    let b = write_file(&dir, "b", b"secret");
    fs::set_permissions(&b, fs::Permissions::from_mode(0o000)).unwrap();

    // Root can read anything; nothing to check then.
    if fs::read(&b).is_ok() {
        return;
    }

    let identity = ContentIdentity::new(Hasher::new(), 8);
    let err = identity.are_identical(&a, &b).unwrap_err();
    assert!(err.is_permission_denied());

    fs::set_permissions(&b, fs::Permissions::from_mode(0o644)).unwrap();
    assert!(identity.are_identical(&a, &b).unwrap());
}
