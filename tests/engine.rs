//! End-to-end scenarios driving the dispatcher the way a host kernel
//! would, without going through `fuser`.

use nufs::Engine;
use tempfile::tempdir;

#[test]
fn data_survives_a_remount() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("img");

    {
        let mut engine = Engine::mount(&image).unwrap();
        engine.mkdir("/home", 0o755, 1000, 1000).unwrap();
        engine.mknod("/home/notes.txt", libc::S_IFREG | 0o644).unwrap();
        engine.write("/home/notes.txt", b"remember the milk", 0).unwrap();
    }

    let mut engine = Engine::mount(&image).unwrap();
    let attr = engine.getattr("/home/notes.txt").unwrap();
    assert_eq!(attr.size, "remember the milk".len() as u64);
    assert_eq!(attr.uid, 1000);

    let mut buf = [0u8; 18];
    let n = engine.read("/home/notes.txt", &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"remember the milk");
}

#[test]
fn full_directory_lifecycle() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::mount(&dir.path().join("img")).unwrap();

    engine.mkdir("/etc", 0o755, 0, 0).unwrap();
    engine.mknod("/etc/hosts", libc::S_IFREG | 0o644).unwrap();

    assert_eq!(
        engine.rmdir("/etc").unwrap_err(),
        nufs::Error::NotEmpty
    );

    engine.unlink("/etc/hosts").unwrap();
    engine.rmdir("/etc").unwrap();

    assert_eq!(engine.getattr("/etc").unwrap_err(), nufs::Error::NotFound);
}

#[test]
fn rename_overwrites_destination_file() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::mount(&dir.path().join("img")).unwrap();

    engine.mknod("/a", libc::S_IFREG | 0o644).unwrap();
    engine.write("/a", b"new", 0).unwrap();
    engine.mknod("/b", libc::S_IFREG | 0o644).unwrap();
    engine.write("/b", b"stale data here", 0).unwrap();

    engine.rename("/a", "/b").unwrap();

    assert_eq!(engine.getattr("/a").unwrap_err(), nufs::Error::NotFound);
    let mut buf = [0u8; 3];
    engine.read("/b", &mut buf, 0).unwrap();
    assert_eq!(&buf, b"new");
}

#[test]
fn large_file_round_trips_through_the_indirect_block() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
    engine.mknod("/big", libc::S_IFREG | 0o644).unwrap();

    let pattern: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    engine.write("/big", &pattern, 0).unwrap();

    let mut readback = vec![0u8; pattern.len()];
    let n = engine.read("/big", &mut readback, 0).unwrap();
    assert_eq!(n, pattern.len());
    assert_eq!(readback, pattern);

    let attr = engine.getattr("/big").unwrap();
    assert_eq!(attr.size, pattern.len() as u64);
}

#[test]
fn readdir_reflects_created_and_removed_children() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
    engine.mkdir("/d", 0o755, 0, 0).unwrap();
    engine.mknod("/d/a", libc::S_IFREG | 0o644).unwrap();
    engine.mknod("/d/b", libc::S_IFREG | 0o644).unwrap();

    let mut names: Vec<String> = engine
        .readdir("/d")
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    names.sort();
    assert_eq!(names, vec![".", "..", "a", "b"]);

    engine.unlink("/d/a").unwrap();
    let mut names: Vec<String> = engine
        .readdir("/d")
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    names.sort();
    assert_eq!(names, vec![".", "..", "b"]);
}
