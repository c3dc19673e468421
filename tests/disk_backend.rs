// tests/disk_backend.rs

mod common;
use crate::common::{init_tracing, CopyOptionsBuilder, TestResult};

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use filetime::FileTime;
use fsmirror::copy::{copy, init_index, CopyOptions, SAFE_TIME};
use fsmirror::errors::FsMirrorError;
use fsmirror::fs::lock::lock_path_for;
use fsmirror::fs::{with_lock, DiskFileSystem, FileSystem};

fn write_source(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(root.join("nested"))?;
    fs::write(root.join("a.txt"), "alpha")?;
    fs::write(root.join("nested/b.txt"), "alpha")?;
    fs::write(root.join("nested/c.txt"), "gamma")?;
    for (file, mode) in [("a.txt", 0o644), ("nested/b.txt", 0o644), ("nested/c.txt", 0o600)] {
        fs::set_permissions(root.join(file), fs::Permissions::from_mode(mode))?;
    }
    std::os::unix::fs::symlink("../a.txt", root.join("nested/up"))?;
    Ok(())
}

#[tokio::test]
async fn copies_a_real_tree() -> TestResult {
    init_tracing();

    let tmp = tempfile::tempdir()?;
    let source = tmp.path().join("src");
    let destination = tmp.path().join("out/tree");
    write_source(&source)?;

    let disk = DiskFileSystem::new();
    let updated = copy(&disk, &destination, &disk, &source, &CopyOptions::default()).await?;

    assert!(updated);
    assert_eq!(fs::read_to_string(destination.join("nested/b.txt"))?, "alpha");
    assert_eq!(
        fs::read_link(destination.join("nested/up"))?,
        Path::new("../a.txt")
    );
    let c = fs::metadata(destination.join("nested/c.txt"))?;
    assert_eq!(c.permissions().mode() & 0o777, 0o600);
    assert_eq!(
        FileTime::from_last_modification_time(&c),
        FileTime::from_last_modification_time(&fs::metadata(source.join("nested/c.txt"))?)
    );
    Ok(())
}

#[tokio::test]
async fn index_copies_share_inodes_on_disk() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = tmp.path().join("src");
    let index = tmp.path().join("index");
    write_source(&source)?;

    let disk = DiskFileSystem::new();
    init_index(&disk, &index).await?;
    let options = CopyOptionsBuilder::new().index(&index).read_only().build();

    copy(&disk, &tmp.path().join("one"), &disk, &source, &options).await?;
    copy(&disk, &tmp.path().join("two"), &disk, &source, &options).await?;

    let a_one = fs::metadata(tmp.path().join("one/a.txt"))?;
    let b_one = fs::metadata(tmp.path().join("one/nested/b.txt"))?;
    let a_two = fs::metadata(tmp.path().join("two/a.txt"))?;
    assert_eq!(a_one.ino(), b_one.ino());
    assert_eq!(a_one.ino(), a_two.ino());
    // Two destinations with two copies each, plus the entry itself.
    assert_eq!(a_one.nlink(), 5);
    assert_eq!(FileTime::from_last_modification_time(&a_one).unix_seconds(), SAFE_TIME);
    assert_eq!(a_one.permissions().mode() & 0o777, 0o444);

    let c_one = fs::metadata(tmp.path().join("one/nested/c.txt"))?;
    assert_eq!(c_one.permissions().mode() & 0o777, 0o400);
    Ok(())
}

#[tokio::test]
async fn stable_time_stamps_every_entry() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = tmp.path().join("src");
    let destination = tmp.path().join("out");
    write_source(&source)?;

    let disk = DiskFileSystem::new();
    let options = CopyOptionsBuilder::new().stable_time().stable_sort().build();
    copy(&disk, &destination, &disk, &source, &options).await?;

    for relative in ["", "a.txt", "nested", "nested/b.txt", "nested/c.txt", "nested/up"] {
        let meta = fs::symlink_metadata(destination.join(relative))?;
        assert_eq!(
            FileTime::from_last_modification_time(&meta).unix_seconds(),
            SAFE_TIME,
            "{relative}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn sockets_are_unsupported() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = tmp.path().join("src");
    fs::create_dir_all(&source)?;
    let _listener = std::os::unix::net::UnixListener::bind(source.join("sock"))?;

    let disk = DiskFileSystem::new();
    let err = copy(
        &disk,
        &tmp.path().join("out"),
        &disk,
        &source,
        &CopyOptions::default(),
    )
    .await
    .expect_err("sockets can't be copied");

    assert!(
        matches!(err, FsMirrorError::UnsupportedFileType { .. }),
        "got {err:?}"
    );
    Ok(())
}

#[tokio::test]
async fn lock_file_holds_the_pid() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let target = tmp.path().join("entry.dat");
    let disk = DiskFileSystem::new();

    let owner = with_lock(&disk, &target, || async {
        disk.read_file(&lock_path_for(&target)).await
    })
    .await?;

    let owner = String::from_utf8(owner)?;
    assert_eq!(owner.split(':').next(), Some(std::process::id().to_string().as_str()));
    assert!(!lock_path_for(&target).exists());
    Ok(())
}
