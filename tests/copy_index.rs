// tests/copy_index.rs

mod common;
use crate::common::{init_tracing, read_string, CopyOptionsBuilder, TestResult, TreeBuilder};

use std::path::{Path, PathBuf};

use filetime::FileTime;
use fsmirror::copy::{copy, index_entry_path, init_index, plan_copy, safe_time, Operation};
use fsmirror::fs::{FileSystem, ListingOrder, MemoryFileSystem};
use fsmirror_test_utils::RecordingFileSystem;

const INDEX: &str = "/idx";

fn source() -> MemoryFileSystem {
    let fs = TreeBuilder::new("/a").file("x.txt", "shared").build();
    TreeBuilder::on(fs, "/b")
        .file("y.txt", "shared")
        .file("other.txt", "different")
        .build()
}

fn entry_for(content: &str) -> PathBuf {
    let hash = blake3::hash(content.as_bytes()).to_hex().to_string();
    index_entry_path(Path::new(INDEX), &hash)
}

async fn index_blobs(fs: &dyn FileSystem) -> Vec<String> {
    let mut names = Vec::new();
    for shard in fs.read_dir(Path::new(INDEX)).await.expect("index root") {
        let shard_path = Path::new(INDEX).join(&shard);
        for name in fs.read_dir(&shard_path).await.expect("index shard") {
            names.push(name.to_string_lossy().into_owned());
        }
    }
    names.sort();
    names
}

#[tokio::test]
async fn identical_content_shares_one_index_entry() -> TestResult {
    init_tracing();

    let src = source();
    let dst = MemoryFileSystem::new();
    init_index(&dst, Path::new(INDEX)).await?;
    let options = CopyOptionsBuilder::new().index(INDEX).build();

    assert!(copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?);
    assert!(copy(&dst, Path::new("/outB"), &src, Path::new("/b"), &options).await?);

    let x = dst.lstat(Path::new("/outA/x.txt")).await?;
    let y = dst.lstat(Path::new("/outB/y.txt")).await?;
    let entry = dst.lstat(&entry_for("shared")).await?;
    assert!(x.same_inode(&y));
    assert!(x.same_inode(&entry));
    assert_eq!(entry.nlink, 3);
    assert_eq!(entry.mtime, safe_time());
    assert_eq!(read_string(&dst, "/outB/y.txt").await, "shared");

    // One blob per distinct content, no lock files left behind.
    let blobs = index_blobs(&dst).await;
    assert_eq!(blobs.len(), 2, "{blobs:?}");
    assert!(blobs.iter().all(|name| name.ends_with(".dat")));
    Ok(())
}

#[tokio::test]
async fn recopy_through_index_touches_nothing() -> TestResult {
    let src = source();
    let dst = RecordingFileSystem::new(MemoryFileSystem::new());
    init_index(&dst, Path::new(INDEX)).await?;
    let options = CopyOptionsBuilder::new().index(INDEX).build();

    copy(&dst, Path::new("/outB"), &src, Path::new("/b"), &options).await?;
    dst.clear();

    let updated = copy(&dst, Path::new("/outB"), &src, Path::new("/b"), &options).await?;
    assert!(!updated);
    assert!(dst.calls().is_empty(), "unexpected writes: {:?}", dst.calls());
    Ok(())
}

#[tokio::test]
async fn auto_repair_rewrites_a_tampered_entry_in_place() -> TestResult {
    init_tracing();

    let src = source();
    let dst = MemoryFileSystem::new();
    init_index(&dst, Path::new(INDEX)).await?;
    let options = CopyOptionsBuilder::new().index(INDEX).auto_repair().build();
    copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?;

    // Writing through the hardlink corrupts the shared entry.
    dst.write_file(Path::new("/outA/x.txt"), b"tampered").await?;
    let entry_path = entry_for("shared");
    let corrupted = dst.lstat(&entry_path).await?;
    assert_ne!(corrupted.mtime, safe_time());

    let plan = plan_copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?;
    assert_eq!(
        plan.batches.structural(),
        &[Operation::WriteIndexEntry {
            source: "/a/x.txt".into(),
            index_path: entry_path.clone(),
        }]
    );

    copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?;

    let repaired = dst.lstat(&entry_path).await?;
    let destination = dst.lstat(Path::new("/outA/x.txt")).await?;
    assert_eq!(repaired.mtime, safe_time());
    assert_eq!(repaired.ino, corrupted.ino);
    assert!(destination.same_inode(&repaired));
    assert_eq!(read_string(&dst, "/outA/x.txt").await, "shared");
    Ok(())
}

#[tokio::test]
async fn repair_reaches_every_destination_sharing_the_entry() -> TestResult {
    init_tracing();

    let src = TreeBuilder::new("/dup")
        .file("one.txt", "twin")
        .file("two.txt", "twin")
        .build();
    let dst = MemoryFileSystem::new();
    init_index(&dst, Path::new(INDEX)).await?;
    let options = CopyOptionsBuilder::new()
        .index(INDEX)
        .auto_repair()
        .read_only()
        .stable_sort()
        .build();

    copy(&dst, Path::new("/out"), &src, Path::new("/dup"), &options).await?;
    copy(&dst, Path::new("/other"), &src, Path::new("/dup"), &options).await?;

    dst.write_file(Path::new("/out/one.txt"), b"tampered").await?;
    assert_eq!(read_string(&dst, "/other/two.txt").await, "tampered");

    assert!(copy(&dst, Path::new("/out"), &src, Path::new("/dup"), &options).await?);

    let entry = dst.lstat(&entry_for("twin")).await?;
    assert_eq!(entry.mtime, safe_time());
    assert_eq!(entry.permissions(), 0o444);
    assert_eq!(entry.nlink, 5);
    for path in ["/out/one.txt", "/out/two.txt", "/other/one.txt", "/other/two.txt"] {
        let stat = dst.lstat(Path::new(path)).await?;
        assert!(stat.same_inode(&entry), "{path} not linked to the entry");
        assert_eq!(read_string(&dst, path).await, "twin", "{path}");
    }

    // The other tree needs nothing once the shared entry is repaired.
    assert!(!copy(&dst, Path::new("/other"), &src, Path::new("/dup"), &options).await?);
    Ok(())
}

#[tokio::test]
async fn new_file_next_to_a_tampered_link_gets_repaired_content() -> TestResult {
    for order in [ListingOrder::Sorted, ListingOrder::Reversed] {
        let src = TreeBuilder::new("/mix").file("one.txt", "twin").build();
        src.set_listing_order(order);
        let dst = MemoryFileSystem::new();
        init_index(&dst, Path::new(INDEX)).await?;
        let options = CopyOptionsBuilder::new().index(INDEX).auto_repair().build();

        copy(&dst, Path::new("/out"), &src, Path::new("/mix"), &options).await?;
        dst.write_file(Path::new("/out/one.txt"), b"tampered").await?;

        // `one.txt` is linked to the modified entry, `two.txt` is absent.
        src.add_file("/mix/two.txt", "twin");
        copy(&dst, Path::new("/out"), &src, Path::new("/mix"), &options).await?;

        let entry = dst.lstat(&entry_for("twin")).await?;
        assert_eq!(entry.mtime, safe_time(), "{order:?}");
        for path in ["/out/one.txt", "/out/two.txt"] {
            assert!(dst.lstat(Path::new(path)).await?.same_inode(&entry), "{order:?} {path}");
            assert_eq!(read_string(&dst, path).await, "twin", "{order:?} {path}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn without_auto_repair_a_tampered_entry_is_left_alone() -> TestResult {
    let src = source();
    let dst = MemoryFileSystem::new();
    init_index(&dst, Path::new(INDEX)).await?;
    let options = CopyOptionsBuilder::new().index(INDEX).build();
    copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?;

    let entry_path = entry_for("shared");
    let altered = FileTime::from_unix_time(1_000, 0);
    dst.set_times(&entry_path, altered, altered).await?;
    let before = dst.lstat(&entry_path).await?;

    let plan = plan_copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?;
    assert!(plan.batches.structural().is_empty());

    copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?;
    let after = dst.lstat(&entry_path).await?;
    assert_eq!(after.ino, before.ino);
    assert_eq!(after.mtime, altered);
    Ok(())
}

#[tokio::test]
async fn unrelated_destination_is_replaced_only_with_overwrite() -> TestResult {
    let src = source();
    let dst = MemoryFileSystem::new();
    init_index(&dst, Path::new(INDEX)).await?;
    dst.add_file("/outA/x.txt", "local edits");

    let options = CopyOptionsBuilder::new().index(INDEX).build();
    copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?;
    assert_eq!(read_string(&dst, "/outA/x.txt").await, "local edits");
    assert!(dst.lstat(&entry_for("shared")).await.is_err());

    let options = CopyOptionsBuilder::new().index(INDEX).overwrite().build();
    copy(&dst, Path::new("/outA"), &src, Path::new("/a"), &options).await?;
    let destination = dst.lstat(Path::new("/outA/x.txt")).await?;
    let entry = dst.lstat(&entry_for("shared")).await?;
    assert!(destination.same_inode(&entry));
    assert_eq!(read_string(&dst, "/outA/x.txt").await, "shared");
    Ok(())
}

#[tokio::test]
async fn read_only_entries_drop_write_bits() -> TestResult {
    let src = source();
    let dst = MemoryFileSystem::new();
    init_index(&dst, Path::new(INDEX)).await?;
    let options = CopyOptionsBuilder::new().index(INDEX).read_only().build();

    copy(&dst, Path::new("/outB"), &src, Path::new("/b"), &options).await?;

    for content in ["shared", "different"] {
        let entry = dst.lstat(&entry_for(content)).await?;
        assert_eq!(entry.permissions(), 0o444, "{content}");
    }
    Ok(())
}

#[tokio::test]
async fn backend_without_inodes_compares_content() -> TestResult {
    init_tracing();

    let src = source();
    let dst = RecordingFileSystem::new(MemoryFileSystem::new()).without_inodes();
    init_index(&dst, Path::new(INDEX)).await?;
    let options = CopyOptionsBuilder::new().index(INDEX).build();

    copy(&dst, Path::new("/outB"), &src, Path::new("/b"), &options).await?;
    dst.clear();

    let updated = copy(&dst, Path::new("/outB"), &src, Path::new("/b"), &options).await?;
    assert!(!updated);
    assert!(dst.calls().is_empty(), "unexpected writes: {:?}", dst.calls());
    Ok(())
}

#[tokio::test]
async fn duplicate_content_in_one_tree_shares_an_entry() -> TestResult {
    let src = TreeBuilder::new("/dup")
        .file("one.txt", "twin")
        .file("two.txt", "twin")
        .build();
    let dst = MemoryFileSystem::new();
    init_index(&dst, Path::new(INDEX)).await?;
    let options = CopyOptionsBuilder::new().index(INDEX).build();

    copy(&dst, Path::new("/out"), &src, Path::new("/dup"), &options).await?;

    let one = dst.lstat(Path::new("/out/one.txt")).await?;
    let two = dst.lstat(Path::new("/out/two.txt")).await?;
    assert!(one.same_inode(&two));
    assert_eq!(index_blobs(&dst).await.len(), 1);
    assert_eq!(dst.lstat(&entry_for("twin")).await?.mtime, safe_time());
    Ok(())
}
