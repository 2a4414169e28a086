#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use common::{ram_vfs, read_file, write_file};
use vfs_core::{FsError, OpenFlags, WalkOptions};

#[test]
fn second_ramfs_mounts_over_an_empty_directory() {
    let (vfs, task) = ram_vfs();
    vfs.mkdir(&task, "/mnt").unwrap();
    vfs.mount(&task, "/mnt", "ramfs").unwrap();

    write_file(&vfs, &task, "/mnt/inner", b"on the mount");
    assert_eq!(read_file(&vfs, &task, "/mnt/inner"), b"on the mount");

    // The outer file system is untouched.
    write_file(&vfs, &task, "/outer", b"on the root");
    assert_eq!(read_file(&vfs, &task, "/outer"), b"on the root");
}

#[test]
fn mounting_the_root_twice_is_busy() {
    let (vfs, _task) = ram_vfs();
    assert_eq!(vfs.mount_root("ramfs").err(), Some(FsError::Busy));
}

#[test]
fn mounting_an_unknown_fs_type_is_invalid() {
    let (vfs, task) = ram_vfs();
    vfs.mkdir(&task, "/mnt").unwrap();
    assert_eq!(
        vfs.mount(&task, "/mnt", "no-such-fs").err(),
        Some(FsError::InvalidArgument)
    );
}

#[test]
fn link_across_mounts_is_cross_device() {
    let (vfs, task) = ram_vfs();
    vfs.mkdir(&task, "/mnt").unwrap();
    vfs.mount(&task, "/mnt", "ramfs").unwrap();

    write_file(&vfs, &task, "/a", b"x");
    assert_eq!(
        vfs.link(&task, "/a", "/mnt/b").err(),
        Some(FsError::CrossDevice)
    );
}

#[test]
fn rename_across_mounts_is_cross_device() {
    let (vfs, task) = ram_vfs();
    vfs.mkdir(&task, "/mnt").unwrap();
    vfs.mount(&task, "/mnt", "ramfs").unwrap();

    write_file(&vfs, &task, "/a", b"x");
    assert_eq!(
        vfs.rename(&task, "/a", "/mnt/a").err(),
        Some(FsError::CrossDevice)
    );
}

#[test]
fn open_files_keep_a_mount_busy() {
    let (vfs, task) = ram_vfs();
    vfs.mkdir(&task, "/mnt").unwrap();
    vfs.mount(&task, "/mnt", "ramfs").unwrap();
    write_file(&vfs, &task, "/mnt/f", b"x");

    let fd = vfs.open(&task, "/mnt/f", OpenFlags::empty()).unwrap();
    assert_eq!(vfs.unmount(&task, "/mnt").err(), Some(FsError::Busy));
    vfs.close(&task, fd).unwrap();

    vfs.unmount(&task, "/mnt").unwrap();
}

#[test]
fn cwd_keeps_a_mount_busy() {
    let (vfs, task) = ram_vfs();
    vfs.mkdir(&task, "/mnt").unwrap();
    vfs.mount(&task, "/mnt", "ramfs").unwrap();

    vfs.chdir(&task, "/mnt").unwrap();
    assert_eq!(vfs.unmount(&task, "/mnt").err(), Some(FsError::Busy));

    vfs.chdir(&task, "/").unwrap();
    vfs.unmount(&task, "/mnt").unwrap();
}

#[test]
fn unmount_reveals_the_directory_underneath() {
    let (vfs, task) = ram_vfs();
    vfs.mkdir(&task, "/mnt").unwrap();
    vfs.mount(&task, "/mnt", "ramfs").unwrap();
    write_file(&vfs, &task, "/mnt/only-inside", b"x");
    vfs.unmount(&task, "/mnt").unwrap();

    // The original (empty) directory is back.
    assert_eq!(
        vfs.open(&task, "/mnt/only-inside", OpenFlags::empty()).err(),
        Some(FsError::NotFound)
    );
    vfs.rmdir(&task, "/mnt").unwrap();
}

#[test]
fn mounting_over_a_file_is_not_a_directory() {
    let (vfs, task) = ram_vfs();
    write_file(&vfs, &task, "/f", b"x");
    assert_eq!(
        vfs.mount(&task, "/f", "ramfs").err(),
        Some(FsError::NotDirectory)
    );
}

#[test]
fn fs_relative_walks_restart_at_the_mount_root() {
    let (vfs, task) = ram_vfs();
    vfs.mkdir(&task, "/mnt").unwrap();
    vfs.mount(&task, "/mnt", "ramfs").unwrap();
    write_file(&vfs, &task, "/mnt/x", b"inner");
    write_file(&vfs, &task, "/x", b"outer");

    let inner_dir = vfs.walk(None, "/mnt", WalkOptions::empty()).unwrap().dnode;

    let fsrel = vfs
        .walk(Some(&inner_dir), "/x", WalkOptions::FS_RELATIVE)
        .unwrap();
    let inner = vfs.walk(None, "/mnt/x", WalkOptions::empty()).unwrap();
    assert!(std::sync::Arc::ptr_eq(&fsrel.dnode, &inner.dnode));

    let absolute = vfs.walk(Some(&inner_dir), "/x", WalkOptions::empty()).unwrap();
    let outer = vfs.walk(None, "/x", WalkOptions::empty()).unwrap();
    assert!(std::sync::Arc::ptr_eq(&absolute.dnode, &outer.dnode));
}
