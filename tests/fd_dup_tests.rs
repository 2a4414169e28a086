#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use common::{ram_vfs, write_file};
use vfs_core::{config::MAX_FD, FsError, OpenFlags};

#[test]
fn dup_keeps_the_file_alive_after_original_closes() {
    let (vfs, task) = ram_vfs();
    write_file(&vfs, &task, "/a", b"hi");

    let fd1 = vfs.open(&task, "/a", OpenFlags::empty()).unwrap();
    let fd2 = vfs.dup(&task, fd1).unwrap();
    assert_ne!(fd1, fd2);

    vfs.close(&task, fd1).unwrap();

    let mut buf = [0u8; 2];
    assert_eq!(vfs.read(&task, fd2, &mut buf).unwrap(), 2);
    assert_eq!(&buf, b"hi");
    vfs.close(&task, fd2).unwrap();
}

#[test]
fn dup_shares_the_file_position() {
    let (vfs, task) = ram_vfs();
    write_file(&vfs, &task, "/a", b"abcd");

    let fd1 = vfs.open(&task, "/a", OpenFlags::empty()).unwrap();
    let fd2 = vfs.dup(&task, fd1).unwrap();

    let mut buf = [0u8; 2];
    vfs.read(&task, fd1, &mut buf).unwrap();
    assert_eq!(&buf, b"ab");
    vfs.read(&task, fd2, &mut buf).unwrap();
    assert_eq!(&buf, b"cd");

    vfs.close(&task, fd1).unwrap();
    vfs.close(&task, fd2).unwrap();
}

#[test]
fn dup2_onto_itself_is_a_noop() {
    let (vfs, task) = ram_vfs();
    write_file(&vfs, &task, "/a", b"x");

    let fd = vfs.open(&task, "/a", OpenFlags::empty()).unwrap();
    assert_eq!(vfs.dup2(&task, fd, fd).unwrap(), fd);

    let mut buf = [0u8; 1];
    assert_eq!(vfs.read(&task, fd, &mut buf).unwrap(), 1);
    vfs.close(&task, fd).unwrap();
}

#[test]
fn dup2_closes_the_previous_occupant() {
    let (vfs, task) = ram_vfs();
    write_file(&vfs, &task, "/a", b"aa");
    write_file(&vfs, &task, "/b", b"bb");

    let fda = vfs.open(&task, "/a", OpenFlags::empty()).unwrap();
    let fdb = vfs.open(&task, "/b", OpenFlags::empty()).unwrap();

    assert_eq!(vfs.dup2(&task, fda, fdb).unwrap(), fdb);

    // fdb now reads from /a.
    let mut buf = [0u8; 2];
    vfs.read(&task, fdb, &mut buf).unwrap();
    assert_eq!(&buf, b"aa");

    // The old /b object is fully closed, so /b can be unlinked.
    vfs.unlink(&task, "/b").unwrap();

    vfs.close(&task, fda).unwrap();
    vfs.close(&task, fdb).unwrap();
}

#[test]
fn bad_descriptors_are_rejected() {
    let (vfs, task) = ram_vfs();
    let mut buf = [0u8; 1];
    assert_eq!(vfs.read(&task, 7, &mut buf).err(), Some(FsError::BadDescriptor));
    assert_eq!(vfs.close(&task, 7).err(), Some(FsError::BadDescriptor));
    assert_eq!(vfs.dup(&task, 7).err(), Some(FsError::BadDescriptor));
    assert_eq!(
        vfs.dup2(&task, 0, MAX_FD).err(),
        Some(FsError::BadDescriptor)
    );
}

#[test]
fn descriptor_slots_run_out_at_the_table_size() {
    let (vfs, task) = ram_vfs();
    write_file(&vfs, &task, "/a", b"x");

    let mut fds = Vec::new();
    for _ in 0..MAX_FD {
        fds.push(vfs.open(&task, "/a", OpenFlags::empty()).unwrap());
    }
    assert_eq!(
        vfs.open(&task, "/a", OpenFlags::empty()).err(),
        Some(FsError::TooManyOpenFiles)
    );
    for fd in fds {
        vfs.close(&task, fd).unwrap();
    }
}

#[test]
fn release_task_closes_leftover_descriptors() {
    let (vfs, task) = ram_vfs();
    write_file(&vfs, &task, "/a", b"x");

    let _fd = vfs.open(&task, "/a", OpenFlags::empty()).unwrap();
    assert_eq!(vfs.unlink(&task, "/a").err(), Some(FsError::Busy));

    vfs.release_task(&task);
    assert_eq!(task.open_descriptors(), 0);
    vfs.unlink(&task, "/a").unwrap();
}
