#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use common::{ram_vfs_with, read_file, write_file};
use vfs_core::{FsError, OpenFlags, Tunables};

fn small_caches() -> Tunables {
    Tunables {
        dnode_zone_cap: 64,
        inode_zone_cap: 64,
    }
}

#[test]
fn mass_creation_stays_bounded_and_everything_reopens() {
    let (vfs, task) = ram_vfs_with(small_caches());
    vfs.mkdir(&task, "/t").unwrap();

    for i in 0..500 {
        write_file(&vfs, &task, &format!("/t/file-{i}"), format!("#{i}").as_bytes());
    }

    // The zones stayed within their configured bounds.
    assert!(
        vfs.cached_dnodes() <= 64,
        "dnode population {} exceeds the cap",
        vfs.cached_dnodes()
    );
    assert!(
        vfs.cached_inodes() <= 64,
        "inode population {} exceeds the cap",
        vfs.cached_inodes()
    );

    // Eviction lost no data: spot-check early, middle, and late files.
    for i in [0usize, 250, 499] {
        assert_eq!(
            read_file(&vfs, &task, &format!("/t/file-{i}")),
            format!("#{i}").as_bytes()
        );
    }
}

#[test]
fn pinned_objects_survive_eviction_pressure() {
    let (vfs, task) = ram_vfs_with(small_caches());
    write_file(&vfs, &task, "/keep", b"pinned");

    let fd = vfs.open(&task, "/keep", OpenFlags::empty()).unwrap();
    for i in 0..300 {
        write_file(&vfs, &task, &format!("/churn-{i}"), b"x");
    }

    // The open file's dnode was never evicted; reads still work.
    let mut buf = [0u8; 6];
    assert_eq!(vfs.read(&task, fd, &mut buf).unwrap(), 6);
    assert_eq!(&buf, b"pinned");
    vfs.close(&task, fd).unwrap();
}

#[test]
fn an_unevictable_working_set_exhausts_the_zone() {
    let (vfs, task) = ram_vfs_with(Tunables {
        dnode_zone_cap: 16,
        inode_zone_cap: 1024,
    });

    // Pin more dnodes than the zone can hold (cwd at each level of a deep
    // chain is overkill; open files are simpler).
    let mut fds = Vec::new();
    let mut failed = None;
    for i in 0..32 {
        match vfs.open(&task, &format!("/pin-{i}"), OpenFlags::CREATE) {
            Ok(fd) => fds.push(fd),
            Err(e) => {
                failed = Some(e);
                break;
            }
        }
    }
    assert_eq!(failed, Some(FsError::OutOfMemory));
    for fd in fds {
        vfs.close(&task, fd).unwrap();
    }
}

#[test]
fn evicted_directories_repopulate_from_the_driver() {
    let (vfs, task) = ram_vfs_with(small_caches());
    vfs.mkdir(&task, "/d").unwrap();
    write_file(&vfs, &task, "/d/f", b"still here");

    // Push the directory and its child out of the cache.
    for i in 0..300 {
        write_file(&vfs, &task, &format!("/noise-{i}"), b"x");
    }

    assert_eq!(read_file(&vfs, &task, "/d/f"), b"still here");
}
