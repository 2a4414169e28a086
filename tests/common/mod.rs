#![allow(dead_code, missing_docs, clippy::unwrap_used)]

pub mod counting_fs;

use std::sync::Once;

use vfs_core::{OpenFlags, RamFs, Task, Tunables, Vfs, Whence};

static TRACING: Once = Once::new();

/// Install a fmt subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A fresh context with a ramfs mounted at `/` and one task.
pub fn ram_vfs() -> (Vfs, Task) {
    ram_vfs_with(Tunables::default())
}

pub fn ram_vfs_with(tunables: Tunables) -> (Vfs, Task) {
    init_tracing();
    let vfs = Vfs::with_tunables(tunables);
    vfs.register_fs(RamFs::new());
    vfs.mount_root("ramfs").expect("root mount");
    let task = vfs.new_task();
    (vfs, task)
}

/// Create `path` with the given contents.
pub fn write_file(vfs: &Vfs, task: &Task, path: &str, data: &[u8]) {
    let fd = vfs.open(task, path, OpenFlags::CREATE).unwrap();
    assert_eq!(vfs.write(task, fd, data).unwrap(), data.len());
    vfs.close(task, fd).unwrap();
}

/// Read the full contents of `path`.
pub fn read_file(vfs: &Vfs, task: &Task, path: &str) -> Vec<u8> {
    let fd = vfs.open(task, path, OpenFlags::empty()).unwrap();
    let len = vfs.lseek(task, fd, 0, Whence::End).unwrap();
    vfs.lseek(task, fd, 0, Whence::Set).unwrap();
    let mut buf = vec![0u8; len.max(1)];
    let n = vfs.read(task, fd, &mut buf).unwrap();
    vfs.close(task, fd).unwrap();
    buf.truncate(n);
    buf
}
