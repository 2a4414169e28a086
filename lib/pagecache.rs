//! Per-inode page cache for regular-file I/O.
//!
//! Reads and writes on regular files flow through here unless the file was
//! opened for direct I/O. Missing pages are filled from the driver on
//! demand; dirty pages are written back on commit. The cache is created
//! lazily when a regular file is first opened and released when its inode is
//! destroyed.

use bytes::BytesMut;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::config::PAGE_SIZE;
use crate::error::FsResult;
use crate::node::InodeGuard;

struct Page {
    data: BytesMut,
    dirty: bool,
}

/// Byte-range cache of one inode's contents, in `PAGE_SIZE` units.
pub struct PageCache {
    pages: FxHashMap<usize, Page>,
}

impl PageCache {
    pub(crate) fn new() -> Self {
        Self {
            pages: FxHashMap::default(),
        }
    }

    /// Fetch or build the page at `index`. When `fill` is set the page is
    /// populated from the driver; otherwise it starts zeroed (it is about to
    /// be fully overwritten).
    fn page_at<'p>(
        pages: &'p mut FxHashMap<usize, Page>,
        ino: &mut InodeGuard<'_>,
        index: usize,
        fill: bool,
    ) -> FsResult<&'p mut Page> {
        if !pages.contains_key(&index) {
            let mut data = BytesMut::zeroed(PAGE_SIZE);
            if fill {
                let base = index * PAGE_SIZE;
                if base < ino.fsize {
                    let ops = ino.ops();
                    let n = ops.read(ino, &mut data[..], base)?;
                    trace!(index, filled = n, "page cache fill");
                }
            }
            pages.insert(index, Page { data, dirty: false });
        }
        Ok(pages
            .get_mut(&index)
            .expect("page inserted just above"))
    }

    /// Copy up to `buf.len()` bytes at `pos` into `buf`; returns the count,
    /// zero at or past end of file.
    pub(crate) fn read(
        &mut self,
        ino: &mut InodeGuard<'_>,
        buf: &mut [u8],
        pos: usize,
    ) -> FsResult<usize> {
        let fsize = ino.fsize;
        if pos >= fsize || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(fsize - pos);
        let mut done = 0usize;

        while done < want {
            let at = pos + done;
            let index = at / PAGE_SIZE;
            let off = at % PAGE_SIZE;
            let chunk = (PAGE_SIZE - off).min(want - done);
            let page = Self::page_at(&mut self.pages, ino, index, true)?;
            buf[done..done + chunk].copy_from_slice(&page.data[off..off + chunk]);
            done += chunk;
        }
        Ok(done)
    }

    /// Copy `buf` into the cache at `pos`, marking pages dirty and growing
    /// the inode's recorded size when writing past the current end.
    pub(crate) fn write(
        &mut self,
        ino: &mut InodeGuard<'_>,
        buf: &[u8],
        pos: usize,
    ) -> FsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut done = 0usize;

        while done < buf.len() {
            let at = pos + done;
            let index = at / PAGE_SIZE;
            let off = at % PAGE_SIZE;
            let chunk = (PAGE_SIZE - off).min(buf.len() - done);
            // A partially covered page must carry the bytes around the write.
            let fill = off != 0 || chunk != PAGE_SIZE;
            let page = Self::page_at(&mut self.pages, ino, index, fill)?;
            page.data[off..off + chunk].copy_from_slice(&buf[done..done + chunk]);
            page.dirty = true;
            done += chunk;
        }

        if pos + done > ino.fsize {
            ino.fsize = pos + done;
        }
        Ok(done)
    }

    /// Write every dirty page back through the driver.
    pub(crate) fn commit_all(&mut self, ino: &mut InodeGuard<'_>) -> FsResult<()> {
        let fsize = ino.fsize;
        let mut dirty: Vec<usize> = self
            .pages
            .iter()
            .filter(|(_, p)| p.dirty)
            .map(|(i, _)| *i)
            .collect();
        dirty.sort_unstable();

        for index in dirty {
            let base = index * PAGE_SIZE;
            if base >= fsize {
                continue;
            }
            let len = PAGE_SIZE.min(fsize - base);
            let ops = ino.ops();
            ops.write(ino, &self.pages[&index].data[..len], base)?;
            if let Some(page) = self.pages.get_mut(&index) {
                page.dirty = false;
            }
        }
        Ok(())
    }

    /// Drop every cached page.
    pub(crate) fn release(&mut self) {
        self.pages.clear();
    }
}
