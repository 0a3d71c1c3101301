//! # Buffer Pool Manager
//!
//! A fixed array of frames caching disk pages, fronted by an extendible-hash
//! page table and an LRU replacer. One manager-level mutex guards the page
//! table, the free list and the replacer; each frame additionally carries a
//! reader/writer latch over its bytes, held by higher layers only while they
//! actively read or write page content.
//!
//! ## Pin Protocol
//!
//! `fetch` and `new_page` return a pinned [`PageGuard`]; a pinned frame is
//! never chosen as a victim and never present in the replacer. Dropping the
//! guard unpins, and a pin count reaching zero re-enters the frame into the
//! replacer. Dirtiness is recorded on the frame via [`PageGuard::mark_dirty`]
//! and a dirty frame is always written back before its mapping is replaced.
//!
//! ## Victim Selection
//!
//! Free frames are used first, then the LRU victim. When every frame is
//! pinned both sources come up empty and the call fails - callers see the
//! pool-exhausted error and may retry after unpinning.
//!
//! ## Latches
//!
//! Page latches are `Arc<RwLock<Page>>` acquired as *owned* guards
//! (`arc_lock`), so a B+tree descent can keep a stack of write latches and
//! an iterator can hold its leaf latch across calls without borrowing from
//! the pool. The pool itself takes a frame's latch only while writing back
//! or loading that frame's bytes, and only for frames with a zero pin count,
//! so it never contends with a latch holder it must wait on.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::buffer::{ExtendibleHashTable, LruReplacer};
use crate::config::{FrameId, PageId, BUCKET_SIZE, INVALID_PAGE_ID};
use crate::storage::{DiskManager, Page};

/// Owned read latch over a frame's page bytes.
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;
/// Owned write latch over a frame's page bytes.
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

struct Frame {
    data: Arc<RwLock<Page>>,
    page_id: AtomicI32,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(Page::new())),
            page_id: AtomicI32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }
}

struct PoolState {
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: Vec<FrameId>,
    replacer: LruReplacer<FrameId>,
}

struct PoolInner {
    frames: Vec<Frame>,
    disk: Arc<DiskManager>,
    state: Mutex<PoolState>,
}

/// Cheaply cloneable handle; clones share the same pool.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<PoolInner>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        assert!(pool_size > 0, "buffer pool needs at least one frame");
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list = (0..pool_size).rev().collect();
        Self {
            inner: Arc::new(PoolInner {
                frames,
                disk,
                state: Mutex::new(PoolState {
                    page_table: ExtendibleHashTable::new(BUCKET_SIZE),
                    free_list,
                    replacer: LruReplacer::new(),
                }),
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.inner.frames.len()
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.inner.disk
    }

    /// Pins the frame holding `page_id`, loading it from disk if absent.
    /// Fails when the page is not resident and every frame is pinned.
    pub fn fetch(&self, page_id: PageId) -> Result<PageGuard> {
        ensure!(
            page_id != INVALID_PAGE_ID,
            "invalid page id passed to fetch"
        );

        let inner = &self.inner;
        let mut state = inner.state.lock();

        if let Some(frame_id) = state.page_table.find(&page_id) {
            inner.frames[frame_id].pin_count.fetch_add(1, Ordering::SeqCst);
            state.replacer.erase(frame_id);
            return Ok(PageGuard {
                pool: Arc::clone(inner),
                frame_id,
                page_id,
            });
        }

        let frame_id = Self::take_victim(inner, &mut state)?;
        let frame = &inner.frames[frame_id];
        {
            let mut data = frame.data.write();
            if let Err(err) = inner.disk.read_page(page_id, data.as_bytes_mut()) {
                state.free_list.push(frame_id);
                return Err(err);
            }
        }
        frame.page_id.store(page_id, Ordering::SeqCst);
        frame.dirty.store(false, Ordering::SeqCst);
        frame.pin_count.store(1, Ordering::SeqCst);
        state.page_table.insert(page_id, frame_id);

        Ok(PageGuard {
            pool: Arc::clone(inner),
            frame_id,
            page_id,
        })
    }

    /// Allocates a fresh page id, zero-initializes a frame for it and pins
    /// it. The page id is stamped into the first four bytes.
    pub fn new_page(&self) -> Result<PageGuard> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let frame_id = Self::take_victim(inner, &mut state)?;
        let page_id = inner.disk.allocate_page();
        let frame = &inner.frames[frame_id];
        {
            let mut data = frame.data.write();
            data.reset();
            data.set_page_id(page_id);
        }
        frame.page_id.store(page_id, Ordering::SeqCst);
        frame.dirty.store(false, Ordering::SeqCst);
        frame.pin_count.store(1, Ordering::SeqCst);
        state.page_table.insert(page_id, frame_id);

        Ok(PageGuard {
            pool: Arc::clone(inner),
            frame_id,
            page_id,
        })
    }

    /// Pops a usable frame (free list first, then LRU victim), writing back
    /// its previous contents when dirty and unmapping it from the page
    /// table. The returned frame has a zero pin count and no latch holders.
    fn take_victim(inner: &PoolInner, state: &mut PoolState) -> Result<FrameId> {
        let frame_id = state
            .free_list
            .pop()
            .or_else(|| state.replacer.victim())
            .ok_or_else(|| {
                eyre!(
                    "buffer pool exhausted: all {} frames are pinned",
                    inner.frames.len()
                )
            })?;

        let frame = &inner.frames[frame_id];
        debug_assert_eq!(frame.pin_count.load(Ordering::SeqCst), 0);

        let old_page_id = frame.page_id.load(Ordering::SeqCst);
        if old_page_id != INVALID_PAGE_ID {
            if frame.dirty.load(Ordering::SeqCst) {
                let data = frame.data.read();
                if let Err(err) = inner.disk.write_page(old_page_id, data.as_bytes()) {
                    drop(data);
                    state.replacer.insert(frame_id);
                    return Err(err);
                }
            }
            state.page_table.remove(&old_page_id);
            frame.page_id.store(INVALID_PAGE_ID, Ordering::SeqCst);
            frame.dirty.store(false, Ordering::SeqCst);
        }
        Ok(frame_id)
    }

    /// Writes a resident page to disk. Returns false when the page is not
    /// cached; does not evict.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        ensure!(
            page_id != INVALID_PAGE_ID,
            "invalid page id passed to flush_page"
        );
        let inner = &self.inner;
        let state = inner.state.lock();
        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &inner.frames[frame_id];
        let data = frame.data.read();
        inner.disk.write_page(page_id, data.as_bytes())?;
        Ok(true)
    }

    /// Writes every resident page to disk (used at clean shutdown).
    pub fn flush_all(&self) -> Result<()> {
        let inner = &self.inner;
        let _state = inner.state.lock();
        for frame in &inner.frames {
            let page_id = frame.page_id.load(Ordering::SeqCst);
            if page_id != INVALID_PAGE_ID {
                let data = frame.data.read();
                inner.disk.write_page(page_id, data.as_bytes())?;
                frame.dirty.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Drops a page from the pool and recycles its frame. Returns false
    /// while anyone still pins the page; succeeds trivially when the page
    /// is not resident.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &inner.frames[frame_id];
            if frame.pin_count.load(Ordering::SeqCst) > 0 {
                return Ok(false);
            }
            state.page_table.remove(&page_id);
            state.replacer.erase(frame_id);
            frame.page_id.store(INVALID_PAGE_ID, Ordering::SeqCst);
            frame.dirty.store(false, Ordering::SeqCst);
            state.free_list.push(frame_id);
        }
        inner.disk.deallocate_page(page_id);
        Ok(true)
    }

    fn unpin(inner: &PoolInner, frame_id: FrameId) {
        let mut state = inner.state.lock();
        let frame = &inner.frames[frame_id];
        let previous = frame.pin_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "unpin on a frame with no pins");
        if previous == 1 {
            state.replacer.insert(frame_id);
        }
    }
}

/// A pinned reference to a cached page. The frame stays resident for the
/// guard's lifetime; the latch is acquired separately through
/// [`PageGuard::read`] / [`PageGuard::write`] so callers control exactly how
/// long content access excludes others.
pub struct PageGuard {
    pool: Arc<PoolInner>,
    frame_id: FrameId,
    page_id: PageId,
}

impl PageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquires the frame's read latch (owned; may be held across calls).
    pub fn read(&self) -> PageReadGuard {
        self.pool.frames[self.frame_id].data.read_arc()
    }

    /// Acquires the frame's write latch (owned; may be held across calls).
    pub fn write(&self) -> PageWriteGuard {
        self.pool.frames[self.frame_id].data.write_arc()
    }

    /// Records that the holder modified the page; the frame will be written
    /// back before eviction.
    pub fn mark_dirty(&self) {
        self.pool.frames[self.frame_id]
            .dirty
            .store(true, Ordering::SeqCst);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        BufferPoolManager::unpin(&self.pool, self.frame_id);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(frames: usize) -> (tempfile::TempDir, BufferPoolManager) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
        (dir, BufferPoolManager::new(frames, disk))
    }

    #[test]
    fn new_page_is_pinned_and_stamped() {
        let (_dir, bpm) = pool(4);
        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), 0);
        assert_eq!(guard.read().page_id(), 0);
    }

    #[test]
    fn data_survives_eviction() {
        let (_dir, bpm) = pool(2);

        let pid = {
            let guard = bpm.new_page().unwrap();
            guard.write().as_bytes_mut()[100] = 0x5A;
            guard.mark_dirty();
            guard.page_id()
        };

        // Evict by cycling more pages than frames.
        for _ in 0..4 {
            let g = bpm.new_page().unwrap();
            g.mark_dirty();
        }

        let guard = bpm.fetch(pid).unwrap();
        assert_eq!(guard.read().as_bytes()[100], 0x5A);
    }

    #[test]
    fn pinned_pool_rejects_and_recovers() {
        let (_dir, bpm) = pool(3);

        let mut guards = Vec::new();
        for _ in 0..3 {
            guards.push(bpm.new_page().unwrap());
        }
        assert!(bpm.new_page().is_err(), "all frames pinned");

        let freed = guards.pop().unwrap();
        drop(freed);
        assert!(bpm.new_page().is_ok(), "unpinning frees a frame");
    }

    #[test]
    fn fetch_same_page_twice_shares_a_frame() {
        let (_dir, bpm) = pool(2);
        let pid = bpm.new_page().unwrap().page_id();

        let a = bpm.fetch(pid).unwrap();
        let b = bpm.fetch(pid).unwrap();
        a.write().as_bytes_mut()[50] = 9;
        a.mark_dirty();
        assert_eq!(b.read().as_bytes()[50], 9);
    }

    #[test]
    fn delete_page_refuses_while_pinned() {
        let (_dir, bpm) = pool(2);
        let guard = bpm.new_page().unwrap();
        let pid = guard.page_id();

        assert!(!bpm.delete_page(pid).unwrap());
        drop(guard);
        assert!(bpm.delete_page(pid).unwrap());
        // Frame is reusable afterwards.
        let _ = bpm.new_page().unwrap();
    }

    #[test]
    fn flush_page_writes_without_evicting() {
        let (_dir, bpm) = pool(2);
        let guard = bpm.new_page().unwrap();
        let pid = guard.page_id();
        guard.write().as_bytes_mut()[8] = 0x77;
        guard.mark_dirty();

        assert!(bpm.flush_page(pid).unwrap());

        let mut raw = vec![0u8; crate::config::PAGE_SIZE];
        bpm.disk().read_page(pid, &mut raw).unwrap();
        assert_eq!(raw[8], 0x77);
        // Still resident and pinned.
        assert_eq!(guard.read().as_bytes()[8], 0x77);
    }

    #[test]
    fn fetch_invalid_page_id_is_an_error() {
        let (_dir, bpm) = pool(2);
        assert!(bpm.fetch(INVALID_PAGE_ID).is_err());
    }

    #[test]
    fn eleven_pages_through_a_ten_frame_pool() {
        let (_dir, bpm) = pool(10);

        let mut guards = Vec::new();
        for _ in 0..10 {
            guards.push(bpm.new_page().unwrap());
        }
        // 11th distinct page cannot enter while all frames are pinned.
        assert!(bpm.new_page().is_err());

        drop(guards.remove(0));
        let eleventh = bpm.new_page().unwrap();
        assert_eq!(eleventh.page_id(), 10);
    }
}
