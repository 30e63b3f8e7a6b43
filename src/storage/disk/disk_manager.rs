use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, HEADER_PAGE_ID, PAGE_SIZE};

/// DiskManager reads and writes fixed-size pages in a single database file.
///
/// Page ids map directly to file offsets. Allocation is a monotonic counter
/// that starts above the reserved header page; ids are never reused, so
/// `deallocate_page` is a hook that currently does nothing.
pub struct DiskManager {
    /// Database file handle; the mutex serializes the seek+read/write pair
    db_file: Mutex<File>,
    /// Path of the database file
    db_path: PathBuf,
    /// Next page id to hand out
    next_page_id: AtomicI32,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the database file at the given path. When the file
    /// already holds pages, allocation resumes after the last one.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let pages_in_file = (file_size / PAGE_SIZE as u64) as i32;
        let next_page_id = pages_in_file.max(HEADER_PAGE_ID.0 + 1);

        Ok(Self {
            db_file: Mutex::new(file),
            db_path,
            next_page_id: AtomicI32::new(next_page_id),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Reads a page from disk into the provided buffer. Reads past the end
    /// of the file yield zeroes, so freshly allocated pages read back empty.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        debug_assert!(!page_id.is_invalid());

        let byte_offset = (page_id.0 as u64) * (PAGE_SIZE as u64);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;

        let mut total = 0;
        while total < PAGE_SIZE {
            let n = file.read(&mut data[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        data[total..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        debug_assert!(!page_id.is_invalid());

        let byte_offset = (page_id.0 as u64) * (PAGE_SIZE as u64);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Hands out the next page id. The page's bytes come into existence when
    /// they are first written; until then reads return zeroes.
    pub fn allocate_page(&self) -> PageId {
        PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns a page to the allocator. Ids are monotonic and never reused.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    pub fn num_pages(&self) -> i32 {
        self.next_page_id.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn sync(&self) -> Result<()> {
        self.db_file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.db_file.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_manager_allocate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("alloc.db")).unwrap();

        // Page 0 is reserved for the header page
        assert_eq!(dm.allocate_page(), PageId::new(1));
        assert_eq!(dm.allocate_page(), PageId::new(2));
    }

    #[test]
    fn test_disk_manager_read_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("rw.db")).unwrap();

        let page_id = dm.allocate_page();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        dm.write_page(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(read_data[PAGE_SIZE - 1], 128);
    }

    #[test]
    fn test_disk_manager_short_read_zero_fills() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::new(temp_dir.path().join("zero.db")).unwrap();

        // Never written: reads past EOF must come back zeroed
        let mut data = [7u8; PAGE_SIZE];
        dm.read_page(PageId::new(3), &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("persist.db");

        let page_id = {
            let dm = DiskManager::new(&db_path).unwrap();
            let page_id = dm.allocate_page();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 123;
            dm.write_page(page_id, &data).unwrap();
            page_id
        };

        let dm = DiskManager::new(&db_path).unwrap();
        // Allocation resumes past the existing pages
        assert!(dm.allocate_page() > page_id);

        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[0], 123);
    }
}
