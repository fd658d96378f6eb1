use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;
use crate::constants::cache::READ_CHUNK_BYTES;
use crate::constants::file_format::{ABSENT_OFFSET, MAGIC, VERSION};
use crate::constants::registry::NEUTRAL_BOUND;
use crate::error::{source_unavailable, PagerError, PagerErrorContext, PagerResult};
use crate::page::{CacheParams, PageIndex};
use super::{ActiveFlag, CancelToken, PageSource, SourceOpener};

/// Fixed header at offset zero of a page file
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PageFileHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub page_dimension: u32,
    pub channels: u32,
    pub bytes_per_channel: u32,

    /// Entries in the page table, indexed by page index
    pub table_len: u64,

    pub _reserved: u64,
}

/// One page table entry
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PageTableRecord {
    /// Byte offset of the page data, `ABSENT_OFFSET` if missing
    pub offset: u64,
    pub min: f32,
    pub max: f32,
}

const HEADER_SIZE: usize = std::mem::size_of::<PageFileHeader>();
const RECORD_SIZE: usize = std::mem::size_of::<PageTableRecord>();

/// Memory-mapped page file
pub struct FilePageSource {
    path: PathBuf,
    mmap: Mmap,
    params: CacheParams,
    table: Vec<PageTableRecord>,
    active: ActiveFlag,
}

impl FilePageSource {
    pub fn open(path: &Path) -> PagerResult<Self> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| source_unavailable(&name, e))?;

        // SAFETY: The map is read-only and private to this source. Page files
        // are written once by `FilePageWriter` and not modified while open.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| source_unavailable(&name, e))?;

        if mmap.len() < HEADER_SIZE {
            return Err(source_unavailable(&name, "file shorter than header"));
        }
        let header: PageFileHeader = bytemuck::pod_read_unaligned(&mmap[..HEADER_SIZE]);
        if header.magic != MAGIC {
            return Err(source_unavailable(&name, "bad magic"));
        }
        if header.version != VERSION {
            return Err(source_unavailable(
                &name,
                format!("unsupported version {}", header.version),
            ));
        }

        let params = CacheParams::new(
            header.page_dimension,
            header.channels,
            header.bytes_per_channel,
        );
        if !params.is_valid() {
            return Err(source_unavailable(&name, format!("invalid geometry {}", params)));
        }

        let table_len = header.table_len as usize;
        let table_end = table_len
            .checked_mul(RECORD_SIZE)
            .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
            .filter(|end| *end <= mmap.len())
            .ok_or_else(|| source_unavailable(&name, "page table truncated"))?;

        let table = mmap[HEADER_SIZE..table_end]
            .chunks_exact(RECORD_SIZE)
            .map(bytemuck::pod_read_unaligned::<PageTableRecord>)
            .collect::<Vec<_>>();

        log::info!(
            "[FilePageSource] Opened {} ({}, {} table entries)",
            name,
            params,
            table.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            params,
            table,
            active: ActiveFlag::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self, page: PageIndex) -> Option<&PageTableRecord> {
        self.table
            .get(usize::try_from(page.0).ok()?)
            .filter(|record| record.offset != ABSENT_OFFSET)
    }
}

impl PageSource for FilePageSource {
    fn params(&self) -> CacheParams {
        self.params
    }

    fn page_offset(&self, page: PageIndex) -> Option<u64> {
        self.record(page).map(|record| record.offset)
    }

    fn read_page(&self, offset: u64, buffer: &mut [u8], cancel: &CancelToken) -> PagerResult<()> {
        let start = usize::try_from(offset).map_err(|_| PagerError::InvalidGeometry {
            reason: format!("offset {} out of address space", offset),
        })?;
        let end = start
            .checked_add(buffer.len())
            .filter(|end| *end <= self.mmap.len())
            .ok_or_else(|| PagerError::InvalidGeometry {
                reason: format!(
                    "page at {} (+{} bytes) past end of {}",
                    offset,
                    buffer.len(),
                    self.path.display()
                ),
            })?;

        let source = &self.mmap[start..end];
        for (dst, src) in buffer
            .chunks_mut(READ_CHUNK_BYTES)
            .zip(source.chunks(READ_CHUNK_BYTES))
        {
            if !self.active.is_active() || cancel.is_cancelled() {
                return Err(PagerError::Cancelled);
            }
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    fn page_bounds(&self, page: PageIndex) -> (f32, f32) {
        self.record(page)
            .map(|record| (record.min, record.max))
            .unwrap_or((NEUTRAL_BOUND, NEUTRAL_BOUND))
    }

    fn page_status(&self, page: PageIndex) -> bool {
        self.record(page).is_some()
    }

    fn deactivate(&self) {
        log::debug!("[FilePageSource] Deactivating {}", self.path.display());
        self.active.deactivate();
    }

    fn is_active(&self) -> bool {
        self.active.is_active()
    }
}

/// Opens page files relative to a base directory
#[derive(Debug, Clone, Default)]
pub struct FileSourceOpener {
    base: Option<PathBuf>,
}

impl FileSourceOpener {
    pub fn new() -> Self {
        Self { base: None }
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }
}

impl SourceOpener for FileSourceOpener {
    fn open(&self, name: &str) -> PagerResult<Arc<dyn PageSource>> {
        let path = match &self.base {
            Some(base) => base.join(name),
            None => PathBuf::from(name),
        };
        Ok(Arc::new(FilePageSource::open(&path)?))
    }
}

/// Builds page files
pub struct FilePageWriter {
    params: CacheParams,
    pages: BTreeMap<PageIndex, (Vec<u8>, f32, f32)>,
}

impl FilePageWriter {
    pub fn new(params: CacheParams) -> Self {
        Self {
            params,
            pages: BTreeMap::new(),
        }
    }

    /// Add a page; `data` must be exactly one page long
    pub fn add_page(&mut self, page: PageIndex, data: Vec<u8>, min: f32, max: f32) -> PagerResult<()> {
        if data.len() != self.params.page_bytes() {
            return Err(PagerError::InvalidGeometry {
                reason: format!(
                    "page {} has {} bytes, expected {}",
                    page,
                    data.len(),
                    self.params.page_bytes()
                ),
            });
        }
        self.pages.insert(page, (data, min, max));
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn write(&self, path: &Path) -> PagerResult<()> {
        let table_len = self
            .pages
            .keys()
            .next_back()
            .map(|page| page.0 + 1)
            .unwrap_or(0);

        let header = PageFileHeader {
            magic: MAGIC,
            version: VERSION,
            page_dimension: self.params.page_dimension,
            channels: self.params.channels,
            bytes_per_channel: self.params.bytes_per_channel,
            table_len,
            _reserved: 0,
        };

        let table_entries = usize::try_from(table_len).pager_context("page table length")?;
        let mut table = vec![PageTableRecord::zeroed(); table_entries];
        let mut offset = (HEADER_SIZE + RECORD_SIZE * table.len()) as u64;
        for (page, (data, min, max)) in &self.pages {
            table[page.0 as usize] = PageTableRecord {
                offset,
                min: *min,
                max: *max,
            };
            offset += data.len() as u64;
        }

        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(bytemuck::bytes_of(&header))?;
        out.write_all(bytemuck::cast_slice(&table))?;
        for (data, _, _) in self.pages.values() {
            out.write_all(data)?;
        }
        out.flush()?;

        log::debug!(
            "[FilePageWriter] Wrote {} pages to {}",
            self.pages.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(dir: &Path) -> PathBuf {
        let params = CacheParams::new(4, 1, 1);
        let mut writer = FilePageWriter::new(params);
        writer.add_page(PageIndex(0), vec![7; 16], 0.5, 1.5).unwrap();
        writer.add_page(PageIndex(9), vec![9; 16], -1.0, 2.0).unwrap();
        let path = dir.join("pages.gpf");
        writer.write(&path).unwrap();
        path
    }

    #[test]
    fn test_header_layout_has_no_padding() {
        assert_eq!(HEADER_SIZE, 40);
        assert_eq!(RECORD_SIZE, 16);
    }

    #[test]
    fn test_open_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilePageSource::open(&sample_file(dir.path())).unwrap();

        assert_eq!(source.params(), CacheParams::new(4, 1, 1));
        assert!(source.page_status(PageIndex(0)));
        assert!(!source.page_status(PageIndex(3)));
        assert!(!source.page_status(PageIndex(1000)));
        assert_eq!(source.page_bounds(PageIndex(9)), (-1.0, 2.0));
        assert_eq!(source.page_bounds(PageIndex(3)), (NEUTRAL_BOUND, NEUTRAL_BOUND));

        let offset = source.page_offset(PageIndex(9)).unwrap();
        let mut buffer = vec![0u8; 16];
        source.read_page(offset, &mut buffer, &CancelToken::never()).unwrap();
        assert!(buffer.iter().all(|&b| b == 9));
    }

    #[test]
    fn test_read_after_deactivate_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilePageSource::open(&sample_file(dir.path())).unwrap();
        let offset = source.page_offset(PageIndex(0)).unwrap();

        source.deactivate();
        let mut buffer = vec![0u8; 16];
        let result = source.read_page(offset, &mut buffer, &CancelToken::never());
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_read_with_cancelled_token_stops() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilePageSource::open(&sample_file(dir.path())).unwrap();
        let offset = source.page_offset(PageIndex(0)).unwrap();

        let counter = Arc::new(std::sync::atomic::AtomicU64::new(1));
        let token = CancelToken::for_generation(counter, 0);
        let mut buffer = vec![0u8; 16];
        assert!(source.read_page(offset, &mut buffer, &token).unwrap_err().is_cancelled());
        assert!(source.is_active());
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilePageSource::open(&sample_file(dir.path())).unwrap();
        let mut buffer = vec![0u8; 16];
        assert!(source.read_page(1 << 40, &mut buffer, &CancelToken::never()).is_err());
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FilePageSource::open(&dir.path().join("missing.gpf")),
            Err(PagerError::SourceUnavailable { .. })
        ));

        let junk = dir.path().join("junk.gpf");
        std::fs::write(&junk, vec![0u8; 64]).unwrap();
        assert!(FilePageSource::open(&junk).is_err());
    }

    #[test]
    fn test_writer_rejects_wrong_size() {
        let mut writer = FilePageWriter::new(CacheParams::new(4, 1, 1));
        assert!(writer.add_page(PageIndex(0), vec![0; 15], 0.0, 0.0).is_err());
    }

    #[test]
    fn test_opener_uses_base_directory() {
        let dir = tempfile::tempdir().unwrap();
        sample_file(dir.path());
        let opener = FileSourceOpener::with_base(dir.path());
        let source = opener.open("pages.gpf").unwrap();
        assert!(source.is_active());
        assert!(opener.open("nope.gpf").is_err());
    }
}
