//! Spill store: serializes evicted matrix blobs to a transient working
//! directory and re-reads them on demand.
//!
//! Blobs are framed little-endian (dimensions, nnz, payload length,
//! payload); files are named by the lineage id of their key and removed on
//! rehydration, reset, and engine drop.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::cache::engine::{EngineInner, LineageCache};
use crate::cache::entry::{CacheEntry, CacheStatus};
use crate::data::{Data, MatrixBlock};
use crate::error::{Error, Result};
use crate::lineage::LineageItem;

/// Disambiguates spill directories of engines sharing one process.
static SPILL_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

/// Where an evicted entry's blob lives, and the execution time it keeps
/// carrying.
#[derive(Debug, Clone)]
pub(crate) struct SpillRecord {
    pub(crate) path: PathBuf,
    pub(crate) exec_time_ns: u64,
}

impl LineageCache {
    fn ensure_out_dir(&self, inner: &mut EngineInner) -> Result<PathBuf> {
        if let Some(dir) = &inner.out_dir {
            return Ok(dir.clone());
        }
        let seq = SPILL_DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .config()
            .workdir
            .join(format!("lineage-{}-{seq}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "created spill directory");
        inner.out_dir = Some(dir.clone());
        Ok(dir)
    }

    /// Writes the entry's matrix blob to disk and records it in the spill
    /// index. The caller removes the entry from the resident index.
    ///
    /// # Errors
    ///
    /// [`Error::SpillInvalid`] for valueless or scalar entries,
    /// [`Error::Io`] when the write fails.
    pub(crate) fn spill_to_disk(
        &self,
        inner: &mut EngineInner,
        key: &Arc<LineageItem>,
        entry: &Arc<CacheEntry>,
    ) -> Result<()> {
        let data = entry.try_value();
        let mb = match &data {
            Some(Data::Matrix(mb)) => mb,
            Some(Data::Scalar(_)) => {
                return Err(Error::SpillInvalid(format!(
                    "scalar entry {} cannot be spilled",
                    entry.key().id()
                )))
            }
            None => {
                return Err(Error::SpillInvalid(format!(
                    "valueless entry {} cannot be spilled",
                    entry.key().id()
                )))
            }
        };
        let t0 = Instant::now();
        let dir = self.ensure_out_dir(inner)?;
        let path = dir.join(entry.key().id().to_string());
        write_matrix_block(&path, mb)?;
        self.statistics().add_fs_write(t0.elapsed());
        inner.spill.insert(
            Arc::clone(key),
            SpillRecord {
                path,
                exec_time_ns: entry.exec_time_ns(),
            },
        );
        Ok(())
    }

    /// Rehydrates a spilled entry: reads the blob, deletes the file, and
    /// re-inserts through the normal admission path (which may evict other
    /// entries, but not the one being admitted).
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the read fails; the spill record is left in place
    /// for the caller to decide.
    pub(crate) fn read_from_disk(
        &self,
        inner: &mut EngineInner,
        key: &Arc<LineageItem>,
    ) -> Result<Arc<CacheEntry>> {
        let record = inner
            .spill
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Internal("rehydration without a spill record".into()))?;
        let t0 = Instant::now();
        let data = Data::Matrix(Arc::new(read_matrix_block(&record.path)?));
        if let Err(e) = std::fs::remove_file(&record.path) {
            warn!(error = %e, path = %record.path.display(), "failed to delete spill file");
        }
        inner.spill.remove(key);
        self.put_intern(inner, Arc::clone(key), Some(data.clone()), record.exec_time_ns)?;
        self.statistics().add_fs_read(t0.elapsed());
        self.statistics().increment_fs_hits();
        if let Some(entry) = inner.index.get(key) {
            entry.set_status(CacheStatus::Reloaded);
            return Ok(Arc::clone(entry));
        }
        // admission could not keep it resident; hand the value back anyway
        let entry = Arc::new(CacheEntry::new(Arc::clone(key), Some(data), record.exec_time_ns));
        entry.set_status(CacheStatus::Reloaded);
        Ok(entry)
    }

    /// Deletes all spill files and the working directory.
    pub(crate) fn delete_spill_dir(&self, inner: &mut EngineInner) {
        for record in inner.spill.values() {
            let _ = std::fs::remove_file(&record.path);
        }
        inner.spill.clear();
        if let Some(dir) = inner.out_dir.take() {
            let _ = std::fs::remove_dir(&dir);
        }
    }
}

fn write_matrix_block(path: &Path, mb: &MatrixBlock) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&mb.num_rows().to_le_bytes())?;
    writer.write_all(&mb.num_cols().to_le_bytes())?;
    writer.write_all(&mb.num_nonzeros().to_le_bytes())?;
    writer.write_all(&(mb.payload().len() as u64).to_le_bytes())?;
    writer.write_all(mb.payload())?;
    writer.flush()?;
    Ok(())
}

fn read_matrix_block(path: &Path) -> Result<MatrixBlock> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let rows = read_u64(&mut reader)?;
    let cols = read_u64(&mut reader)?;
    let nnz = read_u64(&mut reader)?;
    let len = read_u64(&mut reader)?;
    let len = usize::try_from(len)
        .map_err(|_| Error::Internal(format!("spill payload too large in {}", path.display())))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(MatrixBlock::new(rows, cols, nnz, payload))
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
