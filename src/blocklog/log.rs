//! The append-only block log.
//!
//! Appends buffer through a `BufWriter` and become durable only at
//! `commit`, which runs: flush -> fsync(log) -> rewrite head -> fsync dir.
//! On open the log is truncated back to the committed head length, so a
//! crash between append and commit leaves no trace.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use multihash::Multihash;

use crate::error::StoreError;
use crate::metrics::{record_log_append, record_log_commit, record_log_recovery_truncation};
use crate::util::{read_varint_u64, varint_len, write_varint_u64};

use super::head::{load_head, write_head, LogHead};

// Upper bound on the frame header read ahead of the payload:
// length varint (<= 10) plus a self-describing multihash
// (two varints + digest of at most 64 bytes).
const FRAME_HDR_MAX: usize = 96;

pub struct BlockLog {
    meta_path: PathBuf,
    log_path: PathBuf,
    w: BufWriter<File>,
    read: File,
    head: LogHead,
    /// Logical end including buffered, uncommitted appends.
    end: u64,
    pending_blocks: u64,
}

impl BlockLog {
    /// Create a fresh log. Fails if a head already exists.
    pub fn create(meta_path: &Path, log_path: &Path) -> Result<Self> {
        if meta_path.exists() {
            return Err(anyhow!("log head already exists at {}", meta_path.display()));
        }
        let head = LogHead::default();
        write_head(meta_path, &head)?;

        let f = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(log_path)
            .with_context(|| format!("create block log {}", log_path.display()))?;
        let read = OpenOptions::new()
            .read(true)
            .open(log_path)
            .with_context(|| format!("open block log for read {}", log_path.display()))?;

        Ok(Self {
            meta_path: meta_path.to_path_buf(),
            log_path: log_path.to_path_buf(),
            w: BufWriter::new(f),
            read,
            head,
            end: 0,
            pending_blocks: 0,
        })
    }

    /// Open an existing log, recovering from an uncommitted tail.
    pub fn open(meta_path: &Path, log_path: &Path) -> Result<Self> {
        let head = load_head(meta_path)?;

        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(log_path)
            .with_context(|| format!("open block log {}", log_path.display()))?;

        let flen = f.metadata()?.len();
        if flen > head.len {
            warn!(
                "block log {} has {} uncommitted tail bytes, truncating to {}",
                log_path.display(),
                flen - head.len,
                head.len
            );
            f.set_len(head.len)?;
            f.sync_all()?;
            record_log_recovery_truncation();
        } else if flen < head.len {
            return Err(StoreError::Corrupt(format!(
                "block log {} shorter than committed head ({} < {})",
                log_path.display(),
                flen,
                head.len
            ))
            .into());
        }
        f.seek(SeekFrom::Start(head.len))?;

        let read = OpenOptions::new()
            .read(true)
            .open(log_path)
            .with_context(|| format!("open block log for read {}", log_path.display()))?;

        let end = head.len;
        Ok(Self {
            meta_path: meta_path.to_path_buf(),
            log_path: log_path.to_path_buf(),
            w: BufWriter::new(f),
            read,
            head,
            end,
            pending_blocks: 0,
        })
    }

    pub fn head(&self) -> &LogHead {
        &self.head
    }

    /// Committed length; bytes past this do not exist after a crash.
    #[inline]
    pub fn committed_len(&self) -> u64 {
        self.head.len
    }

    #[inline]
    pub fn block_count(&self) -> u64 {
        self.head.cnt
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.head.ro
    }

    /// Buffer a batch of entries. Returns (frame offset, payload length)
    /// per entry; nothing is durable until `commit`.
    pub fn append_batch<'a, I>(&mut self, entries: I) -> Result<Vec<(u64, u32)>>
    where
        I: IntoIterator<Item = (&'a Multihash<64>, &'a [u8])>,
    {
        if self.head.ro {
            return Err(StoreError::ReadOnly.into());
        }

        let mut locs = Vec::new();
        let mut bytes = 0u64;
        for (mh, payload) in entries {
            let mh_bytes = mh.to_bytes();
            let total = (mh_bytes.len() + payload.len()) as u64;

            let offset = self.end;
            let hdr = write_varint_u64(&mut self.w, total)?;
            self.w.write_all(&mh_bytes).context("write entry multihash")?;
            self.w.write_all(payload).context("write entry payload")?;

            self.end += hdr as u64 + total;
            self.pending_blocks += 1;
            bytes += payload.len() as u64;
            locs.push((offset, payload.len() as u32));
        }
        record_log_append(locs.len() as u64, bytes);
        Ok(locs)
    }

    /// Make all buffered appends durable and advance the committed head.
    pub fn commit(&mut self) -> Result<u64> {
        self.w.flush().context("flush block log")?;
        self.w
            .get_ref()
            .sync_all()
            .context("fsync block log")?;

        self.head.len = self.end;
        self.head.cnt += self.pending_blocks;
        self.pending_blocks = 0;
        write_head(&self.meta_path, &self.head)?;
        record_log_commit();
        Ok(self.head.len)
    }

    /// Reject all further appends. Durable with the next `commit`.
    pub fn mark_read_only(&mut self) {
        self.head.ro = true;
    }

    /// Mark the group data as offloaded. Durable with the next `commit`.
    pub fn mark_retired(&mut self) {
        self.head.ret = true;
    }

    /// Read the entry whose frame starts at `offset` with a payload of
    /// `length` bytes. Only committed entries are readable.
    pub fn read_frame(&self, offset: u64, length: u32) -> Result<(Multihash<64>, Vec<u8>)> {
        if offset >= self.head.len {
            return Err(StoreError::Corrupt(format!(
                "frame offset {} beyond committed length {}",
                offset, self.head.len
            ))
            .into());
        }

        let avail = (self.head.len - offset) as usize;
        let want = (length as usize + FRAME_HDR_MAX).min(avail);
        let mut buf = vec![0u8; want];
        self.read_exact_at(&mut buf, offset)?;

        let (total, hdr_len) = crate::util::decode_varint_u64(&buf)?;
        let mut cur = std::io::Cursor::new(&buf[hdr_len..]);
        let mh = Multihash::<64>::read(&mut cur)
            .map_err(|e| anyhow!(StoreError::Corrupt(format!("bad multihash in frame: {}", e))))?;
        let mh_len = cur.position() as usize;

        if total != (mh_len + length as usize) as u64 {
            return Err(StoreError::Corrupt(format!(
                "frame length mismatch at offset {} (framed={}, indexed={})",
                offset,
                total,
                mh_len + length as usize
            ))
            .into());
        }

        let start = hdr_len + mh_len;
        let end = start + length as usize;
        if end > buf.len() {
            return Err(StoreError::Corrupt(format!(
                "frame at offset {} overruns committed length",
                offset
            ))
            .into());
        }
        Ok((mh, buf[start..end].to_vec()))
    }

    /// Walk every committed entry in log order.
    pub fn iterate(&self, mut f: impl FnMut(&Multihash<64>, &[u8]) -> Result<()>) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .open(&self.log_path)
            .with_context(|| format!("open block log {}", self.log_path.display()))?;
        let mut r = BufReader::new(file);

        let committed = self.head.len;
        let mut pos = 0u64;
        while pos < committed {
            let Some((total, hdr_len)) = read_varint_u64(&mut r)? else {
                return Err(StoreError::Corrupt(format!(
                    "log ends at {} before committed length {}",
                    pos, committed
                ))
                .into());
            };

            let mh = Multihash::<64>::read(&mut r).map_err(|e| {
                anyhow!(StoreError::Corrupt(format!(
                    "bad multihash at offset {}: {}",
                    pos, e
                )))
            })?;
            let mh_len = varint_len(mh.code()) + varint_len(mh.size() as u64) + mh.size() as usize;
            if (mh_len as u64) > total {
                return Err(StoreError::Corrupt(format!(
                    "frame at offset {} smaller than its multihash",
                    pos
                ))
                .into());
            }

            let mut payload = vec![0u8; (total - mh_len as u64) as usize];
            r.read_exact(&mut payload).map_err(|e| {
                anyhow!(StoreError::Corrupt(format!(
                    "truncated entry at offset {}: {}",
                    pos, e
                )))
            })?;

            f(&mh, &payload)?;
            pos += (hdr_len + mh_len) as u64 + payload.len() as u64;
        }
        if pos != committed {
            return Err(StoreError::Corrupt(format!(
                "entry frames overrun committed length ({} != {})",
                pos, committed
            ))
            .into());
        }
        Ok(())
    }

    /// Flush buffers and release handles. Uncommitted appends stay in the
    /// file but are discarded by the next open.
    pub fn close(mut self) -> Result<()> {
        self.w.flush().context("flush block log on close")?;
        let _ = self.w.get_ref().sync_all();
        info!(
            "closed block log {} (committed {} bytes, {} blocks)",
            self.log_path.display(),
            self.head.len,
            self.head.cnt
        );
        Ok(())
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        crate::util::read_exact_at(&self.read, &self.log_path, buf, offset)
    }
}
