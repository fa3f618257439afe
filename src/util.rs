//! Small filesystem and encoding helpers shared across modules.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Fsync the parent directory of `path` so a rename is durable.
/// Best-effort no-op on platforms without directory fsync.
#[cfg(unix)]
pub fn fsync_parent_dir(path: &Path) -> std::io::Result<()> {
    use std::fs::File;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn fsync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Positional read that does not move the handle's cursor.
#[cfg(unix)]
pub fn read_exact_at(file: &std::fs::File, path: &Path, buf: &mut [u8], offset: u64) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
        .with_context(|| format!("read {} bytes at {} from {}", buf.len(), offset, path.display()))
}

#[cfg(not(unix))]
pub fn read_exact_at(
    _file: &std::fs::File,
    path: &Path,
    buf: &mut [u8],
    offset: u64,
) -> Result<()> {
    use std::io::Seek;
    let mut f = std::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    f.seek(std::io::SeekFrom::Start(offset))?;
    f.read_exact(buf)
        .with_context(|| format!("read {} bytes at {} from {}", buf.len(), offset, path.display()))
}

/// Write `v` as an unsigned varint. Returns the number of bytes written.
pub fn write_varint_u64(w: &mut impl Write, v: u64) -> Result<usize> {
    let mut buf = unsigned_varint::encode::u64_buffer();
    let enc = unsigned_varint::encode::u64(v, &mut buf);
    w.write_all(enc).context("write varint")?;
    Ok(enc.len())
}

/// Read an unsigned varint. `Ok(None)` on clean EOF at the first byte;
/// EOF mid-varint is an error.
pub fn read_varint_u64(r: &mut impl Read) -> Result<Option<(u64, usize)>> {
    let mut buf = [0u8; 10];
    let mut n = 0usize;
    loop {
        let mut byte = [0u8; 1];
        match r.read(&mut byte) {
            Ok(0) => {
                if n == 0 {
                    return Ok(None);
                }
                return Err(anyhow!("unexpected EOF inside varint"));
            }
            Ok(_) => {
                if n == buf.len() {
                    return Err(anyhow!("varint too long"));
                }
                buf[n] = byte[0];
                n += 1;
                if byte[0] & 0x80 == 0 {
                    let (v, _) = unsigned_varint::decode::u64(&buf[..n])
                        .map_err(|e| anyhow!("decode varint: {}", e))?;
                    return Ok(Some((v, n)));
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read varint"),
        }
    }
}

/// Encoded size of `v` as an unsigned varint.
#[inline]
pub fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Decode a varint from the front of a byte slice.
pub fn decode_varint_u64(buf: &[u8]) -> Result<(u64, usize)> {
    let (v, rest) =
        unsigned_varint::decode::u64(buf).map_err(|e| anyhow!("decode varint: {}", e))?;
    Ok((v, buf.len() - rest.len()))
}

/// Format `v` in base 32 using digits 0-9a-v (numeral system, not RFC 4648).
/// Group directories are named this way.
pub fn format_base32(mut v: u64) -> String {
    const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
    if v == 0 {
        return "0".to_string();
    }
    let mut out = [0u8; 13];
    let mut i = out.len();
    while v > 0 {
        i -= 1;
        out[i] = DIGITS[(v % 32) as usize];
        v /= 32;
    }
    String::from_utf8_lossy(&out[i..]).into_owned()
}
