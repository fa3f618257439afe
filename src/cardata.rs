//! CAR v1 block framing.
//!
//! A framed block is `varint(cid_len + payload_len) || cid || payload`.
//! The same framing is used for the intermediate DAG layer files and for
//! the final archive stream, so a layer file is a valid headerless CAR
//! body.

use std::io::{Read, Write};

use anyhow::{anyhow, Context, Result};
use cid::Cid;

use crate::error::StoreError;
use crate::util::{read_varint_u64, write_varint_u64};

// A sane upper bound on a single framed block; anything larger is treated
// as a corrupt frame rather than an allocation request.
const MAX_FRAME_LEN: u64 = 256 << 20;

/// Write one framed block. Returns the number of bytes written.
pub fn write_block(w: &mut impl Write, cid: &Cid, payload: &[u8]) -> Result<u64> {
    let cid_bytes = cid.to_bytes();
    let total = (cid_bytes.len() + payload.len()) as u64;
    let hdr = write_varint_u64(w, total)?;
    w.write_all(&cid_bytes).context("write block cid")?;
    w.write_all(payload).context("write block payload")?;
    Ok(hdr as u64 + total)
}

/// Read one framed block. `Ok(None)` on clean EOF at a frame boundary.
pub fn read_block(r: &mut impl Read) -> Result<Option<(Cid, Vec<u8>)>> {
    let Some((total, _)) = read_varint_u64(r)? else {
        return Ok(None);
    };
    if total == 0 || total > MAX_FRAME_LEN {
        return Err(StoreError::Corrupt(format!("bad frame length {}", total)).into());
    }

    let mut buf = vec![0u8; total as usize];
    r.read_exact(&mut buf)
        .map_err(|e| anyhow!(StoreError::Corrupt(format!("truncated frame: {}", e))))?;

    let mut cur = std::io::Cursor::new(&buf[..]);
    let cid = Cid::read_bytes(&mut cur)
        .map_err(|e| anyhow!(StoreError::Corrupt(format!("bad cid in frame: {}", e))))?;
    let payload = buf[cur.position() as usize..].to_vec();
    Ok(Some((cid, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{CODEC_RAW, MH_SHA2_256};
    use multihash::Multihash;
    use sha2::{Digest, Sha256};

    fn raw_cid(data: &[u8]) -> Cid {
        let mh = Multihash::<64>::wrap(MH_SHA2_256, &Sha256::digest(data)).unwrap();
        Cid::new_v1(CODEC_RAW, mh)
    }

    #[test]
    fn frame_roundtrip() {
        let mut buf = Vec::new();
        let c1 = raw_cid(b"one");
        let c2 = raw_cid(b"two");
        let n1 = write_block(&mut buf, &c1, b"one").unwrap();
        let n2 = write_block(&mut buf, &c2, b"two").unwrap();
        assert_eq!(buf.len() as u64, n1 + n2);

        let mut r = std::io::Cursor::new(&buf);
        let (got1, p1) = read_block(&mut r).unwrap().unwrap();
        assert_eq!(got1, c1);
        assert_eq!(p1, b"one");
        let (got2, p2) = read_block(&mut r).unwrap().unwrap();
        assert_eq!(got2, c2);
        assert_eq!(p2, b"two");
        assert!(read_block(&mut r).unwrap().is_none());
    }

    #[test]
    fn truncated_frame_is_corrupt() {
        let mut buf = Vec::new();
        write_block(&mut buf, &raw_cid(b"x"), b"x").unwrap();
        buf.truncate(buf.len() - 1);

        let mut r = std::io::Cursor::new(&buf);
        let err = read_block(&mut r).unwrap_err();
        assert!(crate::error::is_corrupt(&err));
    }
}
