//! Extent decompression: zlib, LZO, and zstd behind one entry point.
//!
//! zlib and zstd are direct library calls. LZO is the delicate one: BTRFS
//! frames LZO1X-compressed data as a 4-byte LE total length followed by
//! per-segment 4-byte LE lengths, where segment headers never straddle a
//! 4 KiB page boundary and each segment decompresses to at most one page.
//! The raw LZO1X block decoder is implemented here; no crate in use
//! elsewhere in the tree covers it.

use std::io::Read;

use super::compression;
use super::structs::le32;
use crate::error::BtrfsError;

const LZO_PAGE: usize = 4096;

/// Decompress `data` with the given BTRFS codec, expecting roughly
/// `expected_len` bytes out. The result is truncated to `expected_len`;
/// codecs outside {0,1,2,3} fail with `UnsupportedCompression`.
pub fn decompress(codec: u8, data: &[u8], expected_len: usize) -> Result<Vec<u8>, BtrfsError> {
    match codec {
        compression::NONE => {
            let mut out = data.to_vec();
            out.truncate(expected_len);
            Ok(out)
        }
        compression::ZLIB => {
            let mut out = Vec::with_capacity(expected_len);
            flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| BtrfsError::Parse(format!("zlib: {e}")))?;
            out.truncate(expected_len);
            Ok(out)
        }
        compression::LZO => {
            let mut out = lzo_decompress_framed(data, expected_len)?;
            out.truncate(expected_len);
            Ok(out)
        }
        compression::ZSTD => {
            let mut out =
                zstd::decode_all(data).map_err(|e| BtrfsError::Parse(format!("zstd: {e}")))?;
            out.truncate(expected_len);
            Ok(out)
        }
        other => Err(BtrfsError::UnsupportedCompression(other)),
    }
}

/// Unwrap the BTRFS LZO segment framing and decompress each segment.
fn lzo_decompress_framed(data: &[u8], expected_len: usize) -> Result<Vec<u8>, BtrfsError> {
    if data.len() < 4 {
        return Err(BtrfsError::TruncatedRecord {
            what: "lzo header",
            need: 4,
            have: data.len(),
        });
    }
    // Total compressed length, including this 4-byte header.
    let total = (le32(data, 0) as usize).min(data.len());
    let mut pos = 4;
    let mut out = Vec::with_capacity(expected_len);

    while pos + 4 <= total && out.len() < expected_len {
        // Segment length headers never cross a page boundary; skip padding.
        let page_remaining = LZO_PAGE - (pos % LZO_PAGE);
        if page_remaining < 4 {
            pos += page_remaining;
            continue;
        }
        let seg_len = le32(data, pos) as usize;
        pos += 4;
        if seg_len == 0 {
            break;
        }
        if pos + seg_len > data.len() {
            return Err(BtrfsError::TruncatedRecord {
                what: "lzo segment",
                need: seg_len,
                have: data.len().saturating_sub(pos),
            });
        }
        let segment = lzo1x_decompress(&data[pos..pos + seg_len], LZO_PAGE)?;
        out.extend_from_slice(&segment);
        pos += seg_len;
    }

    Ok(out)
}

/// After a literal copy, how a `t < 16` instruction byte is interpreted.
/// Both variants share the distance formula `1 + (t >> 2) + (b << 2)` and
/// differ only in copy length.
#[derive(Clone, Copy, PartialEq)]
enum M1Kind {
    /// Two-byte copy (follows 1-3 trailing literals).
    Near,
    /// Three-byte copy (follows a literal run).
    Far,
}

/// Raw LZO1X block decompression, bounds-checked. `max_out` caps the output
/// (one page for BTRFS segments).
fn lzo1x_decompress(input: &[u8], max_out: usize) -> Result<Vec<u8>, BtrfsError> {
    fn bad() -> BtrfsError {
        BtrfsError::Parse("malformed LZO1X stream".into())
    }

    let mut out: Vec<u8> = Vec::with_capacity(max_out.min(LZO_PAGE));
    let mut ip = 0usize;

    macro_rules! take {
        () => {{
            let b = *input.get(ip).ok_or_else(bad)?;
            ip += 1;
            b as usize
        }};
    }
    macro_rules! take_le16 {
        () => {{
            let lo = take!();
            let hi = take!();
            lo | (hi << 8)
        }};
    }
    macro_rules! copy_literals {
        ($n:expr) => {{
            let n = $n;
            if ip + n > input.len() || out.len() + n > max_out {
                return Err(bad());
            }
            out.extend_from_slice(&input[ip..ip + n]);
            ip += n;
        }};
    }
    macro_rules! copy_match {
        ($dist:expr, $len:expr) => {{
            let dist = $dist;
            let len = $len;
            if dist == 0 || dist > out.len() || out.len() + len > max_out {
                return Err(bad());
            }
            let start = out.len() - dist;
            for k in 0..len {
                let b = out[start + k];
                out.push(b);
            }
        }};
    }
    macro_rules! extended_len {
        ($base:expr) => {{
            let mut acc = 0usize;
            loop {
                let b = take!();
                if b == 0 {
                    acc += 255;
                    if acc > max_out + LZO_PAGE {
                        return Err(bad());
                    }
                } else {
                    break acc + $base + b;
                }
            }
        }};
    }

    // Instruction pending as a match, or read fresh at the loop top.
    let mut pending: Option<(usize, M1Kind)>;

    let first = take!();
    if first > 17 {
        let n = first - 17;
        copy_literals!(n);
        let kind = if n < 4 { M1Kind::Near } else { M1Kind::Far };
        pending = Some((take!(), kind));
    } else {
        pending = Some((first, M1Kind::Near));
        // A first byte <= 17 is an ordinary instruction; feed it through the
        // normal path by treating it as "not yet a match".
        if first < 16 {
            pending = None;
            ip -= 1;
        }
    }

    loop {
        let (t, kind) = match pending.take() {
            Some(p) => p,
            None => {
                // Literal-run instruction.
                let mut t = take!();
                if t < 16 {
                    if t == 0 {
                        t = extended_len!(15);
                    }
                    copy_literals!(t + 3);
                    (take!(), M1Kind::Far)
                } else {
                    (t, M1Kind::Near)
                }
            }
        };

        if t >= 64 {
            // M2: distance 1..=2048, length 3..=8
            let b = take!();
            let dist = 1 + ((t >> 2) & 7) + (b << 3);
            let len = (t >> 5) + 1;
            copy_match!(dist, len);
        } else if t >= 32 {
            // M3: distance 1..=16384
            let mut len = t & 31;
            if len == 0 {
                len = extended_len!(31);
            }
            let d = take_le16!();
            copy_match!(1 + (d >> 2), len + 2);
        } else if t >= 16 {
            // M4: distance 16385..=49151, or end-of-stream marker
            let mut len = t & 7;
            if len == 0 {
                len = extended_len!(7);
            }
            let d = take_le16!();
            let dist = ((t & 8) << 11) + (d >> 2);
            if dist == 0 {
                break; // end of stream
            }
            copy_match!(0x4000 + dist, len + 2);
        } else {
            // M1: short copy after literals
            let b = take!();
            let dist = 1 + (t >> 2) + (b << 2);
            match kind {
                M1Kind::Near => copy_match!(dist, 2),
                M1Kind::Far => copy_match!(dist, 3),
            }
        }

        // The low two bits of the second-to-last consumed byte say how many
        // literals trail this match (0..=3).
        let trailing = (input[ip - 2] as usize) & 3;
        if trailing > 0 {
            copy_literals!(trailing);
            pending = Some((take!(), M1Kind::Near));
        } else {
            pending = None;
        }
    }

    Ok(out)
}
