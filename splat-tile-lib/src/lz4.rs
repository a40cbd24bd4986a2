//! Raw LZ4 block codec.
//!
//! Only the block layer is implemented: no frame header, no checksums, no
//! dictionary. A block is a run of sequences, each a token byte
//! (`literal_len << 4 | (match_len - 4)`), optional literal-length extension
//! bytes, the literals, a little-endian `u16` back-reference offset and
//! optional match-length extension bytes. The last sequence carries literals
//! only.

use crate::common::MAX_BLOCK_SIZE;
use crate::error::TileError;

const MIN_MATCH: usize = 4;
const MAX_OFFSET: usize = 0xFFFF;
const RUN_MASK: usize = 0x0F;
const HASH_LOG: u32 = 16;
const HASH_SIZE: usize = 1 << HASH_LOG;
const NO_POSITION: usize = usize::MAX;

#[inline]
fn hash4(window: u32) -> usize {
    (window.wrapping_mul(2_654_435_761) >> 16) as usize & (HASH_SIZE - 1)
}

#[inline]
fn read_u32(src: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([src[pos], src[pos + 1], src[pos + 2], src[pos + 3]])
}

#[inline]
fn write_length(out: &mut Vec<u8>, mut len: usize) {
    while len >= 0xFF {
        out.push(0xFF);
        len -= 0xFF;
    }
    out.push(len as u8);
}

fn emit_sequence(out: &mut Vec<u8>, literals: &[u8], matched: Option<(usize, usize)>) {
    let lit_len = literals.len();
    let mut token = (lit_len.min(RUN_MASK) as u8) << 4;
    if let Some((_, match_len)) = matched {
        token |= (match_len - MIN_MATCH).min(RUN_MASK) as u8;
    }

    out.push(token);
    if lit_len >= RUN_MASK {
        write_length(out, lit_len - RUN_MASK);
    }
    out.extend_from_slice(literals);

    if let Some((offset, match_len)) = matched {
        out.extend_from_slice(&(offset as u16).to_le_bytes());
        if match_len - MIN_MATCH >= RUN_MASK {
            write_length(out, match_len - MIN_MATCH - RUN_MASK);
        }
    }
}

/// Greedy single-pass encoder.
///
/// One candidate per hash bucket, no lazy matching. A candidate is taken only
/// when its offset fits in 16 bits and all four hashed bytes agree.
pub fn compress(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() + src.len() / 255 + 16);
    let mut table = vec![NO_POSITION; HASH_SIZE];
    let mut ip = 0;
    let mut anchor = 0;

    while ip + MIN_MATCH < src.len() {
        let h = hash4(read_u32(src, ip));
        let candidate = table[h];
        table[h] = ip;

        if candidate != NO_POSITION
            && ip - candidate <= MAX_OFFSET
            && src[candidate..candidate + MIN_MATCH] == src[ip..ip + MIN_MATCH]
        {
            let mut match_len = MIN_MATCH;
            while ip + match_len < src.len() && src[candidate + match_len] == src[ip + match_len] {
                match_len += 1;
            }
            emit_sequence(&mut out, &src[anchor..ip], Some((ip - candidate, match_len)));
            ip += match_len;
            anchor = ip;
            continue;
        }
        ip += 1;
    }
    emit_sequence(&mut out, &src[anchor..], None);

    log::trace!("lz4: compressed {} bytes into {}", src.len(), out.len());
    out
}

#[inline]
fn read_length(src: &[u8], sp: &mut usize, base: usize, limit: usize) -> Result<usize, TileError> {
    let mut len = base;
    loop {
        let Some(&byte) = src.get(*sp) else {
            return Err(TileError::CorruptStream(
                "length extension runs past the end of the block".to_string(),
            ));
        };
        *sp += 1;
        len = len
            .checked_add(byte as usize)
            .filter(|&l| l <= limit)
            .ok_or_else(|| {
                TileError::CorruptStream(format!("length field exceeds the {} byte limit", limit))
            })?;
        if byte != 0xFF {
            return Ok(len);
        }
    }
}

#[inline]
fn ensure_room(produced: usize, extra: usize, limit: usize) -> Result<(), TileError> {
    if extra > limit - produced {
        return Err(TileError::CorruptStream(format!(
            "decompressed output would exceed {} bytes",
            limit
        )));
    }
    Ok(())
}

pub fn decompress(src: &[u8]) -> Result<Vec<u8>, TileError> {
    decompress_with_limit(src, MAX_BLOCK_SIZE)
}

/// Decodes a block, refusing to produce more than `limit` bytes.
///
/// Every back-reference is checked against the bytes already produced before
/// it is followed.
pub fn decompress_with_limit(src: &[u8], limit: usize) -> Result<Vec<u8>, TileError> {
    let mut dst = Vec::with_capacity(src.len().saturating_mul(4).min(limit));
    let mut sp = 0;

    while sp < src.len() {
        let token = src[sp] as usize;
        sp += 1;

        let mut lit_len = token >> 4;
        if lit_len == RUN_MASK {
            lit_len = read_length(src, &mut sp, lit_len, limit)?;
        }
        let lit_end = sp
            .checked_add(lit_len)
            .filter(|&end| end <= src.len())
            .ok_or_else(|| {
                TileError::CorruptStream(format!(
                    "literal run of {} bytes at {} overruns the block",
                    lit_len, sp
                ))
            })?;
        ensure_room(dst.len(), lit_len, limit)?;
        dst.extend_from_slice(&src[sp..lit_end]);
        sp = lit_end;

        // A literal-only sequence terminates the block.
        if sp >= src.len() {
            break;
        }

        if src.len() - sp < 2 {
            return Err(TileError::CorruptStream(format!(
                "truncated match offset at {}",
                sp
            )));
        }
        let offset = u16::from_le_bytes([src[sp], src[sp + 1]]) as usize;
        sp += 2;

        let mut match_len = (token & RUN_MASK) + MIN_MATCH;
        if token & RUN_MASK == RUN_MASK {
            match_len = read_length(src, &mut sp, match_len, limit)?;
        }

        if offset == 0 || offset > dst.len() {
            return Err(TileError::CorruptStream(format!(
                "back-reference offset {} with only {} bytes decoded",
                offset,
                dst.len()
            )));
        }
        ensure_room(dst.len(), match_len, limit)?;

        // Byte by byte: the source may overlap the bytes being written.
        let start = dst.len() - offset;
        for i in 0..match_len {
            let byte = dst[start + i];
            dst.push(byte);
        }
    }

    Ok(dst)
}
