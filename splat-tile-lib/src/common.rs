/// Default leaf capacity of the octree.
pub const DEFAULT_MAX_POINTS: usize = 40_000;

/// Upper bound on a single decompressed block.
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

/// The header sentinel must appear within this many bytes.
pub const HEADER_SCAN_LIMIT: usize = 64 * 1024;

/// Longest spherical-harmonic tail (degree 3, three color channels).
pub const MAX_SH_COEFFS: usize = 45;

/// Splat footprint radius in units of `exp(max log-scale)`.
pub const SPLAT_EXTENT_SIGMAS: f32 = 2.0;

/// Returns the next `\n`-terminated line, without the terminator or a trailing `\r`.
#[inline]
pub(crate) fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    let line = match memchr::memchr(b'\n', &buffer[start..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            &buffer[start..start + pos]
        }
        None => {
            *offset = buffer.len();
            &buffer[start..]
        }
    };
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

#[inline]
pub(crate) fn float_bytes(count: usize, attributes: usize) -> Option<usize> {
    count.checked_mul(attributes).and_then(|n| n.checked_mul(4))
}
