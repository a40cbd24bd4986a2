use crate::common::{float_bytes, next_line, HEADER_SCAN_LIMIT, MAX_BLOCK_SIZE};
use crate::error::TileError;
use crate::lz4;
use crate::structures::{FlatPoints, Schema};
use std::io::Write;
use zerocopy::byteorder::little_endian::F32;
use zerocopy::FromBytes;

const FORMAT_LINE: &[u8] = b"format binary_little_endian 1.0";
pub(crate) const COMPRESSION_COMMENT: &str = "lz4compressed";

/// Names given to headers that declare no properties at all.
const LEGACY_PROPERTIES: [&str; 10] = ["x", "y", "z", "r", "g", "b", "a", "covL", "covM", "covN"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlyHeader {
    pub num_points: usize,
    pub properties: Vec<String>,
    pub comments: Vec<String>,
    /// Offset of the first body byte.
    pub header_len: usize,
}

fn malformed(msg: impl Into<String>) -> TileError {
    TileError::MalformedHeader(msg.into())
}

fn utf8(bytes: &[u8]) -> Result<&str, TileError> {
    std::str::from_utf8(bytes).map_err(|e| malformed(format!("UTF-8 error: {}", e)))
}

pub fn parse_header(raw_data: &[u8]) -> Result<PlyHeader, TileError> {
    let window = &raw_data[..raw_data.len().min(HEADER_SCAN_LIMIT)];
    let mut offset = 0;

    let magic = next_line(window, &mut offset).ok_or_else(|| malformed("No 'ply' line"))?;
    if magic != b"ply" {
        return Err(malformed("Not a .ply file (missing 'ply' header)"));
    }

    let mut num_points = None;
    let mut properties = Vec::new();
    let mut comments = Vec::new();
    loop {
        // A line cut off by the window edge has no terminator yet.
        let line = match next_line(window, &mut offset) {
            Some(l) if window[offset - 1] == b'\n' => l,
            _ => {
                return Err(malformed(format!(
                    "No 'end_header' found within the first {} bytes",
                    window.len()
                )))
            }
        };

        if line == b"end_header" {
            break;
        }

        if let Some(rest) = line.strip_prefix(b"format ") {
            if line != FORMAT_LINE {
                return Err(malformed(format!(
                    "Unsupported format '{}' (only binary_little_endian 1.0 is supported)",
                    String::from_utf8_lossy(rest)
                )));
            }
        } else if let Some(rest) = line.strip_prefix(b"comment") {
            comments.push(utf8(rest)?.trim().to_string());
        } else if line.starts_with(b"obj_info") {
            continue;
        } else if let Some(rest) = line.strip_prefix(b"element ") {
            let rest = utf8(rest)?;
            let Some(count) = rest.strip_prefix("vertex ") else {
                return Err(malformed(format!("Unsupported element: {}", rest)));
            };
            if num_points.is_some() {
                return Err(malformed("Duplicate 'element vertex' definition"));
            }
            let count = count
                .trim()
                .parse::<usize>()
                .map_err(|e| malformed(format!("Vertex count '{}': {}", count.trim(), e)))?;
            num_points = Some(count);
        } else if let Some(rest) = line
            .strip_prefix(b"property float32 ")
            .or_else(|| line.strip_prefix(b"property float "))
        {
            if num_points.is_none() {
                return Err(malformed("Property declared before 'element vertex'"));
            }
            properties.push(utf8(rest)?.trim().to_string());
        } else if line.starts_with(b"property ") {
            return Err(malformed(format!(
                "Unsupported property line: {}",
                String::from_utf8_lossy(line)
            )));
        } else if !line.is_empty() {
            return Err(malformed(format!(
                "Unexpected header line: {}",
                String::from_utf8_lossy(line)
            )));
        }
    }

    let num_points = num_points.ok_or_else(|| malformed("Missing 'element vertex' definition"))?;
    Ok(PlyHeader {
        num_points,
        properties,
        comments,
        header_len: offset,
    })
}

/// Writes a header for `num_points` float32 points. `comments` are carried
/// over from a source header; the compression marker is always written once.
pub fn write_header(
    output: &mut Vec<u8>,
    num_points: usize,
    schema: &Schema,
    comments: &[String],
) -> Result<(), TileError> {
    output.reserve(96 + schema.len() * 28);
    output.extend_from_slice(b"ply\n");
    output.extend_from_slice(FORMAT_LINE);
    output.push(b'\n');
    writeln!(output, "comment {}", COMPRESSION_COMMENT).map_err(TileError::IoError)?;
    for comment in comments.iter().filter(|c| *c != COMPRESSION_COMMENT) {
        if comment.contains(['\n', '\r']) {
            return Err(malformed(format!("Comment spans lines: {:?}", comment)));
        }
        writeln!(output, "comment {}", comment).map_err(TileError::IoError)?;
    }
    writeln!(output, "element vertex {}", num_points).map_err(TileError::IoError)?;
    for name in schema.names() {
        writeln!(output, "property float32 {}", name).map_err(TileError::IoError)?;
    }
    output.extend_from_slice(b"end_header\n");
    Ok(())
}

/// A decoded compressed PLY: header, attribute schema and decompressed body.
#[derive(Debug, Clone)]
pub struct Container {
    pub header: PlyHeader,
    pub schema: Schema,
    body: Vec<u8>,
}

impl Container {
    pub fn open(raw_data: &[u8]) -> Result<Self, TileError> {
        let header = parse_header(raw_data)?;
        let compressed = &raw_data[header.header_len..];

        let (schema, body) = if header.properties.is_empty() {
            let body = lz4::decompress(compressed)?;
            let schema = infer_legacy_schema(header.num_points, body.len())?;
            (schema, body)
        } else {
            let schema = Schema::from_names(header.properties.iter().cloned())?;
            let expected = float_bytes(header.num_points, schema.len())
                .filter(|&n| n <= MAX_BLOCK_SIZE)
                .ok_or_else(|| {
                    malformed(format!(
                        "{} points with {} properties exceed the block size limit",
                        header.num_points,
                        schema.len()
                    ))
                })?;
            let body = lz4::decompress_with_limit(compressed, expected)?;
            if body.len() != expected {
                return Err(TileError::CorruptStream(format!(
                    "Body decompressed to {} bytes, header implies {}",
                    body.len(),
                    expected
                )));
            }
            (schema, body)
        };

        log::debug!(
            "container: {} points, {} properties, {} -> {} body bytes",
            header.num_points,
            schema.len(),
            compressed.len(),
            body.len()
        );
        Ok(Self {
            header,
            schema,
            body,
        })
    }

    pub fn num_points(&self) -> usize {
        self.header.num_points
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn points(&self) -> Result<FlatPoints<'_>, TileError> {
        let words = <[F32]>::ref_from_bytes(&self.body).map_err(|_| {
            TileError::SchemaMismatch(format!(
                "Body of {} bytes is not a whole number of float32 values",
                self.body.len()
            ))
        })?;
        FlatPoints::new(self.schema.clone(), words, self.header.num_points)
    }
}

fn infer_legacy_schema(num_points: usize, body_len: usize) -> Result<Schema, TileError> {
    let point_bytes = num_points.checked_mul(4).filter(|&n| n > 0);
    let Some(point_bytes) = point_bytes.filter(|&n| body_len % n == 0) else {
        return Err(TileError::SchemaMismatch(format!(
            "Cannot infer properties from {} body bytes for {} points",
            body_len, num_points
        )));
    };
    let count = body_len / point_bytes;
    if !(3..=LEGACY_PROPERTIES.len()).contains(&count) {
        return Err(TileError::SchemaMismatch(format!(
            "Header declares no properties and the body holds {} per point",
            count
        )));
    }
    log::debug!("container: inferred {} legacy properties", count);
    Schema::from_names(LEGACY_PROPERTIES[..count].iter().copied())
}
