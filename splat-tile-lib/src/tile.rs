use crate::bounds::Aabb;
use crate::container::{write_header, Container};
use crate::error::TileError;
use crate::lz4;
use crate::octree::OctreeNode;
use crate::structures::{ColumnarPoints, PointSource, RotationOrder, Schema};

/// What a leaf is serialized into.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TileTarget {
    /// Self-describing PLY header followed by an LZ4 block of attribute-major floats.
    #[default]
    Compressed,
    /// In-memory columns, with the quaternion columns in the given order.
    Columnar(RotationOrder),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TilePayload {
    Compressed(Vec<u8>),
    Columnar(ColumnarPoints),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub bounds: Aabb,
    pub num_points: usize,
    pub forced: bool,
    /// Header comments inherited from the source file.
    pub comments: Vec<String>,
    pub payload: TilePayload,
}

impl Tile {
    pub fn compressed_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            TilePayload::Compressed(bytes) => Some(bytes),
            TilePayload::Columnar(_) => None,
        }
    }
}

/// Copies the selected points into fresh attribute-major columns laid out per `schema`.
pub fn project<P: PointSource>(points: &P, schema: &Schema, indices: &[usize]) -> ColumnarPoints {
    assert_eq!(
        schema.sh_coeffs(),
        points.schema().sh_coeffs(),
        "tile schema must carry the source's spherical harmonic tail"
    );
    let columns: Vec<Vec<f32>> = schema
        .column_map(points.schema())
        .into_iter()
        .map(|source| indices.iter().map(|&i| points.value(source, i)).collect())
        .collect();
    ColumnarPoints::new(schema.clone(), columns)
}

/// Header plus LZ4-compressed body for the selected points, in source attribute order.
pub fn encode_tile<P: PointSource>(
    points: &P,
    indices: &[usize],
    comments: &[String],
) -> Result<Vec<u8>, TileError> {
    let schema = points.schema();
    let mut raw = Vec::with_capacity(indices.len() * schema.len() * 4);
    for attribute in 0..schema.len() {
        for &i in indices {
            raw.extend_from_slice(&points.value(attribute, i).to_le_bytes());
        }
    }

    let compressed = lz4::compress(&raw);
    let mut out = Vec::with_capacity(compressed.len() + 64 + schema.len() * 28);
    write_header(&mut out, indices.len(), schema, comments)?;
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Inverse of [`encode_tile`].
pub fn decode_tile(data: &[u8]) -> Result<ColumnarPoints, TileError> {
    let container = Container::open(data)?;
    let points = container.points()?;
    let all: Vec<usize> = (0..points.num_points()).collect();
    Ok(project(&points, points.schema(), &all))
}

pub fn serialize_leaf<P: PointSource>(
    points: &P,
    leaf: &OctreeNode,
    target: TileTarget,
    comments: &[String],
) -> Result<Tile, TileError> {
    debug_assert!(leaf.is_leaf());
    let payload = match target {
        TileTarget::Compressed => {
            TilePayload::Compressed(encode_tile(points, &leaf.indices, comments)?)
        }
        TileTarget::Columnar(order) => {
            let schema = points.schema().with_rotation_order(order);
            TilePayload::Columnar(project(points, &schema, &leaf.indices))
        }
    };
    Ok(Tile {
        bounds: leaf.bounds,
        num_points: leaf.indices.len(),
        forced: leaf.forced,
        comments: comments.to_vec(),
        payload,
    })
}
