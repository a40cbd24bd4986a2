pub mod bounds;
pub mod common;
pub mod container;
pub mod error;
pub mod lz4;
pub mod octree;
pub mod structures;
pub mod tile;

use common::DEFAULT_MAX_POINTS;
use container::{Container, COMPRESSION_COMMENT};
use error::TileError;
use octree::Octree;
use tile::serialize_leaf;

pub use bounds::{Aabb, BoundsPolicy};
pub use structures::{ColumnarPoints, FlatPoints, PointSource, RotationOrder, Schema};
pub use tile::{decode_tile, Tile, TilePayload, TileTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilerConfig {
    /// Leaf capacity; must be at least 1.
    pub max_points: usize,
    pub bounds: BoundsPolicy,
    pub target: TileTarget,
}

impl Default for TilerConfig {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
            bounds: BoundsPolicy::default(),
            target: TileTarget::default(),
        }
    }
}

/// Partitions an already decoded point table and serializes every leaf.
pub fn chunk_points<P: PointSource>(points: &P, config: &TilerConfig) -> Result<Vec<Tile>, TileError> {
    chunk_with_comments(points, &[], config)
}

fn chunk_with_comments<P: PointSource>(
    points: &P,
    comments: &[String],
    config: &TilerConfig,
) -> Result<Vec<Tile>, TileError> {
    if config.max_points == 0 {
        return Err(TileError::InvalidConfig(
            "max_points must be at least 1".to_string(),
        ));
    }
    config.bounds.check(points.schema())?;

    let indices = (0..points.num_points()).collect();
    let tree = Octree::build(points, indices, config.max_points, config.bounds);
    let leaves = tree.leaves();

    let tiles = leaves
        .iter()
        .map(|leaf| serialize_leaf(points, leaf, config.target, comments))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, t) in tiles.iter().enumerate() {
        log::trace!(
            "tile {}: {} points, center {:?}, half extents {:?}",
            i,
            t.num_points,
            t.bounds.center(),
            t.bounds.half_extents()
        );
    }
    log::info!(
        "chunked {} points into {} tiles ({} forced), octree depth {}, {} nodes",
        points.num_points(),
        tiles.len(),
        tiles.iter().filter(|t| t.forced).count(),
        tree.depth(),
        tree.len()
    );
    Ok(tiles)
}

/// Splits a compressed PLY (header + one LZ4 block) into tiles.
pub fn chunk_compressed_ply(raw_data: &[u8], config: &TilerConfig) -> Result<Vec<Tile>, TileError> {
    let container = Container::open(raw_data)?;
    let points = container.points()?;
    let comments: Vec<String> = container
        .header
        .comments
        .iter()
        .filter(|c| *c != COMPRESSION_COMMENT)
        .cloned()
        .collect();
    chunk_with_comments(&points, &comments, config)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use std::path::Path;

    /// Reads `path` asynchronously, then chunks it on a blocking worker.
    pub async fn chunk_file_async(
        path: impl AsRef<Path>,
        config: &TilerConfig,
    ) -> Result<Vec<Tile>, TileError> {
        let raw_data = tokio::fs::read(path.as_ref())
            .await
            .map_err(TileError::IoError)?;
        let config = *config;
        tokio::task::spawn_blocking(move || chunk_compressed_ply(&raw_data, &config))
            .await
            .map_err(|e| TileError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn create_test_points(n: usize, sh_coeffs: usize, seed: u64) -> ColumnarPoints {
        let mut rng = StdRng::seed_from_u64(seed);
        let schema = Schema::gaussian(sh_coeffs);
        let columns: Vec<Vec<f32>> = (0..schema.len())
            .map(|a| {
                (0..n)
                    .map(|_| match a {
                        0..=2 => rng.gen_range(-50.0..50.0f32),
                        7..=9 => rng.gen_range(-5.0..-2.0f32),
                        _ => rng.gen_range(-1.0..1.0f32),
                    })
                    .collect()
            })
            .collect();
        ColumnarPoints::new(schema, columns)
    }

    fn create_test_ply(points: &ColumnarPoints) -> Vec<u8> {
        let all: Vec<usize> = (0..points.num_points()).collect();
        tile::encode_tile(points, &all, &[]).expect("encode_tile(...) failed")
    }

    fn bits(points: &ColumnarPoints, point: usize) -> Vec<u32> {
        (0..points.schema().len())
            .map(|a| points.value(a, point).to_bits())
            .collect()
    }

    #[test]
    fn test_chunk_compressed_ply() {
        let source = create_test_points(2_000, 9, 1);
        let raw_ply = create_test_ply(&source);
        let config = TilerConfig {
            max_points: 150,
            ..TilerConfig::default()
        };

        let tiles = chunk_compressed_ply(&raw_ply, &config).expect("chunk_compressed_ply(...) failed");
        assert!(tiles.len() > 1);

        // Every source point comes back exactly once, bit for bit.
        let mut expected: Vec<Vec<u32>> = (0..2_000).map(|i| bits(&source, i)).collect();
        let mut actual = Vec::new();
        for t in &tiles {
            assert!(t.num_points <= 150 || t.forced);
            let decoded = decode_tile(t.compressed_bytes().unwrap()).unwrap();
            assert_eq!(decoded.schema(), source.schema());
            assert_eq!(decoded.num_points(), t.num_points);
            for p in 0..decoded.num_points() {
                assert!(t.bounds.contains(&Aabb::empty().add_point(decoded.position(p))));
                actual.push(bits(&decoded, p));
            }
        }
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_flat_and_columnar_sources_agree() {
        let source = create_test_points(500, 3, 2);
        let raw_ply = create_test_ply(&source);
        let config = TilerConfig {
            max_points: 40,
            bounds: BoundsPolicy::SplatInflated,
            target: TileTarget::Compressed,
        };
        let from_bytes = chunk_compressed_ply(&raw_ply, &config).unwrap();
        let from_table = chunk_points(&source, &config).unwrap();
        assert_eq!(from_bytes, from_table);
    }

    #[test]
    fn test_columnar_target() {
        let source = create_test_points(300, 0, 3);
        let config = TilerConfig {
            max_points: 64,
            bounds: BoundsPolicy::SplatInflated,
            target: TileTarget::Columnar(RotationOrder::Xyzw),
        };
        let tiles = chunk_points(&source, &config).unwrap();
        let total: usize = tiles.iter().map(|t| t.num_points).sum();
        assert_eq!(total, 300);
        for t in &tiles {
            let TilePayload::Columnar(table) = &t.payload else {
                panic!("expected a columnar payload");
            };
            assert_eq!(table.num_points(), t.num_points);
            assert_eq!(&table.schema().names()[3..7], &["rot_1", "rot_2", "rot_3", "rot_0"]);
            for p in 0..table.num_points() {
                let inflated = BoundsPolicy::SplatInflated.point_bounds(table, p);
                assert!(t.bounds.contains(&inflated));
            }
        }
    }

    #[test]
    fn test_outlier_scenario() {
        let schema = Schema::from_names(["x", "y", "z", "opacity"]).unwrap();
        let mut columns = vec![Vec::new(); 4];
        for i in 0..8u32 {
            columns[0].push((i & 1) as f32);
            columns[1].push(((i >> 1) & 1) as f32);
            columns[2].push(((i >> 2) & 1) as f32);
            columns[3].push(0.5);
        }
        for (a, v) in [1000.0, -1000.0, 500.0, 0.5].into_iter().enumerate() {
            columns[a].push(v);
        }
        let source = ColumnarPoints::new(schema, columns);
        let raw_ply = create_test_ply(&source);

        let config = TilerConfig {
            max_points: 4,
            ..TilerConfig::default()
        };
        let tiles = chunk_compressed_ply(&raw_ply, &config).unwrap();
        assert!(tiles.len() >= 2);
        let outlier = tiles
            .iter()
            .find(|t| t.bounds.contains(&Aabb::empty().add_point(glam::Vec3A::new(1000.0, -1000.0, 500.0))))
            .unwrap();
        assert!(outlier.num_points <= 4);
        assert!(tiles.iter().all(|t| t.num_points <= 4));
    }

    #[test]
    fn test_inflated_bounds_need_scales() {
        let schema = Schema::from_names(["x", "y", "z"]).unwrap();
        let source = ColumnarPoints::new(schema, vec![vec![0.0], vec![0.0], vec![0.0]]);
        let config = TilerConfig {
            bounds: BoundsPolicy::SplatInflated,
            ..TilerConfig::default()
        };
        assert!(matches!(
            chunk_points(&source, &config),
            Err(TileError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_source_comments_reach_every_tile() {
        let source = create_test_points(400, 0, 8);
        let all: Vec<usize> = (0..400).collect();
        let comments = vec!["captured 2024-05-01".to_string()];
        let raw_ply = tile::encode_tile(&source, &all, &comments).unwrap();

        let config = TilerConfig {
            max_points: 50,
            ..TilerConfig::default()
        };
        let tiles = chunk_compressed_ply(&raw_ply, &config).unwrap();
        assert!(tiles.len() > 1);
        for t in &tiles {
            assert_eq!(t.comments, comments);
            let header = container::parse_header(t.compressed_bytes().unwrap()).unwrap();
            assert_eq!(header.comments, vec!["lz4compressed", "captured 2024-05-01"]);
        }
        assert!(chunk_points(&source, &config)
            .unwrap()
            .iter()
            .all(|t| t.comments.is_empty()));
    }

    #[test]
    fn test_zero_leaf_capacity_is_rejected() {
        let source = create_test_points(10, 0, 7);
        let config = TilerConfig {
            max_points: 0,
            ..TilerConfig::default()
        };
        assert!(matches!(
            chunk_points(&source, &config),
            Err(TileError::InvalidConfig(_))
        ));
        let raw_ply = create_test_ply(&source);
        assert!(matches!(
            chunk_compressed_ply(&raw_ply, &config),
            Err(TileError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_cloud() {
        let source = create_test_points(0, 0, 4);
        let raw_ply = create_test_ply(&source);
        let tiles = chunk_compressed_ply(&raw_ply, &TilerConfig::default()).unwrap();
        assert!(tiles.is_empty());
    }

    #[test]
    fn test_malformed_header_is_fatal() {
        let data = b"ply\nformat binary_little_endian 1.0\nproperty float32 x\nend_header\n\x00";
        assert!(matches!(
            chunk_compressed_ply(data, &TilerConfig::default()),
            Err(TileError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_corrupt_body_is_reported() {
        let source = create_test_points(10, 0, 5);
        let mut raw_ply = create_test_ply(&source);
        let header_len = container::parse_header(&raw_ply).unwrap().header_len;
        raw_ply.truncate(header_len + 8);
        assert!(matches!(
            chunk_compressed_ply(&raw_ply, &TilerConfig::default()),
            Err(TileError::CorruptStream(_))
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_chunk_file_async() {
        let source = create_test_points(1_000, 0, 6);
        let raw_ply = create_test_ply(&source);
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = dir.path().join("scene.compressed.ply");
        std::fs::write(&path, &raw_ply).unwrap();

        let config = TilerConfig {
            max_points: 100,
            ..TilerConfig::default()
        };
        let tiles = chunk_file_async(&path, &config)
            .await
            .expect("chunk_file_async failed");
        assert_eq!(tiles, chunk_compressed_ply(&raw_ply, &config).unwrap());

        let missing = chunk_file_async(dir.path().join("missing.ply"), &config).await;
        assert!(matches!(missing, Err(TileError::IoError(_))));
    }
}
