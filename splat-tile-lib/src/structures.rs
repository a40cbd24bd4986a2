use crate::common::MAX_SH_COEFFS;
use crate::error::TileError;
use foldhash::HashMap;
use foldhash::HashMapExt;
use glam::Vec3A;
use zerocopy::byteorder::little_endian::F32;

/// Fixed per-splat attributes in canonical I/O order.
pub const FIXED_ATTRIBUTES: [&str; 14] = [
    "x", "y", "z", "rot_0", "rot_1", "rot_2", "rot_3", "scale_0", "scale_1", "scale_2", "f_dc_0",
    "f_dc_1", "f_dc_2", "opacity",
];

const ROTATION_NAMES: [&str; 4] = ["rot_0", "rot_1", "rot_2", "rot_3"];
const SH_PREFIX: &str = "f_rest_";

/// Order of the quaternion columns. PLY stores `rot_0` as the scalar part.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RotationOrder {
    /// `rot_0 rot_1 rot_2 rot_3`
    #[default]
    Wxyz,
    /// `rot_1 rot_2 rot_3 rot_0`
    Xyzw,
}

impl RotationOrder {
    fn names(self) -> [&'static str; 4] {
        match self {
            RotationOrder::Wxyz => ["rot_0", "rot_1", "rot_2", "rot_3"],
            RotationOrder::Xyzw => ["rot_1", "rot_2", "rot_3", "rot_0"],
        }
    }
}

/// Ordered attribute list shared by every point of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    names: Vec<String>,
    position: [usize; 3],
    scale: Option<[usize; 3]>,
    sh_coeffs: usize,
}

impl Schema {
    /// The 14 fixed splat attributes followed by `sh_coeffs` `f_rest_*` columns.
    pub fn gaussian(sh_coeffs: usize) -> Self {
        assert!(
            sh_coeffs <= MAX_SH_COEFFS,
            "at most {} spherical harmonic coefficients, got {}",
            MAX_SH_COEFFS,
            sh_coeffs
        );
        let names = FIXED_ATTRIBUTES
            .iter()
            .map(|s| s.to_string())
            .chain((0..sh_coeffs).map(|i| format!("{}{}", SH_PREFIX, i)))
            .collect();
        Self {
            names,
            position: [0, 1, 2],
            scale: Some([7, 8, 9]),
            sh_coeffs,
        }
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, TileError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if field_map.insert(name.as_str(), i).is_some() {
                return Err(TileError::MalformedHeader(format!(
                    "Duplicate property: {}",
                    name
                )));
            }
        }

        let idx_of = |name: &str| {
            field_map.get(name).copied().ok_or_else(|| {
                TileError::MalformedHeader(format!("Missing required property: {}", name))
            })
        };
        let position = [idx_of("x")?, idx_of("y")?, idx_of("z")?];

        let scale = match (
            field_map.get("scale_0"),
            field_map.get("scale_1"),
            field_map.get("scale_2"),
        ) {
            (Some(&s0), Some(&s1), Some(&s2)) => Some([s0, s1, s2]),
            _ => None,
        };

        // The tail must be f_rest_0..f_rest_{k-1} with no gaps.
        let declared = names.iter().filter(|n| n.starts_with(SH_PREFIX)).count();
        let sh_coeffs = (0..)
            .take_while(|i| field_map.contains_key(format!("{}{}", SH_PREFIX, i).as_str()))
            .count();
        if declared != sh_coeffs {
            return Err(TileError::MalformedHeader(format!(
                "Spherical harmonic properties are not contiguous from {}0",
                SH_PREFIX
            )));
        }
        if sh_coeffs > MAX_SH_COEFFS {
            return Err(TileError::MalformedHeader(format!(
                "{} spherical harmonic properties, at most {} are supported",
                sh_coeffs, MAX_SH_COEFFS
            )));
        }

        Ok(Self {
            names,
            position,
            scale,
            sh_coeffs,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, attribute: usize) -> &str {
        &self.names[attribute]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn position_indices(&self) -> [usize; 3] {
        self.position
    }

    pub fn scale_indices(&self) -> Option<[usize; 3]> {
        self.scale
    }

    pub fn sh_coeffs(&self) -> usize {
        self.sh_coeffs
    }

    /// Rearranges the four `rot_*` columns within the slots they occupy.
    pub fn with_rotation_order(&self, order: RotationOrder) -> Schema {
        let Some(mut slots) = ROTATION_NAMES
            .iter()
            .map(|name| self.index_of(name))
            .collect::<Option<Vec<usize>>>()
        else {
            return self.clone();
        };
        slots.sort_unstable();

        let mut reordered = self.clone();
        for (&slot, name) in slots.iter().zip(order.names()) {
            reordered.names[slot] = name.to_string();
        }
        reordered
    }

    /// For every column of `self`, the column of `source` holding the same attribute.
    pub(crate) fn column_map(&self, source: &Schema) -> Vec<usize> {
        let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(source.len());
        for (i, name) in source.names.iter().enumerate() {
            field_map.insert(name.as_str(), i);
        }
        self.names
            .iter()
            .map(|name| {
                *field_map
                    .get(name.as_str())
                    .unwrap_or_else(|| panic!("attribute {} missing from source schema", name))
            })
            .collect()
    }
}

/// Read access to a table of points, independent of its physical layout.
pub trait PointSource {
    fn schema(&self) -> &Schema;

    fn num_points(&self) -> usize;

    fn value(&self, attribute: usize, point: usize) -> f32;

    #[inline]
    fn position(&self, point: usize) -> Vec3A {
        let [ix, iy, iz] = self.schema().position_indices();
        Vec3A::new(
            self.value(ix, point),
            self.value(iy, point),
            self.value(iz, point),
        )
    }

    /// Largest log-scale of the splat, if the schema carries scales.
    #[inline]
    fn max_log_scale(&self, point: usize) -> Option<f32> {
        let [s0, s1, s2] = self.schema().scale_indices()?;
        Some(
            self.value(s0, point)
                .max(self.value(s1, point))
                .max(self.value(s2, point)),
        )
    }
}

/// Struct-of-arrays table: one owned column per attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarPoints {
    schema: Schema,
    num_points: usize,
    columns: Vec<Vec<f32>>,
}

impl ColumnarPoints {
    pub fn new(schema: Schema, columns: Vec<Vec<f32>>) -> Self {
        assert_eq!(
            columns.len(),
            schema.len(),
            "column count does not match the schema"
        );
        let num_points = columns.first().map_or(0, Vec::len);
        for (name, column) in schema.names().iter().zip(&columns) {
            assert_eq!(
                column.len(),
                num_points,
                "column {} has {} values, expected {}",
                name,
                column.len(),
                num_points
            );
        }
        Self {
            schema,
            num_points,
            columns,
        }
    }

    pub fn column(&self, attribute: usize) -> &[f32] {
        &self.columns[attribute]
    }

    pub fn column_by_name(&self, name: &str) -> Option<&[f32]> {
        self.schema.index_of(name).map(|i| self.column(i))
    }

    pub fn into_columns(self) -> Vec<Vec<f32>> {
        self.columns
    }
}

impl PointSource for ColumnarPoints {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_points(&self) -> usize {
        self.num_points
    }

    #[inline]
    fn value(&self, attribute: usize, point: usize) -> f32 {
        self.columns[attribute][point]
    }
}

/// Attribute-major view over a decompressed body: `attribute[p] = floats[a * N + p]`.
#[derive(Debug, Clone)]
pub struct FlatPoints<'a> {
    schema: Schema,
    num_points: usize,
    floats: &'a [F32],
}

impl<'a> FlatPoints<'a> {
    pub fn new(schema: Schema, floats: &'a [F32], num_points: usize) -> Result<Self, TileError> {
        let expected = num_points.checked_mul(schema.len());
        if expected != Some(floats.len()) {
            return Err(TileError::SchemaMismatch(format!(
                "{} floats for {} points with {} properties",
                floats.len(),
                num_points,
                schema.len()
            )));
        }
        Ok(Self {
            schema,
            num_points,
            floats,
        })
    }
}

impl PointSource for FlatPoints<'_> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_points(&self) -> usize {
        self.num_points
    }

    #[inline]
    fn value(&self, attribute: usize, point: usize) -> f32 {
        self.floats[attribute * self.num_points + point].get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_schema_layout() {
        let schema = Schema::gaussian(9);
        assert_eq!(schema.len(), 23);
        assert_eq!(schema.name(3), "rot_0");
        assert_eq!(schema.name(13), "opacity");
        assert_eq!(schema.name(22), "f_rest_8");
        assert_eq!(schema.scale_indices(), Some([7, 8, 9]));
        assert_eq!(schema.sh_coeffs(), 9);
        assert_eq!(Schema::from_names(schema.names().to_vec()).unwrap(), schema);
    }

    #[test]
    #[should_panic]
    fn test_gaussian_schema_rejects_long_tail() {
        Schema::gaussian(46);
    }

    #[test]
    fn test_from_names_requires_position() {
        let err = Schema::from_names(["x", "y", "opacity"]).unwrap_err();
        assert!(matches!(err, TileError::MalformedHeader(_)));
    }

    #[test]
    fn test_from_names_rejects_gap_in_tail() {
        let err = Schema::from_names(["x", "y", "z", "f_rest_0", "f_rest_2"]).unwrap_err();
        assert!(matches!(err, TileError::MalformedHeader(_)));
    }

    #[test]
    fn test_from_names_rejects_duplicates() {
        let err = Schema::from_names(["x", "y", "z", "x"]).unwrap_err();
        assert!(matches!(err, TileError::MalformedHeader(_)));
    }

    #[test]
    fn test_from_names_without_scales() {
        let schema = Schema::from_names(["z", "y", "x", "r", "g", "b"]).unwrap();
        assert_eq!(schema.position_indices(), [2, 1, 0]);
        assert_eq!(schema.scale_indices(), None);
        assert_eq!(schema.sh_coeffs(), 0);
    }

    #[test]
    fn test_rotation_reorder() {
        let schema = Schema::gaussian(0).with_rotation_order(RotationOrder::Xyzw);
        assert_eq!(&schema.names()[3..7], &["rot_1", "rot_2", "rot_3", "rot_0"]);
        assert_eq!(schema.name(7), "scale_0");
        assert_eq!(
            schema.column_map(&Schema::gaussian(0))[3..7],
            [4, 5, 6, 3]
        );

        let plain = Schema::from_names(["x", "y", "z"]).unwrap();
        assert_eq!(plain.with_rotation_order(RotationOrder::Xyzw), plain);
    }

    #[test]
    fn test_layouts_agree() {
        let schema = Schema::from_names(["x", "y", "z", "opacity"]).unwrap();
        let columns = vec![
            vec![1.0, 2.0],
            vec![3.0, 4.0],
            vec![5.0, 6.0],
            vec![0.5, -0.5],
        ];
        let words: Vec<F32> = columns.iter().flatten().map(|&v| F32::new(v)).collect();

        let soa = ColumnarPoints::new(schema.clone(), columns);
        let flat = FlatPoints::new(schema, &words, 2).unwrap();
        for p in 0..2 {
            assert_eq!(soa.position(p), flat.position(p));
            assert_eq!(soa.value(3, p), flat.value(3, p));
        }
        assert_eq!(flat.position(1), Vec3A::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn test_flat_view_rejects_wrong_length() {
        let schema = Schema::from_names(["x", "y", "z"]).unwrap();
        let words = vec![F32::new(0.0); 7];
        assert!(matches!(
            FlatPoints::new(schema, &words, 2),
            Err(TileError::SchemaMismatch(_))
        ));
    }

    #[test]
    #[should_panic]
    fn test_columnar_rejects_ragged_columns() {
        let schema = Schema::from_names(["x", "y", "z"]).unwrap();
        ColumnarPoints::new(schema, vec![vec![0.0; 2], vec![0.0; 2], vec![0.0; 1]]);
    }

    #[test]
    fn test_max_log_scale() {
        let schema = Schema::gaussian(0);
        let mut columns = vec![vec![0.0f32]; 14];
        columns[7][0] = -3.0;
        columns[8][0] = -1.0;
        columns[9][0] = -2.0;
        let points = ColumnarPoints::new(schema, columns);
        assert_eq!(points.max_log_scale(0), Some(-1.0));
    }
}
