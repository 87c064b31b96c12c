use nalgebra::{Matrix3, Point3, Vector3};
use ndarray::Array3;

/// A point in the annotation source's physical coordinate basis (millimeters).
pub type PhysicalPoint = Point3<f64>;

/// A point in continuous (fractional) voxel-index space.
pub type GridPoint = Point3<f64>;

/// Voxel-grid dimensions of a volume, in `(width, height, depth)` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeShape {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

/// A DICOM series loaded into memory, together with the spatial metadata
/// needed to map physical-space points onto the voxel grid.
pub struct Volume {
    /// Pixel data in `(depth, height, width)` layout.
    pub data: Array3<u16>,
    /// Voxel spacing in millimeters: (column, row, slice).
    pub spacing: (f64, f64, f64),
    /// Physical position of the first voxel (Image Position (Patient) of the
    /// first sorted slice).
    pub origin: PhysicalPoint,
    /// Direction cosine matrix; columns are the physical directions of the
    /// x (column), y (row) and z (slice) grid axes.
    pub direction: Matrix3<f64>,
    index_from_physical: Option<Matrix3<f64>>,
}

impl Volume {
    pub fn new(
        data: Array3<u16>,
        spacing: (f64, f64, f64),
        origin: PhysicalPoint,
        direction: Matrix3<f64>,
    ) -> Self {
        let scaled_axes =
            direction * Matrix3::from_diagonal(&Vector3::new(spacing.0, spacing.1, spacing.2));
        Self {
            data,
            spacing,
            origin,
            direction,
            index_from_physical: scaled_axes.try_inverse(),
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Voxel-grid dimensions in `(width, height, depth)` order.
    pub fn shape(&self) -> VolumeShape {
        let (depth, height, width) = self.data.dim();
        VolumeShape {
            width,
            height,
            depth,
        }
    }

    /// Maps a physical-space point to continuous voxel-index coordinates.
    ///
    /// Returns `None` when the point cannot be mapped: the input is
    /// non-finite, the direction matrix is singular, or the result is
    /// non-finite. Stray out-of-range points are common in annotation data,
    /// so callers are expected to drop the point and continue with the rest
    /// of the contour.
    pub fn physical_to_continuous_index(&self, point: PhysicalPoint) -> Option<GridPoint> {
        if !point.coords.iter().all(|c| c.is_finite()) {
            return None;
        }
        let index_from_physical = self.index_from_physical?;
        let index = index_from_physical * (point - self.origin);
        index
            .iter()
            .all(|c| c.is_finite())
            .then(|| GridPoint::from(index))
    }
}
