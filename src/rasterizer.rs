use crate::volume::{GridPoint, VolumeShape};

use nalgebra::{Point3, Vector3};
use ndarray::{Array3, Zip};
use parry3d_f64::transformation::try_convex_hull;
use thiserror::Error;

/// Separation below which points are considered affinely dependent.
const DEGENERACY_EPS: f64 = 1.0e-9;

#[derive(Debug, Error)]
pub enum RasterizeError {
    /// The mapped points do not span 3D space: fewer than four points, or
    /// every point is coincident, collinear, or coplanar. Surfaced as a
    /// named error instead of an all-zero mask, which would hide upstream
    /// annotation problems.
    #[error("Degenerate contour geometry: {reason}")]
    DegenerateGeometry { reason: String },
}

impl RasterizeError {
    fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateGeometry {
            reason: reason.into(),
        }
    }
}

/// Rasterizes the convex hull of `points` onto a voxel grid of `shape`.
///
/// The points are expected in continuous voxel-index space and are pooled
/// into a single hull regardless of which contour they came from. The output
/// has dim `(width, height, depth)` and `mask[[x, y, z]] == 1` exactly when
/// the voxel center `(x, y, z)` lies inside the hull; a center on a hull
/// facet counts as inside.
pub fn rasterize(
    points: &[GridPoint],
    shape: VolumeShape,
) -> Result<Array3<u8>, RasterizeError> {
    let hull = HullMembership::build(points)?;

    let mut mask = Array3::<u8>::zeros((shape.width, shape.height, shape.depth));
    Zip::indexed(&mut mask).par_for_each(|(x, y, z), voxel| {
        if hull.contains(&Point3::new(x as f64, y as f64, z as f64)) {
            *voxel = 1;
        }
    });

    Ok(mask)
}

struct FacetPlane {
    /// Outward unit normal.
    normal: Vector3<f64>,
    /// Signed offset of the facet plane: `normal . p == offset` on the facet.
    offset: f64,
}

/// Point-in-convex-hull membership test.
///
/// The hull interior is the intersection of the half-spaces bounded by its
/// facet planes, so membership is an all-planes signed-distance test. Unlike
/// walking a simplex decomposition this has no seams between neighboring
/// simplices, which keeps boundary voxels from being dropped.
struct HullMembership {
    planes: Vec<FacetPlane>,
    mins: Point3<f64>,
    maxs: Point3<f64>,
    tolerance: f64,
}

impl HullMembership {
    fn build(points: &[GridPoint]) -> Result<Self, RasterizeError> {
        ensure_spans_3d(points)?;

        let (vertices, facets) = try_convex_hull(points)
            .map_err(|error| RasterizeError::degenerate(error.to_string()))?;
        if vertices.is_empty() || facets.is_empty() {
            return Err(RasterizeError::degenerate("empty convex hull"));
        }

        let interior = vertices
            .iter()
            .fold(Vector3::zeros(), |sum, vertex| sum + vertex.coords)
            / vertices.len() as f64;

        let planes = facets
            .iter()
            .filter_map(|&[a, b, c]| {
                let (a, b, c) = (
                    vertices[a as usize],
                    vertices[b as usize],
                    vertices[c as usize],
                );
                let mut normal = (b - a).cross(&(c - a));
                let norm = normal.norm();
                // Sliver facets constrain nothing.
                if norm < DEGENERACY_EPS {
                    return None;
                }
                normal /= norm;
                if normal.dot(&(interior - a.coords)) > 0.0 {
                    normal = -normal;
                }
                Some(FacetPlane {
                    offset: normal.dot(&a.coords),
                    normal,
                })
            })
            .collect::<Vec<_>>();
        if planes.is_empty() {
            return Err(RasterizeError::degenerate("no non-degenerate hull facets"));
        }

        let mut mins = vertices[0];
        let mut maxs = vertices[0];
        for vertex in &vertices {
            mins = mins.inf(vertex);
            maxs = maxs.sup(vertex);
        }

        let tolerance = DEGENERACY_EPS * (maxs - mins).norm().max(1.0);

        Ok(Self {
            planes,
            mins,
            maxs,
            tolerance,
        })
    }

    /// Boundary-inclusive membership test for one voxel center.
    fn contains(&self, point: &Point3<f64>) -> bool {
        for axis in 0..3 {
            if point[axis] < self.mins[axis] - self.tolerance
                || point[axis] > self.maxs[axis] + self.tolerance
            {
                return false;
            }
        }
        self.planes
            .iter()
            .all(|plane| plane.normal.dot(&point.coords) <= plane.offset + self.tolerance)
    }
}

/// Rejects point sets without four affinely independent members, the minimum
/// for a non-degenerate 3D convex hull.
fn ensure_spans_3d(points: &[GridPoint]) -> Result<(), RasterizeError> {
    if points.len() < 4 {
        return Err(RasterizeError::degenerate(format!(
            "{} point(s), at least 4 non-coplanar points required",
            points.len()
        )));
    }

    let a = points[0];
    let Some(b) = points
        .iter()
        .copied()
        .find(|p| (*p - a).norm() > DEGENERACY_EPS)
    else {
        return Err(RasterizeError::degenerate("all points are coincident"));
    };
    let ab = b - a;

    let Some(c) = points
        .iter()
        .copied()
        .find(|p| ab.cross(&(*p - a)).norm() > DEGENERACY_EPS * ab.norm())
    else {
        return Err(RasterizeError::degenerate("all points are collinear"));
    };
    let plane_normal = ab.cross(&(c - a)).normalize();

    if !points
        .iter()
        .any(|p| plane_normal.dot(&(*p - a)).abs() > DEGENERACY_EPS)
    {
        return Err(RasterizeError::degenerate("all points are coplanar"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: VolumeShape = VolumeShape {
        width: 8,
        height: 8,
        depth: 8,
    };

    fn tetrahedron() -> Vec<GridPoint> {
        vec![
            GridPoint::new(1.0, 1.0, 1.0),
            GridPoint::new(5.0, 1.0, 1.0),
            GridPoint::new(1.0, 5.0, 1.0),
            GridPoint::new(1.0, 1.0, 5.0),
        ]
    }

    fn cube_corners(lo: f64, hi: f64) -> Vec<GridPoint> {
        let mut corners = Vec::new();
        for &x in &[lo, hi] {
            for &y in &[lo, hi] {
                for &z in &[lo, hi] {
                    corners.push(GridPoint::new(x, y, z));
                }
            }
        }
        corners
    }

    #[test]
    fn mask_has_requested_shape() {
        let mask = rasterize(&tetrahedron(), SHAPE).unwrap();
        assert_eq!(mask.dim(), (8, 8, 8));

        let uneven = VolumeShape {
            width: 3,
            height: 9,
            depth: 6,
        };
        let mask = rasterize(&tetrahedron(), uneven).unwrap();
        assert_eq!(mask.dim(), (3, 9, 6));
    }

    #[test]
    fn mask_is_binary() {
        let mask = rasterize(&tetrahedron(), SHAPE).unwrap();
        assert!(mask.iter().all(|&v| v == 0 || v == 1));
        assert!(mask.iter().any(|&v| v == 1));
    }

    #[test]
    fn hull_vertices_rasterize_to_one() {
        let mask = rasterize(&tetrahedron(), SHAPE).unwrap();
        for point in tetrahedron() {
            let voxel = [point.x as usize, point.y as usize, point.z as usize];
            assert_eq!(mask[voxel], 1, "hull vertex {voxel:?} not labeled");
        }
    }

    #[test]
    fn interior_and_exterior_voxels_of_tetrahedron() {
        let mask = rasterize(&tetrahedron(), SHAPE).unwrap();
        assert_eq!(mask[[2, 2, 2]], 1);
        assert_eq!(mask[[7, 7, 7]], 0);
        assert_eq!(mask[[0, 0, 0]], 0);
        assert_eq!(mask[[5, 5, 5]], 0);
    }

    #[test]
    fn axis_aligned_cube_labels_exactly_its_voxels() {
        // Faces land exactly on voxel centers, exercising the
        // boundary-inclusive tie-break.
        let mask = rasterize(&cube_corners(1.0, 5.0), SHAPE).unwrap();
        let ones = mask.iter().filter(|&&v| v == 1).count();
        assert_eq!(ones, 5 * 5 * 5);
        assert_eq!(mask[[3, 1, 3]], 1);
        assert_eq!(mask[[5, 5, 5]], 1);
        assert_eq!(mask[[6, 3, 3]], 0);
    }

    #[test]
    fn too_few_points_are_degenerate() {
        for count in 0..4 {
            let points = tetrahedron()[..count].to_vec();
            assert!(matches!(
                rasterize(&points, SHAPE),
                Err(RasterizeError::DegenerateGeometry { .. })
            ));
        }
    }

    #[test]
    fn coincident_points_are_degenerate() {
        let points = vec![GridPoint::new(2.0, 2.0, 2.0); 6];
        assert!(matches!(
            rasterize(&points, SHAPE),
            Err(RasterizeError::DegenerateGeometry { .. })
        ));
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let points: Vec<_> = (0..6)
            .map(|i| GridPoint::new(i as f64, i as f64, i as f64))
            .collect();
        assert!(matches!(
            rasterize(&points, SHAPE),
            Err(RasterizeError::DegenerateGeometry { .. })
        ));
    }

    #[test]
    fn coplanar_points_are_degenerate() {
        let points = vec![
            GridPoint::new(1.0, 1.0, 2.0),
            GridPoint::new(5.0, 1.0, 2.0),
            GridPoint::new(5.0, 5.0, 2.0),
            GridPoint::new(1.0, 5.0, 2.0),
            GridPoint::new(3.0, 3.0, 2.0),
        ];
        assert!(matches!(
            rasterize(&points, SHAPE),
            Err(RasterizeError::DegenerateGeometry { .. })
        ));
    }

    #[test]
    fn growing_the_hull_never_shrinks_the_mask() {
        let smaller = rasterize(&tetrahedron(), SHAPE).unwrap();

        let mut grown = tetrahedron();
        grown.push(GridPoint::new(6.0, 6.0, 6.0));
        let larger = rasterize(&grown, SHAPE).unwrap();

        Zip::from(&smaller).and(&larger).for_each(|&small, &large| {
            assert!(small <= large);
        });
        assert_eq!(larger[[5, 5, 5]], 1);
    }
}
