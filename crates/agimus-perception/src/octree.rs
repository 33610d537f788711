//! Occupancy octree.
//!
//! [`OcTree`] partitions space into cubic voxels of edge `resolution` and
//! marks every voxel that contains at least one point as occupied.  Voxels
//! live at the leaves of a recursive octree whose root cube is the smallest
//! power-of-two block of voxels covering the cloud; whenever the eight
//! children of a node are all occupied they are pruned into their parent, so
//! dense regions are represented by a few large cubes.
//!
//! The tree is the collision geometry attached to the robot by the capture
//! service and the source of the boxes drawn in the viewer.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Aabb`]   | An axis-aligned bounding box.                           |
//! | [`OcTree`] | Occupancy tree; build from points, query for collisions. |
//!
//! # Example
//!
//! ```rust
//! use agimus_perception::octree::{Aabb, OcTree};
//! use agimus_perception::transform::Vec3;
//! use ndarray::array;
//!
//! let points = array![[0.01, 0.01, 0.01], [0.52, 0.0, 0.0]];
//! let tree = OcTree::from_points(&points, 0.1).unwrap();
//!
//! assert_eq!(tree.len(), 2);
//! assert!(tree.is_occupied(Vec3::new(0.05, 0.05, 0.05)));
//!
//! let probe = Aabb::new(Vec3::new(0.4, -0.1, -0.1), Vec3::new(0.6, 0.1, 0.1));
//! assert!(tree.query_aabb(&probe));
//! ```

use agimus_types::AgimusError;
use ndarray::{Array2, Axis};
use tracing::debug;

use crate::transform::Vec3;

/// Deepest tree supported (2^16 voxels per axis).
pub const MAX_DEPTH: u32 = 16;

/// Largest voxel index magnitude accepted per axis.
const MAX_KEY: f64 = (1u64 << 62) as f64;

/// Occupancy value reported for occupied leaves by [`OcTree::to_boxes`].
pub const OCCUPIED_PROBABILITY: f64 = 1.0;

/// Occupancy threshold reported by [`OcTree::to_boxes`].
pub const OCCUPANCY_THRESHOLD: f64 = 0.5;

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Cube of edge `size` whose minimum corner is `min`.
    pub fn cube(min: Vec3, size: f64) -> Self {
        Self {
            min,
            max: Vec3::new(min.x + size, min.y + size, min.z + size),
        }
    }

    /// Return the centre point of the box.
    pub fn centre(&self) -> Vec3 {
        Vec3::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
            (self.min.z + self.max.z) * 0.5,
        )
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// True when `other` overlaps (intersects or touches) this box.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OcTree
// ────────────────────────────────────────────────────────────────────────────

/// Occupancy octree built from a point matrix at a fixed resolution.
#[derive(Debug, Clone)]
pub struct OcTree {
    resolution: f64,
    /// Minimum corner of the root cube.
    origin: Vec3,
    /// Number of levels between the root and the voxel leaves.
    depth: u32,
    root: OcNode,
}

impl OcTree {
    /// Build a tree from an `N × 3` point matrix.
    ///
    /// Non-finite points (the invalid returns of organized clouds) are
    /// skipped.
    ///
    /// # Errors
    ///
    /// [`AgimusError::InvalidArgument`] when `resolution` is not strictly
    /// positive and finite, when the matrix does not have three columns, when
    /// a point lies too far from the origin to be indexed, or when the cloud
    /// spans more than 2^[`MAX_DEPTH`] voxels along an axis.
    pub fn from_points(points: &Array2<f64>, resolution: f64) -> Result<Self, AgimusError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(AgimusError::InvalidArgument(format!(
                "octree resolution must be strictly positive, got {resolution}"
            )));
        }
        if points.ncols() != 3 {
            return Err(AgimusError::InvalidArgument(format!(
                "expected an N x 3 point matrix, got {} columns",
                points.ncols()
            )));
        }

        let mut keys = Vec::with_capacity(points.nrows());
        let mut skipped = 0usize;
        for p in points.axis_iter(Axis(0)) {
            if !(p[0].is_finite() && p[1].is_finite() && p[2].is_finite()) {
                skipped += 1;
                continue;
            }
            let mut key = [0i64; 3];
            for (slot, v) in key.iter_mut().zip(p.iter()) {
                let scaled = (v / resolution).floor();
                if scaled.abs() >= MAX_KEY {
                    return Err(AgimusError::InvalidArgument(format!(
                        "point coordinate {v} is out of range at resolution {resolution}"
                    )));
                }
                *slot = scaled as i64;
            }
            keys.push(key);
        }
        if skipped > 0 {
            debug!(skipped, "skipped non-finite points");
        }

        let mut tree = Self {
            resolution,
            origin: Vec3::zero(),
            depth: 0,
            root: OcNode::default(),
        };
        let Some(first) = keys.first().copied() else {
            return Ok(tree);
        };

        let (mut lo, mut hi) = (first, first);
        for k in &keys {
            for axis in 0..3 {
                lo[axis] = lo[axis].min(k[axis]);
                hi[axis] = hi[axis].max(k[axis]);
            }
        }
        let span = (0..3)
            .map(|a| i128::from(hi[a]) - i128::from(lo[a]) + 1)
            .max()
            .unwrap_or(1);
        if span > 1i128 << MAX_DEPTH {
            return Err(AgimusError::InvalidArgument(format!(
                "point cloud spans {span} voxels at resolution {resolution}; at most {} supported",
                1u64 << MAX_DEPTH
            )));
        }
        let depth = (span as u64).next_power_of_two().trailing_zeros();

        tree.depth = depth;
        tree.origin = Vec3::new(
            lo[0] as f64 * resolution,
            lo[1] as f64 * resolution,
            lo[2] as f64 * resolution,
        );
        for k in keys {
            let rel = [
                (k[0] - lo[0]) as u64,
                (k[1] - lo[1]) as u64,
                (k[2] - lo[2]) as u64,
            ];
            tree.root.insert(rel, depth);
        }
        tree.root.prune();
        debug!(
            resolution,
            depth,
            leaves = tree.len(),
            "octree built"
        );
        Ok(tree)
    }

    /// Edge length of the smallest voxel.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Number of levels between the root and the voxel leaves.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of occupied leaves (pruned blocks count once).
    pub fn len(&self) -> usize {
        self.root.count_occupied()
    }

    /// True when no voxel is occupied.
    pub fn is_empty(&self) -> bool {
        !self.root.any_occupied()
    }

    /// Root cube, or `None` for an empty tree.
    pub fn bounds(&self) -> Option<Aabb> {
        (!self.is_empty()).then(|| Aabb::cube(self.origin, self.root_size()))
    }

    /// True when `p` lies in an occupied voxel.
    pub fn is_occupied(&self, p: Vec3) -> bool {
        let probe = Aabb::new(p, p);
        self.query_aabb(&probe)
    }

    /// True when any occupied voxel overlaps `region`.
    ///
    /// Used for collision detection: pass a swept volume or any query box to
    /// check whether an obstacle occupies that space.
    pub fn query_aabb(&self, region: &Aabb) -> bool {
        self.root
            .query_aabb(Aabb::cube(self.origin, self.root_size()), region)
    }

    /// Occupied leaves as `[cx, cy, cz, size, occupancy, threshold]`.
    pub fn to_boxes(&self) -> Vec<[f64; 6]> {
        let mut boxes = Vec::new();
        self.root
            .collect_boxes(Aabb::cube(self.origin, self.root_size()), &mut boxes);
        boxes
    }

    fn root_size(&self) -> f64 {
        self.resolution * (1u64 << self.depth) as f64
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OcNode – internal implementation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct OcNode {
    /// Set on occupied leaves only.
    occupied: bool,
    /// Eight children; `None` while this node is a leaf.  Octant `i` has
    /// bit 0 = upper x half, bit 1 = upper y half, bit 2 = upper z half.
    children: Option<Box<[OcNode; 8]>>,
}

impl OcNode {
    /// Mark the voxel at `key` (relative to this node) occupied; `level` is
    /// the number of levels left below this node.
    fn insert(&mut self, key: [u64; 3], level: u32) {
        if level == 0 {
            self.occupied = true;
            return;
        }
        let bit = level - 1;
        let octant = ((key[0] >> bit) & 1) | (((key[1] >> bit) & 1) << 1) | (((key[2] >> bit) & 1) << 2);
        let children = self.children.get_or_insert_with(Default::default);
        children[octant as usize].insert(key, bit);
    }

    /// Collapse every node whose eight children are occupied leaves.
    fn prune(&mut self) {
        let Some(children) = self.children.as_mut() else {
            return;
        };
        for child in children.iter_mut() {
            child.prune();
        }
        if children.iter().all(|c| c.occupied && c.children.is_none()) {
            self.children = None;
            self.occupied = true;
        }
    }

    fn count_occupied(&self) -> usize {
        match &self.children {
            None => usize::from(self.occupied),
            Some(children) => children.iter().map(|c| c.count_occupied()).sum(),
        }
    }

    fn any_occupied(&self) -> bool {
        match &self.children {
            None => self.occupied,
            Some(children) => children.iter().any(|c| c.any_occupied()),
        }
    }

    fn query_aabb(&self, bounds: Aabb, region: &Aabb) -> bool {
        if !bounds.overlaps(region) {
            return false;
        }
        match &self.children {
            None => self.occupied,
            Some(children) => children
                .iter()
                .enumerate()
                .any(|(i, c)| c.query_aabb(octant_bounds(&bounds, i), region)),
        }
    }

    fn collect_boxes(&self, bounds: Aabb, out: &mut Vec<[f64; 6]>) {
        match &self.children {
            None if self.occupied => {
                let c = bounds.centre();
                out.push([
                    c.x,
                    c.y,
                    c.z,
                    bounds.max.x - bounds.min.x,
                    OCCUPIED_PROBABILITY,
                    OCCUPANCY_THRESHOLD,
                ]);
            }
            None => {}
            Some(children) => {
                for (i, child) in children.iter().enumerate() {
                    child.collect_boxes(octant_bounds(&bounds, i), out);
                }
            }
        }
    }
}

fn octant_bounds(parent: &Aabb, octant: usize) -> Aabb {
    let half = (parent.max.x - parent.min.x) * 0.5;
    let offset = |bit: usize| if octant & bit != 0 { half } else { 0.0 };
    Aabb::cube(
        Vec3::new(
            parent.min.x + offset(1),
            parent.min.y + offset(2),
            parent.min.z + offset(4),
        ),
        half,
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // ── Aabb ────────────────────────────────────────────────────────────────

    #[test]
    fn aabb_contains_boundary_point() {
        let b = Aabb::new(Vec3::zero(), Vec3::new(1.0, 1.0, 1.0));
        assert!(b.contains_point(Vec3::zero()));
        assert!(b.contains_point(Vec3::new(1.0, 1.0, 1.0)));
        assert!(!b.contains_point(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn aabb_overlap() {
        let a = Aabb::new(Vec3::zero(), Vec3::new(1.0, 1.0, 1.0));
        let touching = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let apart = Aabb::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(3.0, 1.0, 1.0));
        assert!(a.overlaps(&touching));
        assert!(!a.overlaps(&apart));
    }

    #[test]
    fn aabb_normalises_min_max() {
        let b = Aabb::new(Vec3::new(2.0, 2.0, 2.0), Vec3::zero());
        assert_eq!(b.min, Vec3::zero());
        assert_eq!(b.max, Vec3::new(2.0, 2.0, 2.0));
    }

    // ── OcTree – construction ────────────────────────────────────────────────

    #[test]
    fn rejects_non_positive_resolution() {
        let points = array![[0.0, 0.0, 0.0]];
        for r in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            assert!(OcTree::from_points(&points, r).is_err(), "resolution {r}");
        }
    }

    #[test]
    fn rejects_wrong_column_count() {
        let points = Array2::<f64>::zeros((4, 2));
        assert!(OcTree::from_points(&points, 0.1).is_err());
    }

    #[test]
    fn empty_cloud_gives_empty_tree() {
        let tree = OcTree::from_points(&Array2::zeros((0, 3)), 0.05).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert!(tree.bounds().is_none());
        assert!(tree.to_boxes().is_empty());
    }

    #[test]
    fn points_in_the_same_voxel_share_a_leaf() {
        let points = array![[0.01, 0.02, 0.03], [0.04, 0.05, 0.06], [0.09, 0.0, 0.0]];
        let tree = OcTree::from_points(&points, 0.1).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.depth(), 0);
        let boxes = tree.to_boxes();
        assert_abs_diff_eq!(boxes[0][0], 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(boxes[0][3], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_points_are_skipped() {
        let points = array![[f64::NAN, 0.0, 0.0], [0.5, 0.5, 0.5], [0.0, f64::INFINITY, 0.0]];
        let tree = OcTree::from_points(&points, 0.1).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn full_block_is_pruned_into_parent() {
        let mut rows = Vec::new();
        for ix in 0..2 {
            for iy in 0..2 {
                for iz in 0..2 {
                    rows.extend([
                        ix as f64 * 0.1 + 0.05,
                        iy as f64 * 0.1 + 0.05,
                        iz as f64 * 0.1 + 0.05,
                    ]);
                }
            }
        }
        let points = Array2::from_shape_vec((8, 3), rows).unwrap();
        let tree = OcTree::from_points(&points, 0.1).unwrap();
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.len(), 1);
        let b = tree.to_boxes()[0];
        assert_abs_diff_eq!(b[3], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(b[0], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn partial_block_is_not_pruned() {
        let points = array![[0.05, 0.05, 0.05], [0.15, 0.15, 0.15]];
        let tree = OcTree::from_points(&points, 0.1).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.to_boxes().len(), 2);
    }

    #[test]
    fn negative_coordinates_are_covered() {
        let points = array![[-1.05, -0.35, 2.03], [0.25, 0.35, 2.05]];
        let tree = OcTree::from_points(&points, 0.1).unwrap();
        assert_eq!(tree.len(), 2);
        assert!(tree.is_occupied(Vec3::new(-1.04, -0.34, 2.04)));
        assert!(tree.is_occupied(Vec3::new(0.26, 0.36, 2.04)));
        assert!(!tree.is_occupied(Vec3::new(-0.55, 0.05, 2.05)));
        let bounds = tree.bounds().unwrap();
        assert!(bounds.contains_point(Vec3::new(-1.05, -0.35, 2.03)));
    }

    #[test]
    fn boxes_match_occupied_voxels() {
        let points = array![[0.05, 0.05, 0.05], [0.75, 0.05, 0.05]];
        let tree = OcTree::from_points(&points, 0.1).unwrap();
        let mut centres: Vec<f64> = tree.to_boxes().iter().map(|b| b[0]).collect();
        centres.sort_by(|a, b| a.total_cmp(b));
        assert_abs_diff_eq!(centres[0], 0.05, epsilon = 1e-9);
        assert_abs_diff_eq!(centres[1], 0.75, epsilon = 1e-9);
        for b in tree.to_boxes() {
            assert_abs_diff_eq!(b[3], 0.1, epsilon = 1e-12);
            assert_eq!(b[4], OCCUPIED_PROBABILITY);
            assert_eq!(b[5], OCCUPANCY_THRESHOLD);
        }
    }

    // ── OcTree – collision query ─────────────────────────────────────────────

    #[test]
    fn query_aabb_path_clear_scenario() {
        let points = array![[5.0, 0.0, 0.0]];
        let tree = OcTree::from_points(&points, 0.1).unwrap();

        let clear_path = Aabb::new(Vec3::new(0.0, -0.5, -0.5), Vec3::new(4.0, 0.5, 0.5));
        assert!(!tree.query_aabb(&clear_path), "path should be clear");

        let blocked_path = Aabb::new(Vec3::new(0.0, -0.5, -0.5), Vec3::new(6.0, 0.5, 0.5));
        assert!(tree.query_aabb(&blocked_path), "path should be blocked");
    }

    #[test]
    fn rejects_cloud_too_wide_for_resolution() {
        let points = array![[0.0, 0.0, 0.0], [1.0e4, 0.0, 0.0]];
        assert!(OcTree::from_points(&points, 0.01).is_err());
    }

    #[test]
    fn rejects_far_away_garbage_returns() {
        let points = array![[1e20, 0.0, 0.0], [-1e20, 0.0, 0.0]];
        assert!(matches!(
            OcTree::from_points(&points, 0.05),
            Err(AgimusError::InvalidArgument(_))
        ));

        let saturated = array![[f64::MAX, f64::MAX, f64::MAX], [f64::MIN, 0.0, 0.0]];
        assert!(OcTree::from_points(&saturated, 1e-3).is_err());
    }

    #[test]
    fn rejects_a_single_point_beyond_the_key_range() {
        let err = OcTree::from_points(&array![[1e20, 0.0, 0.0]], 0.05).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }
}
