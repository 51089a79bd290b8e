//! A software version of the fixed-function quad tessellator with integer spacing.
//!
//! The unit square domain is split into an interior grid of `inner[0]` × `inner[1]` cells and a
//! ring of triangles stitching the interior to the four outer edges, each of which is divided
//! into exactly its outer level of segments. All triangles are counter-clockwise in the
//! (u, v) plane.

use super::PatchFactors;
use bevy::prelude::*;
use itertools::iproduct;

/// The domain points and triangles of one tessellated patch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TessellatedPatch {
    /// Domain coordinates in `[0, 1]²`.
    pub points: Vec<Vec2>,
    /// Triangle list indices into `points`.
    pub indices: Vec<u32>,
}

/// A point on a tessellation row, together with its parameter along that row.
type RowPoint = (u32, f32);

impl TessellatedPatch {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn push_point(&mut self, point: Vec2) -> u32 {
        self.points.push(point);
        self.points.len() as u32 - 1
    }

    fn push_triangle(&mut self, a: u32, b: u32, c: u32, flip: bool) {
        if flip {
            self.indices.extend([a, c, b]);
        } else {
            self.indices.extend([a, b, c]);
        }
    }

    /// Splits the edge from corner `start` to corner `end` into `level` segments.
    fn outer_edge(
        &mut self,
        start: u32,
        end: u32,
        level: u32,
        position: impl Fn(f32) -> Vec2,
    ) -> Vec<RowPoint> {
        let level = level.max(1);

        let mut row = Vec::with_capacity(level as usize + 1);
        row.push((start, 0.0));
        row.extend((1..level).map(|k| {
            let t = k as f32 / level as f32;
            (self.push_point(position(t)), t)
        }));
        row.push((end, 1.0));
        row
    }

    /// Triangulates the strip between an outer edge and the parallel row of the interior.
    ///
    /// Both rows are walked by increasing parameter, always advancing the row whose next point
    /// comes first. The strip is closed at both ends by the diagonals from the corners.
    fn stitch(&mut self, outer: &[RowPoint], inner: &[RowPoint], flip: bool) {
        let (mut a, mut b) = (0, 0);

        while a + 1 < outer.len() || b + 1 < inner.len() {
            let advance_outer = if a + 1 == outer.len() {
                false
            } else if b + 1 == inner.len() {
                true
            } else {
                outer[a + 1].1 <= inner[b + 1].1
            };

            if advance_outer {
                self.push_triangle(outer[a].0, outer[a + 1].0, inner[b].0, flip);
                a += 1;
            } else {
                self.push_triangle(outer[a].0, inner[b + 1].0, inner[b].0, flip);
                b += 1;
            }
        }
    }
}

/// Tessellates the unit quad domain according to `factors`.
pub fn tessellate(factors: &PatchFactors) -> TessellatedPatch {
    let mut patch = TessellatedPatch::default();

    let bottom_left = patch.push_point(Vec2::new(0.0, 0.0));
    let bottom_right = patch.push_point(Vec2::new(1.0, 0.0));
    let top_left = patch.push_point(Vec2::new(0.0, 1.0));
    let top_right = patch.push_point(Vec2::new(1.0, 1.0));

    let [left_level, bottom_level, right_level, top_level] = factors.outer;

    let left = patch.outer_edge(bottom_left, top_left, left_level, |t| Vec2::new(0.0, t));
    let bottom = patch.outer_edge(bottom_left, bottom_right, bottom_level, |t| Vec2::new(t, 0.0));
    let right = patch.outer_edge(bottom_right, top_right, right_level, |t| Vec2::new(1.0, t));
    let top = patch.outer_edge(top_left, top_right, top_level, |t| Vec2::new(t, 1.0));

    let [columns, rows] = factors.inner;

    if columns < 2 || rows < 2 {
        // No interior grid, every edge is fanned to the patch center.
        let center = [(patch.push_point(Vec2::splat(0.5)), 0.5)];

        patch.stitch(&bottom, &center, false);
        patch.stitch(&right, &center, false);
        patch.stitch(&top, &center, true);
        patch.stitch(&left, &center, true);

        return patch;
    }

    let first = patch.points.len() as u32;
    let interior = |i: u32, j: u32| first + (j - 1) * (columns - 1) + (i - 1);

    for (j, i) in iproduct!(1..rows, 1..columns) {
        patch.push_point(Vec2::new(
            i as f32 / columns as f32,
            j as f32 / rows as f32,
        ));
    }

    for (j, i) in iproduct!(1..rows - 1, 1..columns - 1) {
        let (a, b) = (interior(i, j), interior(i + 1, j));
        let (c, d) = (interior(i, j + 1), interior(i + 1, j + 1));

        patch.push_triangle(a, b, d, false);
        patch.push_triangle(a, d, c, false);
    }

    let row = |j: u32| -> Vec<RowPoint> {
        (1..columns)
            .map(|i| (interior(i, j), i as f32 / columns as f32))
            .collect()
    };
    let column = |i: u32| -> Vec<RowPoint> {
        (1..rows)
            .map(|j| (interior(i, j), j as f32 / rows as f32))
            .collect()
    };

    patch.stitch(&bottom, &row(1), false);
    patch.stitch(&right, &column(columns - 1), false);
    patch.stitch(&top, &row(rows - 1), true);
    patch.stitch(&left, &column(1), true);

    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_area(patch: &TessellatedPatch, triangle: &[u32]) -> f32 {
        let [a, b, c] = [0, 1, 2].map(|k| patch.points[triangle[k] as usize]);
        (b - a).perp_dot(c - a) / 2.0
    }

    fn assert_covers_unit_square(patch: &TessellatedPatch) {
        let mut total = 0.0;

        for triangle in patch.indices.chunks_exact(3) {
            let area = signed_area(patch, triangle);
            assert!(area > 0.0, "triangle {triangle:?} is degenerate or clockwise");
            total += area;
        }

        assert!((total - 1.0).abs() < 1e-4, "triangles cover an area of {total}");
        assert!(patch
            .points
            .iter()
            .all(|point| point.cmpge(Vec2::ZERO).all() && point.cmple(Vec2::ONE).all()));
    }

    fn points_on_edge(patch: &TessellatedPatch, on_edge: impl Fn(Vec2) -> bool) -> usize {
        patch.points.iter().filter(|&&point| on_edge(point)).count()
    }

    #[test]
    fn uniform_levels_form_a_regular_grid() {
        for level in 2..=64 {
            let patch = tessellate(&PatchFactors::uniform(level));

            assert_eq!(patch.points.len(), ((level + 1) * (level + 1)) as usize);
            assert_eq!(patch.triangle_count(), (2 * level * level) as usize);
            assert_covers_unit_square(&patch);
        }
    }

    #[test]
    fn level_one_fans_to_the_center() {
        let patch = tessellate(&PatchFactors::uniform(1));

        assert_eq!(patch.points.len(), 5);
        assert_eq!(patch.triangle_count(), 4);
        assert_covers_unit_square(&patch);
    }

    #[test]
    fn edges_are_split_by_their_own_level() {
        for outer in [[3, 5, 1, 8], [64, 8, 8, 64], [1, 1, 2, 1], [17, 2, 33, 9]] {
            let patch = tessellate(&PatchFactors::from_outer(outer));

            assert_eq!(points_on_edge(&patch, |p| p.x == 0.0), outer[0] as usize + 1);
            assert_eq!(points_on_edge(&patch, |p| p.y == 0.0), outer[1] as usize + 1);
            assert_eq!(points_on_edge(&patch, |p| p.x == 1.0), outer[2] as usize + 1);
            assert_eq!(points_on_edge(&patch, |p| p.y == 1.0), outer[3] as usize + 1);
            assert_covers_unit_square(&patch);
        }
    }

    #[test]
    fn edge_points_are_evenly_spaced() {
        let patch = tessellate(&PatchFactors::from_outer([4, 4, 4, 7]));

        let mut top = patch
            .points
            .iter()
            .filter(|point| point.y == 1.0)
            .map(|point| point.x)
            .collect::<Vec<_>>();
        top.sort_by(f32::total_cmp);

        for (k, x) in top.into_iter().enumerate() {
            assert!((x - k as f32 / 7.0).abs() < 1e-6);
        }
    }
}
