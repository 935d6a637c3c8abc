use geo::{Contains, Intersects, Line};
use geo_types::{Coord, LineString, Point, Polygon};
use rstar::{AABB, RTree, RTreeObject};

use crate::traits::RingSimplifier;

const COORD_EPSILON: f64 = 1e-9;

/// Douglas-Peucker simplifier using geo crate's implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct DouglasPeuckerSimplifier;

impl RingSimplifier for DouglasPeuckerSimplifier {
    fn simplify(&self, ring: &LineString<f64>, tolerance: f64) -> LineString<f64> {
        use geo::Simplify;
        ring.simplify(&tolerance)
    }

    fn name(&self) -> &'static str {
        "douglas_peucker"
    }
}

/// Topology-preserving Visvalingam-Whyatt; `tolerance` is a triangle area in squared pixels
#[derive(Debug, Clone, Copy, Default)]
pub struct VisvalingamWhyattSimplifier;

impl RingSimplifier for VisvalingamWhyattSimplifier {
    fn simplify(&self, ring: &LineString<f64>, tolerance: f64) -> LineString<f64> {
        use geo::SimplifyVwPreserve;
        ring.simplify_vw_preserve(&tolerance)
    }

    fn name(&self) -> &'static str {
        "visvalingam_whyatt"
    }
}

/// Leaves rings untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSimplifier;

impl RingSimplifier for NoSimplifier {
    fn simplify(&self, ring: &LineString<f64>, _tolerance: f64) -> LineString<f64> {
        ring.clone()
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

fn same(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() <= COORD_EPSILON && (a.y - b.y).abs() <= COORD_EPSILON
}

fn cross(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x)
}

/// Close an open ring into a `LineString`
pub fn close_ring(ring: &[Coord<f64>]) -> LineString<f64> {
    let mut coords = ring.to_vec();
    if let Some(&first) = ring.first() {
        coords.push(first);
    }
    LineString::new(coords)
}

/// Open a closed `LineString`, dropping the repeated end point
pub fn open_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords = ring.0.clone();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    coords
}

/// Drop duplicate, collinear and spike vertices from an open ring until none are left
pub fn remove_collinear(ring: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let mut points: Vec<Coord<f64>> = Vec::with_capacity(ring.len());
    for &point in ring {
        if points.last().is_none_or(|&last| !same(last, point)) {
            points.push(point);
        }
    }
    while points.len() > 1 && same(points[0], points[points.len() - 1]) {
        points.pop();
    }

    loop {
        let n = points.len();
        if n < 3 {
            return points;
        }
        let mut kept: Vec<Coord<f64>> = Vec::with_capacity(n);
        for i in 0..n {
            let prev = kept.last().copied().unwrap_or(points[n - 1]);
            let next = points[(i + 1) % n];
            let current = points[i];
            let redundant = same(prev, current)
                || same(current, next)
                || cross(prev, current, next).abs() <= COORD_EPSILON;
            if !redundant {
                kept.push(current);
            }
        }
        if kept.len() == n {
            return kept;
        }
        points = kept;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EdgeClass {
    Horizontal,
    Vertical,
    Diagonal,
}

fn classify(a: Coord<f64>, b: Coord<f64>, epsilon: f64) -> EdgeClass {
    let (dx, dy) = ((b.x - a.x).abs(), (b.y - a.y).abs());
    if dy <= epsilon && dx >= dy {
        EdgeClass::Horizontal
    } else if dx <= epsilon && dy > dx {
        EdgeClass::Vertical
    } else {
        EdgeClass::Diagonal
    }
}

/// Snap edges within `epsilon` (pixel units) of horizontal or vertical onto
/// exact axis-aligned lines.
///
/// Consecutive edges of the same class form a run whose line coordinate is the
/// length-weighted mean of its edge midpoints. Vertices are rebuilt at the
/// intersection of the neighbouring lines; a vertex next to a diagonal edge
/// only moves along the snapped axis. The result is passed through
/// [`remove_collinear`].
pub fn orthogonalize(ring: &[Coord<f64>], epsilon: f64) -> Vec<Coord<f64>> {
    let n = ring.len();
    if n < 3 || !epsilon.is_finite() || epsilon < 0.0 {
        return ring.to_vec();
    }
    let classes: Vec<EdgeClass> = (0..n)
        .map(|i| classify(ring[i], ring[(i + 1) % n], epsilon))
        .collect();
    if classes.iter().all(|&c| c == EdgeClass::Diagonal) {
        return ring.to_vec();
    }
    // start on a run boundary so no run wraps around the end
    let Some(start) = (0..n).find(|&i| classes[i] != classes[(i + n - 1) % n]) else {
        return ring.to_vec();
    };

    let mut run_of = vec![0usize; n];
    let mut lines: Vec<f64> = Vec::new();
    let mut weighted = 0.0;
    let mut length = 0.0;
    for step in 0..n {
        let i = (start + step) % n;
        if step > 0 && classes[i] != classes[(i + n - 1) % n] {
            lines.push(if length > 0.0 { weighted / length } else { 0.0 });
            weighted = 0.0;
            length = 0.0;
        }
        run_of[i] = lines.len();
        let (a, b) = (ring[i], ring[(i + 1) % n]);
        let edge_length = (b.x - a.x).hypot(b.y - a.y);
        let midpoint = match classes[i] {
            EdgeClass::Horizontal => (a.y + b.y) / 2.0,
            EdgeClass::Vertical => (a.x + b.x) / 2.0,
            EdgeClass::Diagonal => 0.0,
        };
        weighted += edge_length * midpoint;
        length += edge_length;
    }
    lines.push(if length > 0.0 { weighted / length } else { 0.0 });

    let mut snapped = Vec::with_capacity(n);
    for (i, &point) in ring.iter().enumerate() {
        let incoming = (i + n - 1) % n;
        let (before, after) = (classes[incoming], classes[i]);
        let (line_before, line_after) = (lines[run_of[incoming]], lines[run_of[i]]);
        let vertex = match (before, after) {
            (EdgeClass::Diagonal, EdgeClass::Diagonal) => point,
            (b, a) if b == a => continue,
            (EdgeClass::Horizontal, EdgeClass::Vertical) => Coord { x: line_after, y: line_before },
            (EdgeClass::Vertical, EdgeClass::Horizontal) => Coord { x: line_before, y: line_after },
            (EdgeClass::Horizontal, EdgeClass::Diagonal) => Coord { x: point.x, y: line_before },
            (EdgeClass::Diagonal, EdgeClass::Horizontal) => Coord { x: point.x, y: line_after },
            (EdgeClass::Vertical, EdgeClass::Diagonal) => Coord { x: line_before, y: point.y },
            (EdgeClass::Diagonal, EdgeClass::Vertical) => Coord { x: line_after, y: point.y },
            _ => point,
        };
        snapped.push(vertex);
    }
    remove_collinear(&snapped)
}

fn ring_lines(ring: &[Coord<f64>]) -> impl Iterator<Item = Line<f64>> + '_ {
    let n = ring.len();
    (0..n).map(move |i| Line::new(ring[i], ring[(i + 1) % n]))
}

/// Ring edge indexed by its position in the ring
struct Segment {
    index: usize,
    line: Line<f64>,
}

impl RTreeObject for Segment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        line_envelope(&self.line)
    }
}

fn line_envelope(line: &Line<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([line.start.x, line.start.y], [line.end.x, line.end.y])
}

fn segment_tree(ring: &[Coord<f64>]) -> RTree<Segment> {
    RTree::bulk_load(
        ring_lines(ring)
            .enumerate()
            .map(|(index, line)| Segment { index, line })
            .collect(),
    )
}

/// Whether an open ring has at least three vertices and no two non-adjacent edges touch
pub fn is_simple(ring: &[Coord<f64>]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let tree = segment_tree(ring);
    tree.iter().all(|segment| {
        tree.locate_in_envelope_intersecting(&segment.envelope())
            .all(|other| {
                let (i, j) = (segment.index.min(other.index), segment.index.max(other.index));
                let adjacent = j - i <= 1 || (i == 0 && j == n - 1);
                adjacent || !segment.line.intersects(&other.line)
            })
    })
}

/// Whether any edge of `a` touches any edge of `b`
pub fn rings_touch(a: &[Coord<f64>], b: &[Coord<f64>]) -> bool {
    let tree = segment_tree(b);
    ring_lines(a).any(|line| {
        tree.locate_in_envelope_intersecting(&line_envelope(&line))
            .any(|other| line.intersects(&other.line))
    })
}

/// Whether `point` lies strictly inside the open ring `ring`
pub fn ring_contains(ring: &[Coord<f64>], point: Coord<f64>) -> bool {
    ring.len() >= 3 && Polygon::new(close_ring(ring), vec![]).contains(&Point::from(point))
}

/// Whether `hole` can be cut from `exterior` next to the already accepted
/// `holes`: it lies strictly inside the exterior and is disjoint from every
/// other hole, none of the rings touching.
pub fn hole_fits(hole: &[Coord<f64>], exterior: &[Coord<f64>], holes: &[Vec<Coord<f64>>]) -> bool {
    if hole.len() < 3 || rings_touch(hole, exterior) || !ring_contains(exterior, hole[0]) {
        return false;
    }
    holes.iter().all(|other| {
        !rings_touch(hole, other)
            && !ring_contains(other, hole[0])
            && !ring_contains(hole, other[0])
    })
}

/// Collinear removal, `simplifier` at `epsilon`, then orthogonalization.
/// Each refinement step is only kept when the ring stays simple.
pub fn refine_ring(
    ring: &[Coord<f64>],
    simplifier: &dyn RingSimplifier,
    epsilon: f64,
) -> Vec<Coord<f64>> {
    let base = remove_collinear(ring);
    if base.len() < 3 || epsilon <= 0.0 {
        return base;
    }

    let simplified = remove_collinear(&open_ring(&simplifier.simplify(&close_ring(&base), epsilon)));
    let current = if is_simple(&simplified) {
        simplified
    } else {
        base
    };

    let orthogonal = orthogonalize(&current, epsilon);
    if is_simple(&orthogonal) {
        orthogonal
    } else {
        current
    }
}
