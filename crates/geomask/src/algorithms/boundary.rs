//! Pixel-edge boundary tracing.
//!
//! Every side of a foreground pixel that faces background becomes a directed
//! unit edge between pixel corners, oriented so the foreground lies on the
//! right (clockwise on screen). Linking the edges yields closed rings whose
//! enclosed area is exactly the pixel count. Where two foreground pixels
//! touch only at a corner the walk turns left, so diagonal neighbours end up
//! on the same ring, matching 8-connected labelling.

use std::collections::BTreeMap;

use geo_types::Coord;
use image::GrayImage;

use crate::error::{MaskError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Right,
    Down,
    Left,
    Up,
}

impl Step {
    fn delta(self) -> (i64, i64) {
        match self {
            Step::Right => (1, 0),
            Step::Down => (0, 1),
            Step::Left => (-1, 0),
            Step::Up => (0, -1),
        }
    }

    /// Turning order tried at each corner: left, straight, right (screen coordinates)
    fn preferences(self) -> [Step; 3] {
        match self {
            Step::Right => [Step::Up, Step::Right, Step::Down],
            Step::Down => [Step::Right, Step::Down, Step::Left],
            Step::Left => [Step::Down, Step::Left, Step::Up],
            Step::Up => [Step::Left, Step::Up, Step::Right],
        }
    }
}

/// Corner position as `(row, col)` so that map order is row-major
type Corner = (i64, i64);

#[derive(Debug, Clone)]
struct Edge {
    step: Step,
    used: bool,
}

/// Boundary rings of one connected mask, in raster pixel-corner coordinates.
/// Rings are open (the first vertex is not repeated).
#[derive(Debug, Clone, PartialEq)]
pub struct PixelRings {
    pub exterior: Vec<Coord<f64>>,
    pub holes: Vec<Vec<Coord<f64>>>,
}

/// Twice the signed area of an open ring; positive for exterior rings traced here
pub fn signed_area2(ring: &[Coord<f64>]) -> f64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum()
}

fn collect_edges(mask: &GrayImage) -> BTreeMap<Corner, Vec<Edge>> {
    let (width, height) = (mask.width() as i64, mask.height() as i64);
    let is_set = |x: i64, y: i64| {
        x >= 0 && y >= 0 && x < width && y < height && mask.get_pixel(x as u32, y as u32).0[0] != 0
    };

    let mut edges: BTreeMap<Corner, Vec<Edge>> = BTreeMap::new();
    let mut push = |corner: Corner, step: Step| {
        edges
            .entry(corner)
            .or_default()
            .push(Edge { step, used: false });
    };
    for y in 0..height {
        for x in 0..width {
            if !is_set(x, y) {
                continue;
            }
            if !is_set(x, y - 1) {
                push((y, x), Step::Right);
            }
            if !is_set(x + 1, y) {
                push((y, x + 1), Step::Down);
            }
            if !is_set(x, y + 1) {
                push((y + 1, x + 1), Step::Left);
            }
            if !is_set(x - 1, y) {
                push((y + 1, x), Step::Up);
            }
        }
    }
    edges
}

fn take_edge(edges: &mut BTreeMap<Corner, Vec<Edge>>, corner: Corner, step: Step) -> bool {
    edges
        .get_mut(&corner)
        .and_then(|out| out.iter_mut().find(|e| e.step == step && !e.used))
        .map(|edge| edge.used = true)
        .is_some()
}

fn has_edge(edges: &BTreeMap<Corner, Vec<Edge>>, corner: Corner, step: Step) -> bool {
    edges
        .get(&corner)
        .is_some_and(|out| out.iter().any(|e| e.step == step))
}

/// First unused edge at or after `from`; corners before it are already exhausted
fn next_unused(edges: &BTreeMap<Corner, Vec<Edge>>, from: Corner) -> Option<(Corner, Step)> {
    edges.range(from..).find_map(|(corner, out)| {
        out.iter()
            .find(|edge| !edge.used)
            .map(|edge| (*corner, edge.step))
    })
}

/// Trace every boundary ring of `mask`; `origin` is the raster position of the mask's top-left pixel
pub fn trace_rings(mask: &GrayImage, origin: (u32, u32)) -> Result<Vec<Vec<Coord<f64>>>> {
    let mut edges = collect_edges(mask);
    let mut rings = Vec::new();
    let mut cursor: Corner = (i64::MIN, i64::MIN);

    while let Some((start, first_step)) = next_unused(&edges, cursor) {
        cursor = start;
        take_edge(&mut edges, start, first_step);
        let mut ring = vec![start];
        let mut step = first_step;
        let (dy, dx) = (step.delta().1, step.delta().0);
        let mut corner = (start.0 + dy, start.1 + dx);

        loop {
            let chosen = step
                .preferences()
                .into_iter()
                .find(|&candidate| has_edge(&edges, corner, candidate))
                .ok_or(MaskError::DegenerateGeometry {
                    label: 0,
                    distinct_vertices: ring.len(),
                })?;
            if !take_edge(&mut edges, corner, chosen) {
                // the preferred edge is the one this ring started from
                break;
            }
            ring.push(corner);
            step = chosen;
            let (dx, dy) = step.delta();
            corner = (corner.0 + dy, corner.1 + dx);
        }

        rings.push(
            ring.into_iter()
                .map(|(row, col)| Coord {
                    x: (col + origin.0 as i64) as f64,
                    y: (row + origin.1 as i64) as f64,
                })
                .collect(),
        );
    }
    Ok(rings)
}

/// Trace a single connected mask into one exterior ring plus hole rings
pub fn trace_boundaries(mask: &GrayImage, origin: (u32, u32)) -> Result<PixelRings> {
    let mut exteriors = Vec::new();
    let mut holes = Vec::new();
    for ring in trace_rings(mask, origin)? {
        if signed_area2(&ring) > 0.0 {
            exteriors.push(ring);
        } else {
            holes.push(ring);
        }
    }

    // a single 8-connected component has exactly one outer ring; keep the largest otherwise
    exteriors.sort_by(|a, b| signed_area2(b).total_cmp(&signed_area2(a)));
    let mut exteriors = exteriors.into_iter();
    let exterior = exteriors
        .next()
        .ok_or_else(|| MaskError::DegenerateGeometry {
            label: 0,
            distinct_vertices: 0,
        })?;
    let extra = exteriors.count();
    if extra > 0 {
        tracing::warn!(extra, "mask has more than one outer ring, keeping the largest");
    }
    Ok(PixelRings { exterior, holes })
}
