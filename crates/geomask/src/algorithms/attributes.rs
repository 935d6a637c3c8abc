//! Shape metrics for vectorized detections.
//!
//! Areas and lengths are reported in metres: planar for projected CRSs,
//! geodesic on the WGS84 ellipsoid for geographic ones. Rectangle-based
//! metrics for geographic polygons are measured in a local equirectangular
//! projection centred on the polygon.

use std::f64::consts::PI;

use geo::{
    Area, BoundingRect, Centroid, ConvexHull, EuclideanLength, GeodesicArea, GeodesicLength,
    MapCoords, MinimumRotatedRect,
};
use geo_types::{Coord, Polygon};
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    raster::Crs,
    types::{AttributedPolygon, VectorPolygon},
};

/// Mean earth radius used by the local metric projection
const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeometricAttributes {
    pub area_m2: f64,
    pub perimeter_m: f64,
    /// Long side over short side of the minimum rotated rectangle; infinite when the short side is zero
    pub elongation: f64,
    pub mbr_major_m: f64,
    pub mbr_minor_m: f64,
    /// Direction of the long side, degrees counter-clockwise from east in `[0, 180)`
    pub orientation_deg: f64,
    /// `4 * pi * area / perimeter^2`, 1 for a circle
    pub compactness: f64,
    /// Area over convex hull area
    pub convexity: f64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    /// `[min_x, min_y, max_x, max_y]` in CRS units
    pub bbox: [f64; 4],
    pub hole_count: usize,
}

impl GeometricAttributes {
    pub fn is_degenerate_rectangle(&self) -> bool {
        !self.elongation.is_finite()
    }
}

/// Project lon/lat degrees to metres around `origin`
fn local_metric(polygon: &Polygon<f64>, origin: Coord<f64>) -> Polygon<f64> {
    let cos_lat = origin.y.to_radians().cos();
    polygon.map_coords(|c| Coord {
        x: EARTH_RADIUS_M * (c.x - origin.x).to_radians() * cos_lat,
        y: EARTH_RADIUS_M * (c.y - origin.y).to_radians(),
    })
}

struct RectangleMetrics {
    major: f64,
    minor: f64,
    orientation_deg: f64,
}

fn rectangle_metrics(polygon: &Polygon<f64>) -> RectangleMetrics {
    let Some(rect) = polygon.minimum_rotated_rect() else {
        return RectangleMetrics {
            major: 0.0,
            minor: 0.0,
            orientation_deg: 0.0,
        };
    };
    let corners = &rect.exterior().0;
    if corners.len() < 3 {
        return RectangleMetrics {
            major: 0.0,
            minor: 0.0,
            orientation_deg: 0.0,
        };
    }
    let side = |a: Coord<f64>, b: Coord<f64>| (b.x - a.x, b.y - a.y);
    let (ax, ay) = side(corners[0], corners[1]);
    let (bx, by) = side(corners[1], corners[2]);
    let (len_a, len_b) = (ax.hypot(ay), bx.hypot(by));

    // equal sides keep the first one as the major axis
    let (major, minor, (dx, dy)) = if len_a >= len_b {
        (len_a, len_b, (ax, ay))
    } else {
        (len_b, len_a, (bx, by))
    };
    let orientation_deg = dy.atan2(dx).to_degrees().rem_euclid(180.0);
    RectangleMetrics {
        major,
        minor,
        orientation_deg: if orientation_deg >= 180.0 - 1e-9 {
            0.0
        } else {
            orientation_deg
        },
    }
}

fn elongation(major: f64, minor: f64) -> f64 {
    if minor <= major.max(1.0) * 1e-12 {
        f64::INFINITY
    } else {
        major / minor
    }
}

/// Compute every metric for one polygon in `crs`
pub fn attribute(polygon: &Polygon<f64>, crs: &Crs) -> GeometricAttributes {
    let centroid = polygon
        .centroid()
        .map(|p| p.0)
        .unwrap_or(Coord { x: f64::NAN, y: f64::NAN });
    let bbox = polygon
        .bounding_rect()
        .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
        .unwrap_or([f64::NAN; 4]);

    let (area_m2, perimeter_m, metric) = if crs.is_geographic() {
        let perimeter = polygon.exterior().geodesic_length()
            + polygon
                .interiors()
                .iter()
                .map(|ring| ring.geodesic_length())
                .sum::<f64>();
        (
            polygon.geodesic_area_unsigned(),
            perimeter,
            local_metric(polygon, centroid),
        )
    } else {
        let perimeter = polygon.exterior().euclidean_length()
            + polygon
                .interiors()
                .iter()
                .map(|ring| ring.euclidean_length())
                .sum::<f64>();
        (polygon.unsigned_area(), perimeter, polygon.clone())
    };

    let rectangle = rectangle_metrics(&metric);
    let hull_area = metric.convex_hull().unsigned_area();
    let compactness = if perimeter_m > 0.0 {
        4.0 * PI * area_m2 / (perimeter_m * perimeter_m)
    } else {
        0.0
    };
    let convexity = if hull_area > 0.0 {
        metric.unsigned_area() / hull_area
    } else {
        0.0
    };

    GeometricAttributes {
        area_m2,
        perimeter_m,
        elongation: elongation(rectangle.major, rectangle.minor),
        mbr_major_m: rectangle.major,
        mbr_minor_m: rectangle.minor,
        orientation_deg: rectangle.orientation_deg,
        compactness,
        convexity,
        centroid_x: centroid.x,
        centroid_y: centroid.y,
        bbox,
        hole_count: polygon.interiors().len(),
    }
}

/// Attribute a batch of polygons in parallel, keeping their order
pub fn attribute_all(polygons: Vec<VectorPolygon>, crs: &Crs) -> Vec<AttributedPolygon> {
    polygons
        .into_par_iter()
        .map(|polygon| {
            let attributes = attribute(&polygon.geometry, crs);
            AttributedPolygon {
                polygon,
                attributes,
            }
        })
        .collect()
}

/// Descriptive statistics of `area_m2` over a polygon set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AreaSummary {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    /// Sample standard deviation, absent for fewer than two polygons
    pub std: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

impl AreaSummary {
    /// `None` for an empty input
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut sorted: Vec<f64> = values.into_iter().collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let mean = sum / count as f64;
        let std = (count > 1).then(|| {
            let squares: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
            (squares / (count - 1) as f64).sqrt()
        });
        Some(Self {
            count,
            sum,
            mean,
            std,
            min: sorted[0],
            q25: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q75: quantile(&sorted, 0.75),
            max: sorted[count - 1],
        })
    }

    pub fn from_polygons(polygons: &[AttributedPolygon]) -> Option<Self> {
        Self::from_values(polygons.iter().map(|p| p.attributes.area_m2))
    }
}
