//! Frame-pixel geometry shared by detection, zoning and rendering.
//!
//! All coordinates are in full-frame pixel space unless a function says
//! otherwise. `Quad` corners are kept clockwise starting at the top-left
//! corner (image y axis points down).

use serde::{Deserialize, Serialize};

/// Two points closer than this are considered the same corner.
const DISTINCT_EPSILON_PX: f32 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Four-corner tag boundary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quad {
    points: [Point; 4],
}

impl Quad {
    /// Build a quad, reordering corners clockwise from the top-left.
    ///
    /// Coordinates are never altered, only their order.
    pub fn new(points: [Point; 4]) -> Self {
        Self {
            points: order_clockwise(points),
        }
    }

    pub fn from_xy(points: [(f32, f32); 4]) -> Self {
        Self::new(points.map(|(x, y)| Point::new(x, y)))
    }

    /// Axis-aligned square, handy for tests and synthetic candidates.
    pub fn square(x: f32, y: f32, side: f32) -> Self {
        Self::from_xy([(x, y), (x + side, y), (x + side, y + side), (x, y + side)])
    }

    pub fn points(&self) -> &[Point; 4] {
        &self.points
    }

    /// Mean of the four vertices.
    pub fn centroid(&self) -> Point {
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4.0, sy / 4.0)
    }

    /// Shoelace area (always non-negative).
    pub fn area(&self) -> f32 {
        let mut twice = 0.0f32;
        for i in 0..4 {
            let a = self.points[i];
            let b = self.points[(i + 1) % 4];
            twice += a.x * b.y - b.x * a.y;
        }
        twice.abs() / 2.0
    }

    pub fn edge_lengths(&self) -> [f32; 4] {
        let p = &self.points;
        [
            p[0].distance(&p[1]),
            p[1].distance(&p[2]),
            p[2].distance(&p[3]),
            p[3].distance(&p[0]),
        ]
    }

    pub fn longest_edge(&self) -> f32 {
        self.edge_lengths().into_iter().fold(0.0, f32::max)
    }

    /// Number of pairwise-distinct corners.
    pub fn distinct_points(&self) -> usize {
        let mut distinct: Vec<Point> = Vec::with_capacity(4);
        for p in &self.points {
            if !distinct
                .iter()
                .any(|q| q.distance(p) < DISTINCT_EPSILON_PX)
            {
                distinct.push(*p);
            }
        }
        distinct.len()
    }

    /// A quad is usable when it has at least three distinct finite corners,
    /// a longest edge above `min_edge_px` and an area above `min_area_px`.
    pub fn is_valid(&self, min_edge_px: f32, min_area_px: f32) -> bool {
        self.points.iter().all(Point::is_finite)
            && self.distinct_points() >= 3
            && self.longest_edge() > min_edge_px
            && self.area() > min_area_px
    }

    /// Map a quad found in a (cropped, rescaled) sub-image back to frame
    /// coordinates: undo the scale, then translate by the crop origin.
    pub fn to_frame(&self, origin: Point, scale_x: f32, scale_y: f32) -> Quad {
        Quad {
            points: self.points.map(|p| Point::new(p.x / scale_x + origin.x, p.y / scale_y + origin.y)),
        }
    }

    /// Inclusive axis-aligned bounds as (min_x, min_y, max_x, max_y).
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }

    pub fn contains_bounds(&self, point: &Point) -> bool {
        let (x0, y0, x1, y1) = self.bounds();
        point.x >= x0 && point.x <= x1 && point.y >= y0 && point.y <= y1
    }

    /// Spatial bucket of the centroid, used to collapse near-duplicate candidates.
    pub fn bucket_key(&self, bucket_px: f32) -> (i32, i32) {
        let c = self.centroid();
        let size = bucket_px.max(1.0);
        ((c.x / size).floor() as i32, (c.y / size).floor() as i32)
    }
}

fn order_clockwise(points: [Point; 4]) -> [Point; 4] {
    let cx = points.iter().map(|p| p.x).sum::<f32>() / 4.0;
    let cy = points.iter().map(|p| p.y).sum::<f32>() / 4.0;
    if !cx.is_finite() || !cy.is_finite() {
        return points;
    }

    // With y pointing down, ascending atan2 walks the corners clockwise on screen.
    let mut sorted = points;
    sorted.sort_by(|a, b| {
        let ta = (a.y - cy).atan2(a.x - cx);
        let tb = (b.y - cy).atan2(b.x - cx);
        ta.total_cmp(&tb)
    });

    let start = sorted
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.x + a.y).total_cmp(&(b.x + b.y)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    sorted.rotate_left(start);
    sorted
}
