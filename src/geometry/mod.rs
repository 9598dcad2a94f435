//! Area-of-interest geometry
//!
//! Accepts either a coordinate list or a well-known-text polygon, checks it
//! against the declared geometry type, and normalises it to a closed
//! `POLYGON((lon lat, ...))` string.

use pest::Parser;
use pest_derive::Parser;

use crate::types::{GeometryInput, GeometryType};


/// A `[lon, lat]` pair
pub type Position = [f64; 2];

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "geometry/wkt.pest"]
struct WktParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("malformed WKT: {0}")]
    Syntax(String),

    #[error("WKT ring must be closed (first and last point equal)")]
    NotClosed,

    #[error("coordinate ({lon}, {lat}) is outside longitude [-180, 180] / latitude [-90, 90]")]
    OutOfRange { lon: f64, lat: f64 },

    #[error("coordinates must be finite numbers")]
    NotFinite,

    #[error("a {kind} needs {required} distinct vertices, got {found}")]
    VertexCount {
        kind: &'static str,
        required: &'static str,
        found: usize,
    },

    #[error("rectangle edges must be axis-aligned")]
    NotAxisAligned,

    #[error("polygon encloses no area")]
    Degenerate,
}

impl From<pest::error::Error<Rule>> for GeometryError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        GeometryError::Syntax(err.to_string())
    }
}

/* ===================== Public API ===================== */

/// Parse a WKT polygon into its ring, closing point included
pub fn parse_wkt(source: &str) -> Result<Vec<Position>, GeometryError> {
    let mut pairs = WktParser::parse(Rule::geometry, source)?;

    let mut ring = Vec::new();
    let points = pairs
        .next()
        .into_iter()
        .flat_map(|geometry| geometry.into_inner())
        .filter(|pair| pair.as_rule() == Rule::polygon)
        .flat_map(|polygon| polygon.into_inner())
        .flat_map(|ring| ring.into_inner());

    for point in points {
        let mut numbers = point.into_inner();
        let lon = parse_number(numbers.next().map(|n| n.as_str()))?;
        let lat = parse_number(numbers.next().map(|n| n.as_str()))?;
        ring.push([lon, lat]);
    }

    Ok(ring)
}

/// Validate `input` as a `kind` and return its canonical WKT
pub fn normalize(kind: GeometryType, input: &GeometryInput) -> Result<String, GeometryError> {
    let ring = match input {
        GeometryInput::Coordinates(points) => points.clone(),
        GeometryInput::Wkt(source) => {
            let ring = parse_wkt(source)?;
            if ring.first() != ring.last() || ring.len() < 2 {
                return Err(GeometryError::NotClosed);
            }
            ring
        }
    };

    for &[lon, lat] in &ring {
        if !lon.is_finite() || !lat.is_finite() {
            return Err(GeometryError::NotFinite);
        }
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(GeometryError::OutOfRange { lon, lat });
        }
    }

    let vertices = open_ring(ring);
    match kind {
        GeometryType::Rectangle => check_rectangle(&vertices)?,
        GeometryType::Polygon => check_polygon(&vertices)?,
    }

    Ok(to_wkt(&vertices))
}

/// Render an open ring as a closed WKT polygon
pub fn to_wkt(vertices: &[Position]) -> String {
    let mut parts: Vec<String> = vertices
        .iter()
        .map(|[lon, lat]| format!("{} {}", lon, lat))
        .collect();
    if let Some([lon, lat]) = vertices.first() {
        parts.push(format!("{} {}", lon, lat));
    }
    format!("POLYGON(({}))", parts.join(", "))
}

/* ===================== Validation ===================== */

fn parse_number(text: Option<&str>) -> Result<f64, GeometryError> {
    let text = text.ok_or_else(|| GeometryError::Syntax("point is missing a coordinate".into()))?;
    text.parse::<f64>()
        .map_err(|e| GeometryError::Syntax(format!("invalid number {:?}: {}", text, e)))
}

/// Drop the closing point and consecutive duplicates
fn open_ring(ring: Vec<Position>) -> Vec<Position> {
    let mut vertices: Vec<Position> = Vec::with_capacity(ring.len());
    for point in ring {
        if vertices.last() != Some(&point) {
            vertices.push(point);
        }
    }
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

fn check_rectangle(vertices: &[Position]) -> Result<(), GeometryError> {
    if vertices.len() != 4 {
        return Err(GeometryError::VertexCount {
            kind: "rectangle",
            required: "exactly 4",
            found: vertices.len(),
        });
    }

    for (i, a) in vertices.iter().enumerate() {
        let b = vertices[(i + 1) % vertices.len()];
        let vertical = a[0] == b[0];
        let horizontal = a[1] == b[1];
        if vertical == horizontal {
            return Err(GeometryError::NotAxisAligned);
        }
    }

    if signed_area(vertices) == 0.0 {
        return Err(GeometryError::Degenerate);
    }
    Ok(())
}

fn check_polygon(vertices: &[Position]) -> Result<(), GeometryError> {
    if vertices.len() < 3 {
        return Err(GeometryError::VertexCount {
            kind: "polygon",
            required: "at least 3",
            found: vertices.len(),
        });
    }
    if signed_area(vertices) == 0.0 {
        return Err(GeometryError::Degenerate);
    }
    Ok(())
}

/// Shoelace formula over an open ring
fn signed_area(vertices: &[Position]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let [x1, y1] = vertices[i];
            let [x2, y2] = vertices[(i + 1) % n];
            x1 * y2 - x2 * y1
        })
        .sum::<f64>()
        / 2.0
}
