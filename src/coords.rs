use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A point in the environment's input space, both axes in `[0, 1]`.
///
/// Only [`validate_xy`] hands these out, so anything holding one has already
/// passed the bounds check.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    x: f64,
    y: f64,
}

impl NormalizedPoint {
    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    /// Pixel position inside a `width` x `height` raster, last row/column inclusive.
    pub fn to_pixel(&self, width: u32, height: u32) -> (u32, u32) {
        let px = (self.x * f64::from(width.saturating_sub(1))) as u32;
        let py = (self.y * f64::from(height.saturating_sub(1))) as u32;
        (px, py)
    }
}

impl fmt::Display for NormalizedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.x, self.y)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidCoords {
    #[error("coordinate is not a finite number: x={x}, y={y}")]
    NotFinite { x: f64, y: f64 },
    #[error("coordinate outside [0,1]: x={x:.4}, y={y:.4}")]
    OutOfRange { x: f64, y: f64 },
}

pub fn validate_xy(x: f64, y: f64) -> Result<NormalizedPoint, InvalidCoords> {
    if !x.is_finite() || !y.is_finite() {
        return Err(InvalidCoords::NotFinite { x, y });
    }
    if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
        return Err(InvalidCoords::OutOfRange { x, y });
    }
    Ok(NormalizedPoint { x, y })
}

/// Which encoding of the model output produced the point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSource {
    PositionPair,
    PositionBox,
    PositionCorners,
    XList,
    YList,
    Scalars,
    /// Nothing usable was found and the screen center was substituted.
    Defaulted,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extraction {
    pub x: f64,
    pub y: f64,
    pub source: PointSource,
}

const CENTER: f64 = 0.5;

/// Pulls one candidate point out of a raw model mapping.
///
/// Never fails: anything unreadable falls back to the screen center and is
/// tagged [`PointSource::Defaulted`]. Range checking is left to [`validate_xy`].
pub fn extract_point(raw: &Value) -> Extraction {
    if let Some(pos) = raw.get("position").and_then(Value::as_array) {
        if let Some((x, y)) = numbers(pos).and_then(|n| pair(&n)) {
            return found(x, y, PointSource::PositionPair);
        }
        if let Some((x, y)) = numbers(pos).and_then(|n| bbox_center(&n)) {
            return found(x, y, PointSource::PositionBox);
        }
        if let Some((x, y)) = corners_center(pos) {
            return found(x, y, PointSource::PositionCorners);
        }
    }

    let x = raw.get("x");
    let y = raw.get("y");

    if let Some((px, py)) = x.and_then(list_point) {
        return found(px, py, PointSource::XList);
    }
    if let Some((px, py)) = y.and_then(list_point) {
        return found(px, py, PointSource::YList);
    }

    match (x.and_then(scalar), y.and_then(scalar)) {
        (None, None) => found(CENTER, CENTER, PointSource::Defaulted),
        (sx, sy) => found(sx.unwrap_or(CENTER), sy.unwrap_or(CENTER), PointSource::Scalars),
    }
}

fn found(x: f64, y: f64, source: PointSource) -> Extraction {
    Extraction { x, y, source }
}

fn scalar(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn numbers(items: &[Value]) -> Option<Vec<f64>> {
    items.iter().map(Value::as_f64).collect()
}

fn pair(n: &[f64]) -> Option<(f64, f64)> {
    match n {
        [x, y] => Some((*x, *y)),
        _ => None,
    }
}

fn bbox_center(n: &[f64]) -> Option<(f64, f64)> {
    match n {
        [x1, y1, x2, y2] => Some(((x1 + x2) / 2.0, (y1 + y2) / 2.0)),
        _ => None,
    }
}

fn corners_center(items: &[Value]) -> Option<(f64, f64)> {
    let [a, b] = items else { return None };
    let (x1, y1) = pair(&numbers(a.as_array()?)?)?;
    let (x2, y2) = pair(&numbers(b.as_array()?)?)?;
    Some(((x1 + x2) / 2.0, (y1 + y2) / 2.0))
}

fn list_point(v: &Value) -> Option<(f64, f64)> {
    let n = numbers(v.as_array()?)?;
    pair(&n).or_else(|| bbox_center(&n))
}
