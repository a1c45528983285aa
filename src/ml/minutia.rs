use serde::{Deserialize, Serialize};

/// A detected ridge feature. Coordinates are pixels in the enhanced image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinutiaPoint {
    pub x: f32,
    pub y: f32,
    pub angle: Option<f32>,
    pub class: Option<u8>,
    pub score: Option<f32>,
}

impl MinutiaPoint {
    pub fn at(x: f32, y: f32) -> Self {
        Self { x, y, angle: None, class: None, score: None }
    }

    /// Rounded integer pixel position, or `None` when a coordinate is not a
    /// usable number.
    pub fn pixel(&self) -> Option<(i32, i32)> {
        let limit = i32::MAX as f32;
        if !self.x.is_finite() || !self.y.is_finite() {
            return None;
        }
        let (x, y) = (self.x.round(), self.y.round());
        if x.abs() >= limit || y.abs() >= limit {
            return None;
        }
        Some((x as i32, y as i32))
    }
}

/// Result of one inference pass. `count == 0` is a valid outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub points: Vec<MinutiaPoint>,
    pub count: usize,
}

impl Extraction {
    pub fn from_points(points: Vec<MinutiaPoint>) -> Self {
        let count = points.len();
        Self { points, count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_rounds() {
        assert_eq!(MinutiaPoint::at(10.4, 3.6).pixel(), Some((10, 4)));
        assert_eq!(MinutiaPoint::at(-0.6, 0.0).pixel(), Some((-1, 0)));
    }

    #[test]
    fn test_pixel_rejects_non_numeric() {
        assert_eq!(MinutiaPoint::at(f32::NAN, 1.0).pixel(), None);
        assert_eq!(MinutiaPoint::at(1.0, f32::INFINITY).pixel(), None);
        assert_eq!(MinutiaPoint::at(1.0e12, 1.0).pixel(), None);
    }
}
