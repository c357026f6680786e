/// A single 16-bit frame read off the sensor.
///
/// Rows are stored top to bottom, `width * height` pixels in total. The dimensions are
/// the binned readout size of the window the frame was exposed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Width in binned pixels (NAXIS1)
    pub width: u32,

    /// Height in binned pixels (NAXIS2)
    pub height: u32,

    /// Row-major pixel data
    pub pixels: Vec<u16>,
}

/// Summary statistics over every pixel of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Smallest pixel value
    pub min: u16,
    /// Largest pixel value
    pub max: u16,
    /// Arithmetic mean
    pub mean: f64,
}

impl RawFrame {
    /// Create a frame from row-major pixel data.
    ///
    /// Returns `None` if the buffer length does not match `width * height`.
    pub fn from_u16(width: u32, height: u32, pixels: Vec<u16>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Pixel value at (x, y).
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// A single row.
    pub fn row(&self, y: u32) -> Option<&[u16]> {
        if y >= self.height {
            return None;
        }
        let start = (y * self.width) as usize;
        self.pixels.get(start..start + self.width as usize)
    }

    /// Calculate min, max and mean in a single pass. `None` for an empty frame.
    pub fn stats(&self) -> Option<FrameStats> {
        let first = *self.pixels.first()?;
        let (mut min, mut max, mut sum) = (first, first, 0u64);
        for &v in &self.pixels {
            min = min.min(v);
            max = max.max(v);
            sum += v as u64;
        }
        Some(FrameStats {
            min,
            max,
            mean: sum as f64 / self.pixels.len() as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(RawFrame::from_u16(2, 2, vec![0; 3]).is_none());
        assert!(RawFrame::from_u16(2, 2, vec![0; 4]).is_some());
    }

    #[test]
    fn rows_and_pixels() {
        let frame = RawFrame::from_u16(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(frame.row(1), Some(&[4, 5, 6][..]));
        assert_eq!(frame.get(2, 0), Some(3));
        assert_eq!(frame.get(3, 0), None);
        assert_eq!(frame.row(2), None);
    }

    #[test]
    fn stats_over_all_pixels() {
        let frame = RawFrame::from_u16(2, 2, vec![10, 20, 30, 40]).unwrap();
        let stats = frame.stats().unwrap();
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, 40);
        assert!((stats.mean - 25.0).abs() < f64::EPSILON);

        let empty = RawFrame::from_u16(0, 0, Vec::new()).unwrap();
        assert!(empty.stats().is_none());
    }
}
