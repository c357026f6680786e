//! BIASSEC / TRIMSEC / DATASEC calculation.
//!
//! The readout window may extend past the visible area of the sensor into the
//! prescan/overscan columns or rows. The part of the image that lies inside the visible
//! area is the image section (TRIMSEC, DATASEC); the part outside it is the bias
//! section (BIASSEC). All sections are given in binned, 1-based image coordinates.
//!
//! Only one axis may carry overscan. If the image extends past the visible area on
//! both axes, no sections are reported.

use daq_core::camera::{Binning, Window};
use daq_core::image::FitsHeader;

const BIASSEC_COMMENT: &str = "Bias overscan area [x1:x2,y1:y2] (binned)";
const TRIMSEC_COMMENT: &str = "Image area [x1:x2,y1:y2] (binned)";

/// A rectangle in binned, 1-based, inclusive image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// First column
    pub x1: i64,
    /// Last column
    pub x2: i64,
    /// First row
    pub y1: i64,
    /// Last row
    pub y2: i64,
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{},{}:{}]", self.x1, self.x2, self.y1, self.y2)
    }
}

/// Calculated sections of one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSections {
    /// Image area, also written as DATASEC
    pub trimsec: Option<Section>,
    /// Bias overscan area
    pub biassec: Option<Section>,
}

impl ImageSections {
    /// Write TRIMSEC, DATASEC and BIASSEC cards for the sections that are present.
    pub fn write_to(&self, header: &mut FitsHeader) {
        if let Some(trim) = self.trimsec {
            header.set("TRIMSEC", trim.to_string(), TRIMSEC_COMMENT);
            header.set("DATASEC", trim.to_string(), TRIMSEC_COMMENT);
        }
        if let Some(bias) = self.biassec {
            header.set("BIASSEC", bias.to_string(), BIASSEC_COMMENT);
        }
    }
}

fn floor_div(a: i64, b: i64) -> i64 {
    a.div_euclid(b)
}

fn ceil_div(a: i64, b: i64) -> i64 {
    -(-a).div_euclid(b)
}

/// Calculate the sections of an image of `naxis1 x naxis2` binned pixels, read out
/// with `window` and `binning`, on a sensor whose visible area is `full_frame`.
pub fn calculate(
    full_frame: &Window,
    window: &Window,
    binning: &Binning,
    naxis1: u32,
    naxis2: u32,
) -> ImageSections {
    let (bx, by) = (binning.x.max(1) as i64, binning.y.max(1) as i64);
    let (naxis1, naxis2) = (naxis1 as i64, naxis2 as i64);

    // image area in unbinned sensor coordinates
    let img_left = window.left as i64;
    let img_top = window.top as i64;
    let img_right = img_left + naxis1 * bx;
    let img_bottom = img_top + naxis2 * by;

    // intersection with the visible area
    let is_left = img_left.max(full_frame.left as i64);
    let is_right = img_right.min(full_frame.right());
    let is_top = img_top.max(full_frame.top as i64);
    let is_bottom = img_bottom.min(full_frame.bottom());

    let overscan_x = img_left < is_left || img_right > is_right;
    let overscan_y = img_top < is_top || img_bottom > is_bottom;
    if overscan_x && overscan_y {
        tracing::warn!(
            "BIASSEC/TRIMSEC can only be calculated with a prescan/overscan area in one direction"
        );
        return ImageSections::default();
    }

    if is_right <= is_left || is_bottom <= is_top {
        return ImageSections {
            trimsec: None,
            biassec: Some(Section {
                x1: 1,
                x2: naxis1,
                y1: 1,
                y2: naxis2,
            }),
        };
    }

    let trim = Section {
        x1: floor_div(is_left - img_left, bx) + 1,
        x2: ceil_div(is_right - img_left, bx),
        y1: floor_div(is_top - img_top, by) + 1,
        y2: ceil_div(is_bottom - img_top, by),
    };

    let bias = if img_right > is_right {
        Some(Section {
            x1: floor_div(is_right - img_left, bx) + 1,
            x2: naxis1,
            ..trim
        })
    } else if img_left < is_left {
        Some(Section {
            x1: 1,
            x2: ceil_div(is_left - img_left, bx),
            ..trim
        })
    } else if img_bottom > is_bottom {
        Some(Section {
            y1: floor_div(is_bottom - img_top, by) + 1,
            y2: naxis2,
            ..trim
        })
    } else if img_top < is_top {
        Some(Section {
            y1: 1,
            y2: ceil_div(is_top - img_top, by),
            ..trim
        })
    } else {
        None
    };

    ImageSections {
        trimsec: Some(trim),
        biassec: bias,
    }
}
