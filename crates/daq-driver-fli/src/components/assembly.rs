//! Image assembly.
//!
//! Turns a raw frame plus the telemetry sampled at readout into an [`ExposureImage`]
//! with an ordered descriptive header.

use crate::components::sections;
use daq_core::camera::{ExposureRequest, Window};
use daq_core::data::RawFrame;
use daq_core::image::{ExposureImage, FitsHeader};

/// Format of the DATE-OBS value.
pub const DATE_OBS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Everything the header needs besides the pixels.
#[derive(Debug, Clone)]
pub struct ReadoutContext {
    /// UTC start of exposure, formatted with [`DATE_OBS_FORMAT`]
    pub date_obs: String,
    /// The request the frame was exposed with
    pub request: ExposureRequest,
    /// CCD temperature sampled after readout
    pub ccd_temperature: f64,
    /// Cooler power sampled after readout
    pub cooler_power: f64,
    /// Active setpoint, `None` when cooling is off
    pub setpoint: Option<f64>,
    /// Camera name
    pub instrument: String,
    /// Visible area of the sensor
    pub full_frame: Window,
}

/// Build the final image. The frame is moved into the image unchanged.
pub fn assemble(frame: RawFrame, ctx: &ReadoutContext) -> ExposureImage {
    let mut header = FitsHeader::new();
    let req = &ctx.request;

    header.set(
        "DATE-OBS",
        ctx.date_obs.as_str(),
        "Date and time of start of exposure",
    );
    header.set("EXPTIME", req.exposure_time_secs(), "Exposure time [s]");
    header.set("DET-TEMP", ctx.ccd_temperature, "CCD temperature [C]");
    header.set("DET-COOL", ctx.cooler_power, "Cooler power [percent]");
    if let Some(setpoint) = ctx.setpoint {
        header.set("DET-TSET", setpoint, "Cooler setpoint [C]");
    }

    header.set("INSTRUME", ctx.instrument.as_str(), "Name of instrument");

    header.set("XBINNING", req.binning.x, "Binning factor used on X axis");
    header.set("DET-BIN1", req.binning.x, "Binning factor used on X axis");
    header.set("YBINNING", req.binning.y, "Binning factor used on Y axis");
    header.set("DET-BIN2", req.binning.y, "Binning factor used on Y axis");

    header.set("XORGSUBF", req.window.left, "Subframe origin on X axis");
    header.set("YORGSUBF", req.window.top, "Subframe origin on Y axis");

    if let Some(stats) = frame.stats() {
        header.set("DATAMIN", stats.min as f64, "Minimum data value");
        header.set("DATAMAX", stats.max as f64, "Maximum data value");
        header.set("DATAMEAN", stats.mean, "Mean data value");
    }

    sections::calculate(
        &ctx.full_frame,
        &req.window,
        &req.binning,
        frame.width,
        frame.height,
    )
    .write_to(&mut header);

    ExposureImage { frame, header }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::camera::Binning;
    use daq_core::image::HeaderValue;

    fn context(setpoint: Option<f64>) -> ReadoutContext {
        ReadoutContext {
            date_obs: "2024-03-01T22:10:05.123456".to_string(),
            request: ExposureRequest::new(
                1500,
                true,
                Window::new(4, 8, 6, 4),
                Binning::new(2, 2),
            ),
            ccd_temperature: -19.5,
            cooler_power: 62.0,
            setpoint,
            instrument: "MicroLine ML4240".to_string(),
            full_frame: Window::new(0, 0, 100, 100),
        }
    }

    fn frame() -> RawFrame {
        RawFrame::from_u16(3, 2, vec![5, 7, 9, 11, 13, 15]).unwrap()
    }

    #[test]
    fn header_order_and_values() {
        let image = assemble(frame(), &context(Some(-20.0)));
        let keys: Vec<_> = image.header.keys().collect();
        assert_eq!(
            keys,
            vec![
                "DATE-OBS", "EXPTIME", "DET-TEMP", "DET-COOL", "DET-TSET", "INSTRUME",
                "XBINNING", "DET-BIN1", "YBINNING", "DET-BIN2", "XORGSUBF", "YORGSUBF",
                "DATAMIN", "DATAMAX", "DATAMEAN", "TRIMSEC", "DATASEC",
            ]
        );
        let h = &image.header;
        assert_eq!(h.get("EXPTIME"), Some(&HeaderValue::Float(1.5)));
        assert_eq!(h.get("DET-TSET"), Some(&HeaderValue::Float(-20.0)));
        assert_eq!(h.get("XBINNING"), Some(&HeaderValue::Int(2)));
        assert_eq!(h.get("YORGSUBF"), Some(&HeaderValue::Int(8)));
        assert_eq!(h.get("DATAMIN"), Some(&HeaderValue::Float(5.0)));
        assert_eq!(h.get("DATAMAX"), Some(&HeaderValue::Float(15.0)));
        assert_eq!(h.get("DATAMEAN"), Some(&HeaderValue::Float(10.0)));
        assert_eq!(
            h.get("DATE-OBS").and_then(|v| v.as_str()),
            Some("2024-03-01T22:10:05.123456")
        );
        assert_eq!(
            h.card("INSTRUME").map(|c| c.comment.as_str()),
            Some("Name of instrument")
        );
    }

    #[test]
    fn setpoint_omitted_when_cooling_off() {
        let image = assemble(frame(), &context(None));
        assert!(!image.header.contains("DET-TSET"));
        assert!(image.header.contains("DET-COOL"));
    }

    #[test]
    fn frame_is_passed_through_unchanged() {
        let image = assemble(frame(), &context(None));
        assert_eq!(image.frame, frame());
    }
}
