//! OpenCV `VideoCapture` driver for `local_camera_cv2` inlets

use std::time::Duration;

use opencv::{
    core::{Mat, MatTraitConst, MatTraitConstManual},
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use serde_json::Value;

use super::camera::{CameraDevice, CameraDriver, DeviceError};
use crate::chunk::{ColourSpace, Raster};

/// Capture properties addressable by name from the configuration
const PROPERTIES: &[(&str, i32)] = &[
    ("CAP_PROP_FRAME_WIDTH", videoio::CAP_PROP_FRAME_WIDTH),
    ("CAP_PROP_FRAME_HEIGHT", videoio::CAP_PROP_FRAME_HEIGHT),
    ("CAP_PROP_FPS", videoio::CAP_PROP_FPS),
    ("CAP_PROP_BRIGHTNESS", videoio::CAP_PROP_BRIGHTNESS),
    ("CAP_PROP_CONTRAST", videoio::CAP_PROP_CONTRAST),
    ("CAP_PROP_SATURATION", videoio::CAP_PROP_SATURATION),
    ("CAP_PROP_HUE", videoio::CAP_PROP_HUE),
    ("CAP_PROP_GAIN", videoio::CAP_PROP_GAIN),
    ("CAP_PROP_EXPOSURE", videoio::CAP_PROP_EXPOSURE),
    ("CAP_PROP_AUTO_EXPOSURE", videoio::CAP_PROP_AUTO_EXPOSURE),
    ("CAP_PROP_AUTOFOCUS", videoio::CAP_PROP_AUTOFOCUS),
    ("CAP_PROP_FOCUS", videoio::CAP_PROP_FOCUS),
    ("CAP_PROP_WB_TEMPERATURE", videoio::CAP_PROP_WB_TEMPERATURE),
];

fn property_id(name: &str) -> Option<i32> {
    let name = name.trim_start_matches("cv2.");
    PROPERTIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
}

/// Accept `0`, `"0"` or `"/dev/video0"` style identifiers
fn device_index(device_id: &Value) -> Option<i32> {
    match device_id {
        Value::Number(n) => n.as_i64().and_then(|i| i32::try_from(i).ok()),
        Value::String(s) => s
            .parse::<i32>()
            .ok()
            .or_else(|| s.strip_prefix("/dev/video").and_then(|i| i.parse().ok())),
        _ => None,
    }
}

pub struct OpenCvDriver;

impl CameraDriver for OpenCvDriver {
    fn open(&self, device_id: &Value) -> Result<Box<dyn CameraDevice>, DeviceError> {
        let open_error = |e: String| DeviceError::Open(device_id.to_string(), e);

        let capture = match device_index(device_id) {
            Some(index) => VideoCapture::new(index, videoio::CAP_ANY),
            None => match device_id.as_str() {
                Some(uri) => VideoCapture::from_file(uri, videoio::CAP_ANY),
                None => return Err(open_error("unsupported device id".to_string())),
            },
        }
        .map_err(|e| open_error(e.to_string()))?;

        if !capture.is_opened().map_err(|e| open_error(e.to_string()))? {
            return Err(open_error("device did not open".to_string()));
        }
        Ok(Box::new(OpenCvCamera {
            capture,
            frame: Mat::default(),
        }))
    }
}

struct OpenCvCamera {
    capture: VideoCapture,
    frame: Mat,
}

impl CameraDevice for OpenCvCamera {
    fn is_connected(&self) -> bool {
        self.capture.is_opened().unwrap_or(false)
    }

    fn has_feature(&self, name: &str) -> bool {
        // VideoCapture reports 0 for properties the backend does not know
        property_id(name)
            .and_then(|id| self.capture.get(id).ok())
            .is_some_and(|v| v != 0.0)
    }

    fn get_feature(&self, name: &str) -> Option<Value> {
        let id = property_id(name)?;
        self.capture.get(id).ok().map(Value::from)
    }

    fn set_feature(&mut self, name: &str, value: &Value) -> Result<(), DeviceError> {
        let id = property_id(name).ok_or_else(|| DeviceError::UnsupportedFeature(name.to_string()))?;
        let requested = value
            .as_f64()
            .ok_or_else(|| DeviceError::UnsupportedFeature(name.to_string()))?;

        let accepted = self.capture.set(id, requested).unwrap_or(false);
        let actual = self.capture.get(id).unwrap_or(f64::NAN);
        if !accepted || actual != requested {
            return Err(DeviceError::FeatureRejected {
                feature: name.to_string(),
                requested: value.clone(),
                actual: Value::from(actual),
            });
        }
        Ok(())
    }

    fn grab_frame(&mut self, _timeout: Duration) -> Result<Raster, DeviceError> {
        // VideoCapture has no per-read timeout; the caller bounds the call
        let captured = self
            .capture
            .read(&mut self.frame)
            .map_err(|e| DeviceError::Grab(e.to_string()))?;
        if !captured || self.frame.empty() {
            return Err(DeviceError::Grab("no frame returned".to_string()));
        }

        let colour_space = match self.frame.channels() {
            1 => ColourSpace::Gray,
            3 => ColourSpace::Bgr,
            4 => ColourSpace::Bgra,
            other => return Err(DeviceError::Grab(format!("unsupported channel count {}", other))),
        };
        let pixels = self
            .frame
            .data_bytes()
            .map_err(|e| DeviceError::Grab(e.to_string()))?
            .to_vec();

        Raster::new(
            self.frame.cols() as u32,
            self.frame.rows() as u32,
            colour_space,
            pixels,
        )
        .map_err(|e| DeviceError::Grab(e.to_string()))
    }

    fn release(&mut self) {
        let _ = self.capture.release();
    }
}
