//! Capability names and map output modes

use serde::{Deserialize, Serialize};

pub const EXTENDED_SERIALIZATION: &str = "ExtendedSerialization";
pub const MIRROR: &str = "Mirror";
pub const ALTERNATIVE_VIEW_POINT: &str = "AlternativeViewPoint";
pub const CROPPING: &str = "Cropping";
pub const USER_POSITION: &str = "UserPosition";
pub const SKELETON: &str = "User::Skeleton";
pub const POSE_DETECTION: &str = "User::PoseDetection";
pub const LOCK_AWARE: &str = "LockAware";
pub const ERROR_STATE: &str = "ErrorState";
pub const FRAME_SYNC: &str = "FrameSync";
pub const DEVICE_IDENTIFICATION: &str = "DeviceIdentification";
pub const BRIGHTNESS: &str = "Brightness";
pub const CONTRAST: &str = "Contrast";
pub const HUE: &str = "Hue";
pub const SATURATION: &str = "Saturation";
pub const SHARPNESS: &str = "Sharpness";
pub const GAMMA: &str = "Gamma";
pub const WHITE_BALANCE: &str = "ColorTemperature";
pub const BACKLIGHT_COMPENSATION: &str = "BacklightCompensation";
pub const GAIN: &str = "Gain";
pub const PAN: &str = "Pan";
pub const TILT: &str = "Tilt";
pub const ROLL: &str = "Roll";
pub const ZOOM: &str = "Zoom";
pub const EXPOSURE: &str = "Exposure";
pub const IRIS: &str = "Iris";
pub const FOCUS: &str = "Focus";
pub const LOW_LIGHT_COMPENSATION: &str = "LowLightCompensation";
pub const ANTI_FLICKER: &str = "AntiFlicker";
pub const HAND_TOUCHING_FOV_EDGE: &str = "Hands::HandTouchingFOVEdge";

/// Resolution and frame rate a map generator can run at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapOutputMode {
    pub x_res: u32,
    pub y_res: u32,
    pub fps: u32,
}

impl MapOutputMode {
    pub const fn new(x_res: u32, y_res: u32, fps: u32) -> Self {
        Self { x_res, y_res, fps }
    }
}

/// Map output mode constraint; `None` fields match anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MapOutputModeQuery {
    pub x_res: Option<u32>,
    pub y_res: Option<u32>,
    pub fps: Option<u32>,
}

impl MapOutputModeQuery {
    pub fn matches(&self, mode: &MapOutputMode) -> bool {
        self.x_res.map_or(true, |x| x == mode.x_res)
            && self.y_res.map_or(true, |y| y == mode.y_res)
            && self.fps.map_or(true, |f| f == mode.fps)
    }
}

impl From<MapOutputMode> for MapOutputModeQuery {
    fn from(mode: MapOutputMode) -> Self {
        Self {
            x_res: Some(mode.x_res),
            y_res: Some(mode.y_res),
            fps: Some(mode.fps),
        }
    }
}
