//! Simulation and environment configuration.
//!
//! Every record deserializes from JSON with per-field defaults, so a config
//! file only needs the values it changes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fly_physics::Scene;
use serde::{Deserialize, Serialize};

use crate::error::{NmfError, Result};
use crate::pose::InitialPose;
use crate::presets;

/// Physical and rendering parameters of a run. Lengths are in mm, so
/// gravity is `-9.81e3`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    /// Integration step in seconds.
    pub timestep: f64,
    pub joint_stiffness: f64,
    pub joint_damping: f64,
    /// Gain of the actuators selected by the control mode.
    pub actuator_kp: f64,
    /// Stiffness of the passive Tarsus2-5 joints.
    pub tarsus_stiffness: f64,
    pub tarsus_damping: f64,
    /// Sliding, torsional, rolling.
    pub friction: [f64; 3],
    pub gravity: [f64; 3],
    pub enable_olfaction: bool,
    pub enable_vision: bool,
    /// Keep the raw eye images in the observation.
    pub render_raw_vision: bool,
    pub render_mode: RenderMode,
    /// Width, height in pixels.
    pub render_window_size: (u32, u32),
    pub render_playspeed: f64,
    pub render_fps: u32,
    pub render_camera: String,
    /// Eye image refreshes per simulated second.
    pub vision_refresh_rate: f64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            timestep: 1e-4,
            joint_stiffness: 0.05,
            joint_damping: 0.06,
            actuator_kp: 18.0,
            tarsus_stiffness: 2.2,
            tarsus_damping: 0.126,
            friction: [1.0, 0.005, 0.0001],
            gravity: [0.0, 0.0, -9.81e3],
            enable_olfaction: false,
            enable_vision: false,
            render_raw_vision: false,
            render_mode: RenderMode::Saved,
            render_window_size: (640, 480),
            render_playspeed: 1.0,
            render_fps: 60,
            render_camera: "camera_left_top".to_string(),
            vision_refresh_rate: 500.0,
        }
    }
}

impl SimulationParameters {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.timestep > 0.0) {
            return Err(NmfError::config(format!("timestep must be positive, got {}", self.timestep)));
        }
        if !(self.vision_refresh_rate > 0.0) {
            return Err(NmfError::config(format!(
                "vision_refresh_rate must be positive, got {}",
                self.vision_refresh_rate
            )));
        }
        if self.render_fps == 0 {
            return Err(NmfError::config("render_fps must be positive"));
        }
        if !(self.render_playspeed > 0.0) {
            return Err(NmfError::config("render_playspeed must be positive"));
        }
        let (w, h) = self.render_window_size;
        if w == 0 || h == 0 {
            return Err(NmfError::config(format!("invalid render window size {w}x{h}")));
        }
        Ok(())
    }

    /// Simulated time between two captured frames.
    pub fn render_interval(&self) -> f64 {
        self.render_playspeed / self.render_fps as f64
    }

    pub fn vision_interval(&self) -> f64 {
        1.0 / self.vision_refresh_rate
    }
}

/// How [`crate::NeuroMechFly::render`] treats frames. Unknown mode names are
/// kept so that the error surfaces when rendering is attempted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RenderMode {
    Saved,
    Headless,
    Unsupported(String),
}

impl From<String> for RenderMode {
    fn from(mode: String) -> Self {
        match mode.as_str() {
            "saved" => RenderMode::Saved,
            "headless" => RenderMode::Headless,
            _ => RenderMode::Unsupported(mode),
        }
    }
}

impl From<&str> for RenderMode {
    fn from(mode: &str) -> Self {
        RenderMode::from(mode.to_string())
    }
}

impl From<RenderMode> for String {
    fn from(mode: RenderMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Saved => f.write_str("saved"),
            RenderMode::Headless => f.write_str("headless"),
            RenderMode::Unsupported(mode) => f.write_str(mode),
        }
    }
}

/// Which actuator family receives the action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlMode {
    Position,
    Velocity,
    Torque,
}

impl ControlMode {
    pub const ALL: [ControlMode; 3] = [ControlMode::Position, ControlMode::Velocity, ControlMode::Torque];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMode::Position => "position",
            ControlMode::Velocity => "velocity",
            ControlMode::Torque => "torque",
        }
    }

    /// Actuator driving `joint` in this mode.
    pub fn actuator_name(&self, joint: &str) -> String {
        format!("actuator_{}_{joint}", self.as_str())
    }

    /// Symmetric bound on each joint target.
    pub fn action_bound(&self) -> f64 {
        match self {
            ControlMode::Position => std::f64::consts::PI,
            ControlMode::Velocity | ControlMode::Torque => f64::INFINITY,
        }
    }
}

impl FromStr for ControlMode {
    type Err = NmfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "position" => Ok(ControlMode::Position),
            "velocity" => Ok(ControlMode::Velocity),
            "torque" => Ok(ControlMode::Torque),
            other => Err(NmfError::config(format!("unknown control mode '{other}'"))),
        }
    }
}

/// Geometries taking part in a contact enumeration: a preset name or an
/// explicit list of geometry names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CollisionSpec {
    Preset(String),
    Geoms(Vec<String>),
}

impl Default for CollisionSpec {
    fn default() -> Self {
        CollisionSpec::Preset("legs".to_string())
    }
}

impl From<&str> for CollisionSpec {
    fn from(preset: &str) -> Self {
        CollisionSpec::Preset(preset.to_string())
    }
}

impl CollisionSpec {
    /// Geometry names on the fly body model.
    pub fn resolve(&self, body: &Scene) -> Result<Vec<String>> {
        match self {
            CollisionSpec::Preset(preset) if preset == "all" => Ok(body
                .geoms()
                .iter()
                .filter_map(|g| g.name.clone())
                .filter(|name| name.contains("collision"))
                .collect()),
            CollisionSpec::Preset(preset) => presets::collision_geoms(preset),
            CollisionSpec::Geoms(geoms) => Ok(geoms.clone()),
        }
    }
}

/// Construction parameters of [`crate::NeuroMechFly`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub sim_params: SimulationParameters,
    pub actuated_joints: Vec<String>,
    /// Links that get a touch sensor on their collision geometry.
    pub contact_sensor_placements: Vec<String>,
    /// Where `close` writes the video. Nothing is persisted without it.
    pub output_dir: Option<PathBuf>,
    pub spawn_pos: [f64; 3],
    /// Axis-angle `(x, y, z, angle)`.
    pub spawn_orient: [f64; 4],
    /// `"position"`, `"velocity"` or `"torque"`.
    pub control: String,
    pub init_pose: InitialPose,
    pub floor_collisions: CollisionSpec,
    pub self_collisions: CollisionSpec,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            sim_params: SimulationParameters::default(),
            actuated_joints: presets::all_leg_dofs(),
            contact_sensor_placements: presets::all_tarsi_links(),
            output_dir: None,
            spawn_pos: [0.0, 0.0, 0.5],
            spawn_orient: [0.0, 1.0, 0.0, 0.1],
            control: "position".to_string(),
            init_pose: InitialPose::stretched(),
            floor_collisions: CollisionSpec::default(),
            self_collisions: CollisionSpec::default(),
        }
    }
}

impl EnvConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.sim_params.validate()?;
        Ok(config)
    }

    pub fn control_mode(&self) -> Result<ControlMode> {
        self.control.parse()
    }
}
