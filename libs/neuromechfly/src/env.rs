//! The Gym-style environment loop.

use std::path::Path;
use std::sync::Arc;

use fly_physics::{PhysicsEngine, RapierEngine, Scene};
use image::RgbImage;
use log::{info, warn};
use nalgebra::{DMatrix, DVector, Matrix4x3};
use serde_json::Value;

use crate::arena::{Arena, FlatTerrain};
use crate::config::{EnvConfig, RenderMode};
use crate::error::{NmfError, Result};
use crate::model::{apply_init_pose, BodyModel, ModelBuilder};
use crate::template;
use crate::video;
use crate::vision::{OmmatidiaMap, EYE_CAMERAS, NUM_CHANNELS, RAW_IMG_HEIGHT_PX, RAW_IMG_WIDTH_PX};

/// Free-form diagnostics returned next to each observation.
pub type Info = serde_json::Map<String, Value>;

/// Joint targets for the actuators of the selected control mode, in the
/// order of `actuated_joints`.
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub joints: DVector<f64>,
}

impl Action {
    pub fn new(joints: Vec<f64>) -> Self {
        Self { joints: DVector::from_vec(joints) }
    }

    pub fn zeros(n: usize) -> Self {
        Self { joints: DVector::zeros(n) }
    }
}

#[derive(Clone, Debug)]
pub struct Observation {
    /// Rows: position, velocity, torque; one column per actuated joint.
    pub joints: DMatrix<f64>,
    /// Rows: thorax position, linear velocity, Euler angles, angular
    /// velocity.
    pub fly: Matrix4x3<f64>,
    pub contact_forces: DVector<f64>,
    pub end_effectors: DVector<f64>,
    /// Odor dimensions by antennae.
    pub odor_intensity: Option<DMatrix<f64>>,
    /// Ommatidia by channels, left eye then right. Shared with the
    /// environment until the next eye update.
    pub vision: Option<Arc<[DMatrix<f64>; 2]>>,
    pub raw_vision: Option<Arc<[RgbImage; 2]>>,
}

/// Shapes of the observation channels present in this environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservationSpace {
    pub joints: (usize, usize),
    pub fly: (usize, usize),
    pub contact_forces: usize,
    pub end_effectors: usize,
    pub odor_intensity: Option<(usize, usize)>,
    /// Eyes, ommatidia, channels.
    pub vision: Option<(usize, usize, usize)>,
    /// Eyes, height, width, colour channels.
    pub raw_vision: Option<(usize, u32, u32, usize)>,
}

/// Per-joint bounds on the action.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionSpace {
    pub low: DVector<f64>,
    pub high: DVector<f64>,
}

impl ActionSpace {
    pub fn dim(&self) -> usize {
        self.low.len()
    }

    pub fn contains(&self, action: &Action) -> bool {
        action.joints.len() == self.dim()
            && action
                .joints
                .iter()
                .zip(self.low.iter().zip(self.high.iter()))
                .all(|(&a, (&lo, &hi))| lo <= a && a <= hi)
    }
}

/// Reward, termination and diagnostics of a task. Every method defaults to
/// the task-free value.
pub trait TaskPolicy {
    fn reward(&mut self, _observation: &Observation) -> f64 {
        0.0
    }

    fn terminated(&mut self, _observation: &Observation) -> bool {
        false
    }

    fn truncated(&mut self, _observation: &Observation) -> bool {
        false
    }

    fn info(&mut self, _observation: &Observation) -> Info {
        Info::new()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoTask;

impl TaskPolicy for NoTask {}

/// Mutable run state. Cleared by `reset`.
#[derive(Clone, Debug)]
pub struct EnvironmentState {
    pub curr_time: f64,
    pub last_render_time: f64,
    pub last_vision_update_time: f64,
    pub frames: Vec<RgbImage>,
    pub vision: Option<Arc<[DMatrix<f64>; 2]>>,
    pub raw_vision: Option<Arc<[RgbImage; 2]>>,
    pub vision_update_mask: Vec<bool>,
}

impl Default for EnvironmentState {
    fn default() -> Self {
        Self {
            curr_time: 0.0,
            last_render_time: f64::NEG_INFINITY,
            last_vision_update_time: f64::NEG_INFINITY,
            frames: Vec::new(),
            vision: None,
            raw_vision: None,
            vision_update_mask: Vec::new(),
        }
    }
}

pub type StepResult = (Observation, f64, bool, bool, Info);

/// A NeuroMechFly run: the fly model in an arena, driven one physics step
/// at a time.
pub struct NeuroMechFly<E: PhysicsEngine = RapierEngine> {
    config: EnvConfig,
    model: BodyModel,
    engine: E,
    arena: Box<dyn Arena>,
    task: Box<dyn TaskPolicy>,
    retina: Option<OmmatidiaMap>,
    state: EnvironmentState,
}

impl NeuroMechFly<RapierEngine> {
    /// The built-in fly on flat terrain.
    pub fn new(config: EnvConfig) -> Result<Self> {
        Self::with_arena(config, Box::new(FlatTerrain::default()))
    }
}

impl<E: PhysicsEngine> NeuroMechFly<E> {
    pub fn with_arena(config: EnvConfig, arena: Box<dyn Arena>) -> Result<Self> {
        Self::with_body(config, arena, template::load()?)
    }

    pub fn with_body(config: EnvConfig, arena: Box<dyn Arena>, body: Scene) -> Result<Self> {
        config.sim_params.validate()?;
        if let Some(dir) = &config.output_dir {
            std::fs::create_dir_all(dir)?;
        }
        let (model, engine) = ModelBuilder::with_body(&config, arena.as_ref(), body).build::<E>()?;
        let retina = model.has_vision().then(OmmatidiaMap::default);
        info!(
            "NeuroMechFly ready: timestep {}s, render mode {}, vision {}, olfaction {}",
            engine.timestep(),
            config.sim_params.render_mode,
            model.has_vision(),
            model.has_olfaction()
        );
        let mut env = Self {
            config,
            model,
            engine,
            arena,
            task: Box::new(NoTask),
            retina,
            state: EnvironmentState::default(),
        };
        env.reset()?;
        Ok(env)
    }

    pub fn with_task(mut self, task: impl TaskPolicy + 'static) -> Self {
        self.task = Box::new(task);
        self
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn model(&self) -> &BodyModel {
        &self.model
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn arena(&self) -> &dyn Arena {
        self.arena.as_ref()
    }

    pub fn state(&self) -> &EnvironmentState {
        &self.state
    }

    pub fn curr_time(&self) -> f64 {
        self.state.curr_time
    }

    pub fn timestep(&self) -> f64 {
        self.engine.timestep()
    }

    pub fn frames(&self) -> &[RgbImage] {
        &self.state.frames
    }

    pub fn action_space(&self) -> ActionSpace {
        let n = self.model.actuators().len();
        let bound = self.model.control().action_bound();
        ActionSpace {
            low: DVector::from_element(n, -bound),
            high: DVector::from_element(n, bound),
        }
    }

    pub fn observation_space(&self) -> ObservationSpace {
        let sensors = self.model.sensors();
        let params = &self.config.sim_params;
        let ommatidia = self.retina.as_ref().map_or(0, OmmatidiaMap::num_ommatidia);
        ObservationSpace {
            joints: (3, sensors.num_joints()),
            fly: (4, 3),
            contact_forces: sensors.num_contacts(),
            end_effectors: 18,
            odor_intensity: sensors
                .has_antennae()
                .then(|| (self.arena.odor_dimensions(), 2)),
            vision: self.model.has_vision().then_some((2, ommatidia, NUM_CHANNELS)),
            raw_vision: (self.model.has_vision() && params.render_raw_vision)
                .then_some((2, RAW_IMG_HEIGHT_PX, RAW_IMG_WIDTH_PX, 3)),
        }
    }

    /// Restore the initial physical state and pose and clear the run state.
    pub fn reset(&mut self) -> Result<(Observation, Info)> {
        self.engine.reset()?;
        apply_init_pose(&self.model, &mut self.engine, &self.config.init_pose)?;
        self.state = EnvironmentState::default();
        let observation = self.get_observation()?;
        Ok((observation, Info::new()))
    }

    /// Apply `action` to the selected actuators and advance one timestep.
    pub fn step(&mut self, action: &Action) -> Result<StepResult> {
        let expected = self.model.actuators().len();
        if action.joints.len() != expected {
            return Err(NmfError::Action { expected, got: action.joints.len() });
        }
        for (&actuator, &target) in self.model.actuators().iter().zip(action.joints.iter()) {
            self.engine.set_control(actuator, target)?;
        }
        self.engine.step()?;
        self.state.curr_time += self.engine.timestep();

        let observation = self.get_observation()?;
        let reward = self.task.reward(&observation);
        let terminated = self.task.terminated(&observation);
        let truncated = self.task.truncated(&observation);
        let info = self.task.info(&observation);
        Ok((observation, reward, terminated, truncated, info))
    }

    /// Capture a frame when one is due. Returns whether a frame was added.
    pub fn render(&mut self) -> Result<bool> {
        let params = &self.config.sim_params;
        match &params.render_mode {
            RenderMode::Headless => Ok(false),
            RenderMode::Unsupported(mode) => Err(NmfError::RenderMode(mode.clone())),
            RenderMode::Saved => {
                if self.state.curr_time < self.state.last_render_time + params.render_interval() {
                    return Ok(false);
                }
                let (width, height) = params.render_window_size;
                let frame = self.engine.render(&params.render_camera, width, height)?;
                self.state.frames.push(frame);
                self.state.last_render_time = self.state.curr_time;
                Ok(true)
            }
        }
    }

    pub fn get_observation(&mut self) -> Result<Observation> {
        let readout = self.model.sensors().read(self.engine.sensor_data())?;
        let odor_intensity = readout
            .antennae
            .as_ref()
            .map(|antennae| self.arena.odor_intensity(antennae));
        if self.model.has_vision() {
            self.update_vision()?;
        }
        Ok(Observation {
            joints: readout.joints,
            fly: readout.fly,
            contact_forces: readout.contact_forces,
            end_effectors: readout.end_effectors,
            odor_intensity,
            vision: self.state.vision.clone(),
            raw_vision: self.state.raw_vision.clone(),
        })
    }

    fn update_vision(&mut self) -> Result<()> {
        let params = &self.config.sim_params;
        let Some(retina) = &self.retina else {
            return Ok(());
        };
        if self.state.curr_time < self.state.last_vision_update_time + params.vision_interval() {
            self.state.vision_update_mask.push(false);
            return Ok(());
        }
        let [left, right] = EYE_CAMERAS;
        let raw = [
            self.engine.render(left, RAW_IMG_WIDTH_PX, RAW_IMG_HEIGHT_PX)?,
            self.engine.render(right, RAW_IMG_WIDTH_PX, RAW_IMG_HEIGHT_PX)?,
        ];
        self.state.vision = Some(Arc::new([retina.readout(&raw[0]), retina.readout(&raw[1])]));
        if params.render_raw_vision {
            self.state.raw_vision = Some(Arc::new(raw));
        }
        self.state.last_vision_update_time = self.state.curr_time;
        self.state.vision_update_mask.push(true);
        Ok(())
    }

    /// Whether each observation since the last reset carried fresh eye
    /// images. The observation made by `reset` is not included.
    pub fn vision_update_mask(&self) -> &[bool] {
        self.state.vision_update_mask.get(1..).unwrap_or(&[])
    }

    pub fn save_video(&self, path: impl AsRef<Path>) -> Result<()> {
        let params = &self.config.sim_params;
        if params.render_mode != RenderMode::Saved {
            warn!("Render mode is '{}', not 'saved'; no video will be written", params.render_mode);
            return Ok(());
        }
        video::save_gif(&self.state.frames, params.render_fps, path.as_ref())
    }

    /// Write the video to the output directory, if one is configured.
    pub fn close(&mut self) -> Result<()> {
        if self.config.sim_params.render_mode == RenderMode::Saved {
            if let Some(dir) = &self.config.output_dir {
                self.save_video(dir.join("video.gif"))?;
            }
        }
        Ok(())
    }
}
