//! A kinematic stand-in for the physics engine.
//!
//! Position actuators move their joint straight to the target on each step
//! and the thorax rises by a fixed amount, which is enough to observe the
//! environment loop without simulating contacts.

#![allow(dead_code)]

use fly_physics::{ActuatorKind, PhysicsEngine, PhysicsError, Result, Scene, SensorKind};
use image::{Rgb, RgbImage};
use nalgebra::Vector3;

pub const THORAX_RISE_PER_STEP: f64 = 1e-3;

pub struct FakeEngine {
    scene: Scene,
    qpos: Vec<f64>,
    ctrl: Vec<f64>,
    steps: usize,
    sensordata: Vec<f64>,
    pub gravity: Vector3<f64>,
    pub stiffness: Vec<f64>,
    pub damping: Vec<f64>,
    pub friction: Vec<[f64; 3]>,
    pub renders: Vec<String>,
}

impl FakeEngine {
    pub fn joint_stiffness(&self, joint: &str) -> f64 {
        self.stiffness[self.scene.joint_index(joint).unwrap()]
    }

    pub fn joint_damping(&self, joint: &str) -> f64 {
        self.damping[self.scene.joint_index(joint).unwrap()]
    }

    pub fn geom_friction(&self, geom: &str) -> [f64; 3] {
        self.friction[self.scene.geom_index(geom).unwrap()]
    }

    fn joint(&self, name: &str) -> Result<usize> {
        self.scene.joint_index(name).ok_or_else(|| PhysicsError::unknown("joint", name))
    }

    fn refresh(&mut self) {
        for decl in self.scene.sensors() {
            let out = &mut self.sensordata[decl.range()];
            match &decl.kind {
                SensorKind::JointPos { joint } => {
                    out[0] = self.scene.joint_index(joint).map_or(0.0, |j| self.qpos[j]);
                }
                SensorKind::ActuatorFrc { actuator } => {
                    out[0] = self.scene.actuator_index(actuator).map_or(0.0, |a| self.ctrl[a]);
                }
                SensorKind::FramePos { body } if body == "Thorax" => {
                    out.copy_from_slice(&[0.0, 0.0, self.steps as f64 * THORAX_RISE_PER_STEP]);
                }
                SensorKind::FrameQuat { .. } => out.copy_from_slice(&[1.0, 0.0, 0.0, 0.0]),
                _ => out.fill(0.0),
            }
        }
    }
}

impl PhysicsEngine for FakeEngine {
    fn instantiate(scene: &Scene) -> Result<Self> {
        let mut engine = Self {
            qpos: vec![0.0; scene.joints().len()],
            ctrl: vec![0.0; scene.actuators().len()],
            steps: 0,
            sensordata: vec![0.0; scene.sensor_dim()],
            gravity: scene.option.gravity,
            stiffness: scene.joints().iter().map(|j| j.stiffness).collect(),
            damping: scene.joints().iter().map(|j| j.damping).collect(),
            friction: scene.geoms().iter().map(|g| g.friction).collect(),
            renders: Vec::new(),
            scene: scene.clone(),
        };
        engine.refresh();
        Ok(engine)
    }

    fn timestep(&self) -> f64 {
        self.scene.option.timestep
    }

    fn reset(&mut self) -> Result<()> {
        self.qpos.fill(0.0);
        self.ctrl.fill(0.0);
        self.steps = 0;
        self.refresh();
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        for (a, actuator) in self.scene.actuators().iter().enumerate() {
            if let ActuatorKind::Position { kp } = actuator.kind {
                if kp > 0.0 {
                    let j = self.scene.joint_index(&actuator.joint).unwrap_or(0);
                    self.qpos[j] = self.ctrl[a];
                }
            }
        }
        self.steps += 1;
        self.refresh();
        Ok(())
    }

    fn set_gravity(&mut self, gravity: Vector3<f64>) {
        self.gravity = gravity;
    }

    fn set_joint_stiffness(&mut self, joint: &str, stiffness: f64) -> Result<()> {
        let j = self.joint(joint)?;
        self.stiffness[j] = stiffness;
        Ok(())
    }

    fn set_joint_damping(&mut self, joint: &str, damping: f64) -> Result<()> {
        let j = self.joint(joint)?;
        self.damping[j] = damping;
        Ok(())
    }

    fn set_geom_friction(&mut self, geom: &str, friction: [f64; 3]) -> Result<()> {
        let g = self.scene.geom_index(geom).ok_or_else(|| PhysicsError::unknown("geom", geom))?;
        self.friction[g] = friction;
        Ok(())
    }

    fn set_joint_position(&mut self, joint: &str, qpos: f64) -> Result<()> {
        let j = self.joint(joint)?;
        self.qpos[j] = qpos;
        self.refresh();
        Ok(())
    }

    fn set_control(&mut self, index: usize, value: f64) -> Result<()> {
        let slot = self
            .ctrl
            .get_mut(index)
            .ok_or_else(|| PhysicsError::unknown("actuator", format!("#{index}")))?;
        *slot = value;
        Ok(())
    }

    fn sensor_data(&self) -> &[f64] {
        &self.sensordata
    }

    fn render(&mut self, camera: &str, width: u32, height: u32) -> Result<RgbImage> {
        if self.scene.camera_index(camera).is_none() {
            return Err(PhysicsError::unknown("camera", camera));
        }
        self.renders.push(camera.to_string());
        Ok(RgbImage::from_pixel(width, height, Rgb([0, 204, 51])))
    }
}
