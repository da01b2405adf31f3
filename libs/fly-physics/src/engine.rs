//! The seam between the fly harness and a rigid-body physics engine.

use image::RgbImage;
use nalgebra::Vector3;

use crate::error::Result;
use crate::scene::Scene;

/// An instantiated physics model.
///
/// Implementations are built once from a [`Scene`] and then driven
/// exclusively through this handle: numeric model overrides, actuator
/// controls, stepping, sensor reads and camera renders. Values edited on
/// the scene after instantiation are not seen by the engine.
pub trait PhysicsEngine: Sized {
    fn instantiate(scene: &Scene) -> Result<Self>;

    /// Integration step in seconds.
    fn timestep(&self) -> f64;

    /// Restore the initial physical state: reference joint positions,
    /// zero velocities, zero controls. Model parameters are kept.
    fn reset(&mut self) -> Result<()>;

    /// Advance the simulation by one timestep.
    fn step(&mut self) -> Result<()>;

    // Model parameter overrides

    fn set_gravity(&mut self, gravity: Vector3<f64>);

    fn set_joint_stiffness(&mut self, joint: &str, stiffness: f64) -> Result<()>;

    fn set_joint_damping(&mut self, joint: &str, damping: f64) -> Result<()>;

    /// Sliding, torsional and rolling friction of a geometry.
    fn set_geom_friction(&mut self, geom: &str, friction: [f64; 3]) -> Result<()>;

    // State

    /// Set a hinge joint coordinate. Meant to be used right after
    /// [`PhysicsEngine::reset`]; velocities are zeroed.
    fn set_joint_position(&mut self, joint: &str, qpos: f64) -> Result<()>;

    /// Set the control input of the actuator at `index` in the scene's
    /// actuator list.
    fn set_control(&mut self, index: usize, value: f64) -> Result<()>;

    /// Flat sensor buffer laid out as declared on the scene.
    fn sensor_data(&self) -> &[f64];

    /// Render an RGB image from the named camera.
    fn render(&mut self, camera: &str, width: u32, height: u32) -> Result<RgbImage>;
}
