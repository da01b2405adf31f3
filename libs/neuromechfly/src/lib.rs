//! NeuroMechFly: a Gym-style environment around a physics model of the
//! adult fruit fly.
//!
//! [`NeuroMechFly`] owns an instantiated [`fly_physics::PhysicsEngine`] and
//! drives it one timestep at a time, turning joint targets into actuator
//! controls and the engine's sensor buffer into an [`Observation`].

pub mod arena;
pub mod config;
pub mod contact;
pub mod env;
pub mod error;
pub mod model;
pub mod pose;
pub mod presets;
pub mod sensors;
pub mod template;
pub mod video;
pub mod vision;

pub use arena::{Arena, BlocksTerrain, FlatTerrain, OdorArena, OdorSource};
pub use config::{CollisionSpec, ControlMode, EnvConfig, RenderMode, SimulationParameters};
pub use env::{
    Action, ActionSpace, EnvironmentState, Info, NeuroMechFly, NoTask, Observation, ObservationSpace, StepResult,
    TaskPolicy,
};
pub use error::{NmfError, Result};
pub use model::{BodyModel, ModelBuilder};
pub use pose::InitialPose;
pub use sensors::{SensorNetwork, SensorReadout};
pub use vision::OmmatidiaMap;
