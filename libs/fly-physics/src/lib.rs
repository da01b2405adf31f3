//! Fly body physics - scene description, MJCF loading and a Rapier engine.

pub mod engine;
pub mod error;
pub mod mjcf;
pub mod rapier;
pub mod scene;

pub use engine::PhysicsEngine;
pub use error::{PhysicsError, Result};
pub use mjcf::MjcfLoader;
pub use rapier::RapierEngine;
pub use scene::{
    Actuator, ActuatorKind, Body, BodyId, Camera, CameraMode, ContactPair, Geom, GeomShape, Joint,
    Scene, SensorDecl, SensorKind, SimOption, Site, WORLD_BODY_NAME,
};
