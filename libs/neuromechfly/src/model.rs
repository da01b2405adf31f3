//! Assembly of the fly model and instantiation of the engine.
//!
//! Building happens in two phases. Structural edits (eye cameras, actuator
//! gains, contact pairs, sensors, spawn placement) are made on the scene
//! graph. The engine is then instantiated and receives the numeric
//! overrides: friction, joint stiffness and damping, gravity, tarsus
//! compliance and finally the initial pose. [`ModelBuilder::build`] is the
//! only way to obtain an engine, so the order cannot be broken.

use fly_physics::mjcf::euler_xyz;
use fly_physics::{Camera, CameraMode, ContactPair, PhysicsEngine, Scene};
use log::{debug, info};
use nalgebra::Vector3;

use crate::arena::Arena;
use crate::config::{ControlMode, EnvConfig, SimulationParameters};
use crate::contact;
use crate::error::{NmfError, Result};
use crate::pose::InitialPose;
use crate::presets;
use crate::sensors::{SensorNetwork, THORAX};
use crate::template;
use crate::vision::{EYE_CAMERAS, EYE_ORIENTATIONS, EYE_POSITIONS, FOVY_PER_EYE};

/// The assembled scene and the bookkeeping the environment needs to drive
/// it. Immutable once built.
#[derive(Clone, Debug)]
pub struct BodyModel {
    scene: Scene,
    control: ControlMode,
    actuated_joints: Vec<String>,
    /// Scene index of the selected actuator of each actuated joint.
    actuators: Vec<usize>,
    sensors: SensorNetwork,
    self_contacts: Vec<ContactPair>,
    floor_contacts: Vec<ContactPair>,
    vision: bool,
}

impl BodyModel {
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn control(&self) -> ControlMode {
        self.control
    }

    pub fn actuated_joints(&self) -> &[String] {
        &self.actuated_joints
    }

    pub fn actuators(&self) -> &[usize] {
        &self.actuators
    }

    pub fn sensors(&self) -> &SensorNetwork {
        &self.sensors
    }

    pub fn self_contacts(&self) -> &[ContactPair] {
        &self.self_contacts
    }

    pub fn floor_contacts(&self) -> &[ContactPair] {
        &self.floor_contacts
    }

    pub fn has_vision(&self) -> bool {
        self.vision
    }

    pub fn has_olfaction(&self) -> bool {
        self.sensors.has_antennae()
    }
}

pub struct ModelBuilder<'a> {
    config: &'a EnvConfig,
    arena: &'a dyn Arena,
    body: Scene,
}

impl<'a> ModelBuilder<'a> {
    /// Builder over the built-in fly body.
    pub fn new(config: &'a EnvConfig, arena: &'a dyn Arena) -> Result<Self> {
        Ok(Self::with_body(config, arena, template::load()?))
    }

    /// Builder over a custom body description, e.g. one loaded with
    /// [`fly_physics::MjcfLoader`].
    pub fn with_body(config: &'a EnvConfig, arena: &'a dyn Arena, body: Scene) -> Self {
        Self { config, arena, body }
    }

    /// Run both phases and hand back the model with its engine.
    pub fn build<E: PhysicsEngine>(self) -> Result<(BodyModel, E)> {
        let model = self.assemble()?;
        let mut engine = E::instantiate(&model.scene)?;
        apply_overrides(&model, &mut engine, &self.config.sim_params)?;
        engine.reset()?;
        apply_init_pose(&model, &mut engine, &self.config.init_pose)?;
        info!(
            "Built fly model: {} actuated joints in {} mode, {} self and {} floor contact pairs, {} sensor values",
            model.actuated_joints.len(),
            model.control.as_str(),
            model.self_contacts.len(),
            model.floor_contacts.len(),
            model.sensors.dim()
        );
        Ok((model, engine))
    }

    fn assemble(&self) -> Result<BodyModel> {
        let config = self.config;
        let params = &config.sim_params;
        let control = config.control_mode()?;
        let mut body = self.body.clone();

        if params.enable_vision {
            add_eyes(&mut body)?;
        }

        for joint in &config.actuated_joints {
            let name = control.actuator_name(joint);
            let index = body.actuator_index(&name).ok_or_else(|| {
                NmfError::config(format!("no {} actuator '{name}' for joint '{joint}'", control.as_str()))
            })?;
            if control != ControlMode::Torque {
                body.actuators_mut()[index].set_gain(params.actuator_kp);
            }
        }

        let floor_geoms = config.floor_collisions.resolve(&body)?;
        let self_geoms = config.self_collisions.resolve(&body)?;

        let mut scene = self.arena.scene()?;
        let floor_contacts =
            contact::floor_contacts(&mut scene, &body, &floor_geoms, params.friction, self.arena.friction())?;
        let self_contacts = contact::self_contacts(&body, &self_geoms)?;

        let frame = self.arena.spawn_frame(config.spawn_pos, config.spawn_orient);
        scene.attach(body, frame)?;
        scene.name = "neuromechfly".to_string();
        for pair in self_contacts.iter().chain(&floor_contacts) {
            scene.add_contact_pair(pair.clone())?;
        }

        let sensors = SensorNetwork::declare(
            &mut scene,
            &config.actuated_joints,
            &config.contact_sensor_placements,
            params.enable_olfaction,
        )?;

        scene.option.timestep = params.timestep;
        scene.option.gravity = Vector3::from(params.gravity);

        let actuators = config
            .actuated_joints
            .iter()
            .map(|joint| {
                let name = control.actuator_name(joint);
                scene
                    .actuator_index(&name)
                    .ok_or_else(|| NmfError::config(format!("actuator '{name}' lost while attaching the body")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BodyModel {
            scene,
            control,
            actuated_joints: config.actuated_joints.clone(),
            actuators,
            sensors,
            self_contacts,
            floor_contacts,
            vision: params.enable_vision,
        })
    }
}

fn add_eyes(body: &mut Scene) -> Result<()> {
    let thorax = body
        .find_body(THORAX)
        .ok_or_else(|| NmfError::config(format!("body '{THORAX}' not found on the body model")))?;
    for ((name, pos), euler) in EYE_CAMERAS.iter().zip(EYE_POSITIONS).zip(EYE_ORIENTATIONS) {
        body.add_camera(Camera {
            name: name.to_string(),
            body: thorax,
            pos: Vector3::from(pos),
            quat: euler_xyz(euler[0], euler[1], euler[2]),
            fovy: FOVY_PER_EYE,
            mode: CameraMode::Fixed,
        })?;
    }
    Ok(())
}

fn apply_overrides<E: PhysicsEngine>(model: &BodyModel, engine: &mut E, params: &SimulationParameters) -> Result<()> {
    let collision_geoms: Vec<&str> = model
        .scene
        .geoms()
        .iter()
        .filter_map(|g| g.name.as_deref())
        .filter(|name| name.contains("collision"))
        .collect();
    for geom in &collision_geoms {
        engine.set_geom_friction(geom, params.friction)?;
    }
    for joint in &model.actuated_joints {
        engine.set_joint_stiffness(joint, params.joint_stiffness)?;
        engine.set_joint_damping(joint, params.joint_damping)?;
    }
    engine.set_gravity(Vector3::from(params.gravity));

    for joint in presets::compliant_tarsus_joints() {
        if model.scene.find_joint(&joint).is_none() {
            return Err(NmfError::config(format!("tarsus joint '{joint}' not found on the body model")));
        }
        engine.set_joint_stiffness(&joint, params.tarsus_stiffness)?;
        engine.set_joint_damping(&joint, params.tarsus_damping)?;
    }
    debug!(
        "Applied friction to {} geometries and stiffness to {} joints",
        collision_geoms.len(),
        model.actuated_joints.len()
    );
    Ok(())
}

/// Set the pose angle of every actuated joint named in `pose`. Other pose
/// entries are ignored.
pub fn apply_init_pose<E: PhysicsEngine>(model: &BodyModel, engine: &mut E, pose: &InitialPose) -> Result<()> {
    let mut applied = 0;
    for joint in &model.actuated_joints {
        if let Some(angle) = pose.get(joint) {
            engine.set_joint_position(joint, angle)?;
            applied += 1;
        }
    }
    debug!("Initial pose set {applied} of {} joints", pose.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{BlocksTerrain, FlatTerrain};
    use crate::config::CollisionSpec;
    use fly_physics::ActuatorKind;

    fn small_config() -> EnvConfig {
        EnvConfig {
            actuated_joints: vec!["joint_LFCoxa".into(), "joint_LFFemur".into()],
            contact_sensor_placements: vec!["LFTarsus5".into()],
            floor_collisions: "tarsi".into(),
            self_collisions: "none".into(),
            ..Default::default()
        }
    }

    fn assemble(config: &EnvConfig) -> Result<BodyModel> {
        let arena = FlatTerrain::default();
        ModelBuilder::new(config, &arena)?.assemble()
    }

    #[test]
    fn test_selected_actuators_get_gain() {
        let model = assemble(&small_config()).unwrap();
        let scene = model.scene();
        let index = scene.actuator_index("actuator_position_joint_LFCoxa").unwrap();
        assert_eq!(model.actuators()[0], index);
        assert_eq!(scene.actuators()[index].kind, ActuatorKind::Position { kp: 18.0 });
        // Unselected joints and modes keep the template gain.
        let other = scene.actuator_index("actuator_position_joint_RFCoxa").unwrap();
        assert_eq!(scene.actuators()[other].kind, ActuatorKind::Position { kp: 0.0 });
        let velocity = scene.actuator_index("actuator_velocity_joint_LFCoxa").unwrap();
        assert_eq!(scene.actuators()[velocity].kind, ActuatorKind::Velocity { kv: 0.0 });
    }

    #[test]
    fn test_torque_mode_keeps_gear() {
        let config = EnvConfig { control: "torque".into(), ..small_config() };
        let model = assemble(&config).unwrap();
        let index = model.actuators()[1];
        assert_eq!(model.scene().actuators()[index].name, "actuator_torque_joint_LFFemur");
        assert_eq!(model.scene().actuators()[index].kind, ActuatorKind::Motor { gear: 1.0 });
    }

    #[test]
    fn test_unknown_joint_and_mode_fail() {
        let config = EnvConfig { actuated_joints: vec!["joint_LFWing".into()], ..small_config() };
        assert!(matches!(assemble(&config), Err(NmfError::Configuration(_))));
        let config = EnvConfig { control: "impedance".into(), ..small_config() };
        assert!(matches!(assemble(&config), Err(NmfError::Configuration(_))));
    }

    #[test]
    fn test_floor_pairs_registered_on_scene() {
        let model = assemble(&small_config()).unwrap();
        assert_eq!(model.floor_contacts().len(), 30);
        assert!(model.self_contacts().is_empty());
        assert_eq!(model.scene().contact_pairs().len(), 30);
        let pair = &model.scene().contact_pairs()[0];
        assert_eq!(pair.geom2, "ground");
        assert_eq!(pair.friction, Some([1.0, 1.0, 0.005, 0.0001, 0.0001]));
    }

    #[test]
    fn test_blocks_are_named_before_pairing() {
        let config = EnvConfig {
            floor_collisions: CollisionSpec::Geoms(vec!["LFTarsus5_collision".into()]),
            ..small_config()
        };
        let arena = BlocksTerrain { x_range: (0.0, 2.0), y_range: (0.0, 1.0), block_size: 1.0, ..Default::default() };
        let model = ModelBuilder::new(&config, &arena).unwrap().assemble().unwrap();
        let names: Vec<&str> = model.floor_contacts().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["groundblock_0_LFTarsus5_collision", "groundblock_1_LFTarsus5_collision"]);
        assert!(model.scene().geom_index("groundblock_1").is_some());
    }

    #[test]
    fn test_spawn_and_eyes() {
        let mut config = small_config();
        config.sim_params.enable_vision = true;
        config.spawn_pos = [1.0, 2.0, 0.5];
        config.spawn_orient = [0.0, 0.0, 1.0, 0.0];
        let model = assemble(&config).unwrap();
        let scene = model.scene();
        let thorax = scene.find_body("Thorax").unwrap();
        assert_eq!(scene.body(thorax).pos, Vector3::new(1.0, 2.0, 0.5));
        assert!(scene.body(thorax).free);
        let eye = &scene.cameras()[scene.camera_index("camera_REye").unwrap()];
        assert_eq!(eye.body, thorax);
        assert_eq!(eye.fovy, 150.0);
        assert!(model.has_vision());
        assert_eq!(scene.option.timestep, 1e-4);
    }
}
