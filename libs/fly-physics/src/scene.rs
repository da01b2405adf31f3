//! Editable scene graph handed to the physics engine for instantiation.
//!
//! A [`Scene`] mirrors the parts of an MJCF model the fly harness needs:
//! a body tree with hinge joints, geometries, sites, cameras, actuators,
//! explicit contact pairs and sensor declarations. Structural edits are
//! made here before the engine is built; numeric overrides after that go
//! through [`crate::PhysicsEngine`].

use std::collections::HashMap;
use std::ops::Range;

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use crate::error::{PhysicsError, Result};

/// Index of a body in its [`Scene`]. Body 0 is always the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub usize);

impl BodyId {
    pub const WORLD: BodyId = BodyId(0);
}

pub const WORLD_BODY_NAME: &str = "world";

#[derive(Clone, Debug)]
pub struct Body {
    pub name: String,
    pub parent: Option<BodyId>,
    pub children: Vec<BodyId>,
    /// Pose relative to the parent body frame.
    pub pos: Vector3<f64>,
    pub quat: UnitQuaternion<f64>,
    /// Body carries a free joint (floating base).
    pub free: bool,
}

impl Body {
    pub fn local_pose(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.pos), self.quat)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GeomShape {
    Sphere { radius: f64 },
    /// Capsule along the local z axis.
    Capsule { radius: f64, half_length: f64 },
    Box { half_extents: Vector3<f64> },
    /// Cylinder along the local z axis.
    Cylinder { radius: f64, half_length: f64 },
    /// Infinite plane with +z normal.
    Plane,
}

#[derive(Clone, Debug)]
pub struct Geom {
    pub name: Option<String>,
    pub body: BodyId,
    pub shape: GeomShape,
    pub pos: Vector3<f64>,
    pub quat: UnitQuaternion<f64>,
    /// Sliding, torsional, rolling.
    pub friction: [f64; 3],
    pub density: f64,
    pub rgba: [f32; 4],
}

impl Geom {
    pub fn new(body: BodyId, shape: GeomShape) -> Self {
        Self {
            name: None,
            body,
            shape,
            pos: Vector3::zeros(),
            quat: UnitQuaternion::identity(),
            friction: [1.0, 0.005, 0.0001],
            density: 1000.0,
            rgba: [0.5, 0.5, 0.5, 1.0],
        }
    }

    pub fn local_pose(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.pos), self.quat)
    }

    /// Name-based tag used by the NeuroMechFly model conventions.
    pub fn is_collision(&self) -> bool {
        self.name.as_deref().is_some_and(|n| n.contains("collision"))
    }

    pub fn is_visual(&self) -> bool {
        self.name.as_deref().is_some_and(|n| n.contains("visual"))
    }
}

/// A hinge joint. Free joints are represented by [`Body::free`].
#[derive(Clone, Debug)]
pub struct Joint {
    pub name: String,
    pub body: BodyId,
    /// Unit rotation axis in the body frame.
    pub axis: Vector3<f64>,
    /// Anchor in the body frame.
    pub pos: Vector3<f64>,
    pub stiffness: f64,
    pub damping: f64,
    pub springref: f64,
    pub range: Option<[f64; 2]>,
}

impl Joint {
    pub fn hinge(name: impl Into<String>, body: BodyId, axis: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            body,
            axis: axis.normalize(),
            pos: Vector3::zeros(),
            stiffness: 0.0,
            damping: 0.0,
            springref: 0.0,
            range: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Site {
    pub name: String,
    pub body: BodyId,
    pub pos: Vector3<f64>,
    pub quat: UnitQuaternion<f64>,
    /// Sphere radius is `size.x`.
    pub size: Vector3<f64>,
    pub group: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraMode {
    /// Rigidly attached to its body.
    Fixed,
    /// Follows the body position; keeps its initial world orientation.
    Track,
}

#[derive(Clone, Debug)]
pub struct Camera {
    pub name: String,
    pub body: BodyId,
    pub pos: Vector3<f64>,
    /// Camera looks along its local -z with +y up.
    pub quat: UnitQuaternion<f64>,
    /// Vertical field of view in degrees.
    pub fovy: f64,
    pub mode: CameraMode,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActuatorKind {
    Position { kp: f64 },
    Velocity { kv: f64 },
    Motor { gear: f64 },
}

impl ActuatorKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ActuatorKind::Position { .. } => "position",
            ActuatorKind::Velocity { .. } => "velocity",
            ActuatorKind::Motor { .. } => "motor",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Actuator {
    pub name: String,
    pub joint: String,
    pub kind: ActuatorKind,
    pub forcerange: Option<[f64; 2]>,
    pub ctrlrange: Option<[f64; 2]>,
}

impl Actuator {
    /// Overwrite the gain of the actuator whatever its kind.
    pub fn set_gain(&mut self, gain: f64) {
        match &mut self.kind {
            ActuatorKind::Position { kp } => *kp = gain,
            ActuatorKind::Velocity { kv } => *kv = gain,
            ActuatorKind::Motor { gear } => *gear = gain,
        }
    }

    pub fn clamp_ctrl(&self, ctrl: f64) -> f64 {
        match self.ctrlrange {
            Some([lo, hi]) => ctrl.clamp(lo, hi),
            None => ctrl,
        }
    }

    /// Force produced for the given control and joint state.
    pub fn force(&self, ctrl: f64, qpos: f64, qvel: f64) -> f64 {
        let ctrl = self.clamp_ctrl(ctrl);
        let force = match self.kind {
            ActuatorKind::Position { kp } => kp * (ctrl - qpos),
            ActuatorKind::Velocity { kv } => kv * (ctrl - qvel),
            ActuatorKind::Motor { gear } => gear * ctrl,
        };
        match self.forcerange {
            Some([lo, hi]) => force.clamp(lo, hi),
            None => force,
        }
    }
}

/// Explicit permission for two geometries to collide.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactPair {
    pub name: String,
    pub geom1: String,
    pub geom2: String,
    pub solref: [f64; 2],
    pub margin: f64,
    /// Per-axis friction (tangent1, tangent2, torsional, rolling1,
    /// rolling2). `None` mixes the two geometries' coefficients.
    pub friction: Option<[f64; 5]>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SensorKind {
    JointPos { joint: String },
    JointVel { joint: String },
    ActuatorFrc { actuator: String },
    FramePos { body: String },
    FrameLinVel { body: String },
    FrameQuat { body: String },
    FrameAngVel { body: String },
    Touch { site: String },
}

impl SensorKind {
    /// Number of scalars the sensor writes into the buffer.
    pub fn dim(&self) -> usize {
        match self {
            SensorKind::JointPos { .. }
            | SensorKind::JointVel { .. }
            | SensorKind::ActuatorFrc { .. }
            | SensorKind::Touch { .. } => 1,
            SensorKind::FramePos { .. }
            | SensorKind::FrameLinVel { .. }
            | SensorKind::FrameAngVel { .. } => 3,
            SensorKind::FrameQuat { .. } => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorDecl {
    pub name: String,
    pub kind: SensorKind,
    pub offset: usize,
}

impl SensorDecl {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.kind.dim()
    }
}

#[derive(Clone, Debug)]
pub struct SimOption {
    pub timestep: f64,
    pub gravity: Vector3<f64>,
}

impl Default for SimOption {
    fn default() -> Self {
        Self {
            timestep: 0.002,
            gravity: Vector3::new(0.0, 0.0, -9.81),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Scene {
    pub name: String,
    pub option: SimOption,
    bodies: Vec<Body>,
    geoms: Vec<Geom>,
    joints: Vec<Joint>,
    sites: Vec<Site>,
    cameras: Vec<Camera>,
    actuators: Vec<Actuator>,
    contact_pairs: Vec<ContactPair>,
    sensors: Vec<SensorDecl>,
    sensor_dim: usize,
    body_names: HashMap<String, usize>,
    geom_names: HashMap<String, usize>,
    joint_names: HashMap<String, usize>,
    site_names: HashMap<String, usize>,
    camera_names: HashMap<String, usize>,
    actuator_names: HashMap<String, usize>,
    pair_names: HashMap<String, usize>,
    sensor_names: HashMap<String, usize>,
}

fn register(
    names: &mut HashMap<String, usize>,
    kind: &'static str,
    name: &str,
    index: usize,
) -> Result<()> {
    if names.contains_key(name) {
        return Err(PhysicsError::DuplicateName {
            kind,
            name: name.to_string(),
        });
    }
    names.insert(name.to_string(), index);
    Ok(())
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        let world = Body {
            name: WORLD_BODY_NAME.to_string(),
            parent: None,
            children: Vec::new(),
            pos: Vector3::zeros(),
            quat: UnitQuaternion::identity(),
            free: false,
        };
        let mut body_names = HashMap::new();
        body_names.insert(WORLD_BODY_NAME.to_string(), 0);
        Self {
            name: name.into(),
            option: SimOption::default(),
            bodies: vec![world],
            geoms: Vec::new(),
            joints: Vec::new(),
            sites: Vec::new(),
            cameras: Vec::new(),
            actuators: Vec::new(),
            contact_pairs: Vec::new(),
            sensors: Vec::new(),
            sensor_dim: 0,
            body_names,
            geom_names: HashMap::new(),
            joint_names: HashMap::new(),
            site_names: HashMap::new(),
            camera_names: HashMap::new(),
            actuator_names: HashMap::new(),
            pair_names: HashMap::new(),
            sensor_names: HashMap::new(),
        }
    }

    // ---------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------

    pub fn add_body(
        &mut self,
        name: &str,
        parent: BodyId,
        pos: Vector3<f64>,
        quat: UnitQuaternion<f64>,
    ) -> Result<BodyId> {
        if parent.0 >= self.bodies.len() {
            return Err(PhysicsError::unknown("body", format!("#{}", parent.0)));
        }
        let id = BodyId(self.bodies.len());
        register(&mut self.body_names, "body", name, id.0)?;
        self.bodies.push(Body {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            pos,
            quat,
            free: false,
        });
        self.bodies[parent.0].children.push(id);
        Ok(id)
    }

    pub fn set_free(&mut self, body: BodyId, free: bool) {
        if let Some(b) = self.bodies.get_mut(body.0) {
            b.free = free && body != BodyId::WORLD;
        }
    }

    pub fn add_geom(&mut self, geom: Geom) -> Result<usize> {
        let index = self.geoms.len();
        if let Some(name) = &geom.name {
            register(&mut self.geom_names, "geom", name, index)?;
        }
        self.geoms.push(geom);
        Ok(index)
    }

    /// Give an anonymous geometry a name.
    pub fn name_geom(&mut self, index: usize, name: &str) -> Result<()> {
        let Some(geom) = self.geoms.get(index) else {
            return Err(PhysicsError::unknown("geom", format!("#{index}")));
        };
        if let Some(old) = &geom.name {
            self.geom_names.remove(old);
        }
        register(&mut self.geom_names, "geom", name, index)?;
        self.geoms[index].name = Some(name.to_string());
        Ok(())
    }

    pub fn add_joint(&mut self, joint: Joint) -> Result<usize> {
        let index = self.joints.len();
        register(&mut self.joint_names, "joint", &joint.name, index)?;
        self.joints.push(joint);
        Ok(index)
    }

    pub fn add_site(&mut self, site: Site) -> Result<usize> {
        let index = self.sites.len();
        register(&mut self.site_names, "site", &site.name, index)?;
        self.sites.push(site);
        Ok(index)
    }

    pub fn add_camera(&mut self, camera: Camera) -> Result<usize> {
        let index = self.cameras.len();
        register(&mut self.camera_names, "camera", &camera.name, index)?;
        self.cameras.push(camera);
        Ok(index)
    }

    pub fn add_actuator(&mut self, actuator: Actuator) -> Result<usize> {
        let index = self.actuators.len();
        register(&mut self.actuator_names, "actuator", &actuator.name, index)?;
        self.actuators.push(actuator);
        Ok(index)
    }

    pub fn add_contact_pair(&mut self, pair: ContactPair) -> Result<usize> {
        let index = self.contact_pairs.len();
        register(&mut self.pair_names, "contact pair", &pair.name, index)?;
        self.contact_pairs.push(pair);
        Ok(index)
    }

    /// Declare a sensor and return its slot in the flat sensor buffer.
    /// Slots are assigned in declaration order and never move.
    pub fn add_sensor(&mut self, name: &str, kind: SensorKind) -> Result<Range<usize>> {
        let index = self.sensors.len();
        register(&mut self.sensor_names, "sensor", name, index)?;
        let decl = SensorDecl {
            name: name.to_string(),
            offset: self.sensor_dim,
            kind,
        };
        let range = decl.range();
        self.sensor_dim = range.end;
        self.sensors.push(decl);
        Ok(range)
    }

    /// Merge `other` into this scene. Bodies hanging off `other`'s world
    /// are re-parented onto this scene's world at `frame`.
    pub fn attach(&mut self, other: Scene, frame: Isometry3<f64>) -> Result<()> {
        let mut remap = vec![BodyId::WORLD; other.bodies.len()];
        for (i, body) in other.bodies.iter().enumerate().skip(1) {
            let parent = body.parent.map_or(BodyId::WORLD, |p| remap[p.0]);
            let (pos, quat) = if parent == BodyId::WORLD {
                let pose = frame * body.local_pose();
                (pose.translation.vector, pose.rotation)
            } else {
                (body.pos, body.quat)
            };
            let id = self.add_body(&body.name, parent, pos, quat)?;
            self.set_free(id, body.free);
            remap[i] = id;
        }

        let place = |body: BodyId, pos: Vector3<f64>, quat: UnitQuaternion<f64>| {
            if body == BodyId::WORLD {
                let pose = frame * Isometry3::from_parts(Translation3::from(pos), quat);
                (pose.translation.vector, pose.rotation)
            } else {
                (pos, quat)
            }
        };

        for mut geom in other.geoms {
            (geom.pos, geom.quat) = place(geom.body, geom.pos, geom.quat);
            geom.body = remap[geom.body.0];
            self.add_geom(geom)?;
        }
        for mut joint in other.joints {
            joint.body = remap[joint.body.0];
            self.add_joint(joint)?;
        }
        for mut site in other.sites {
            (site.pos, site.quat) = place(site.body, site.pos, site.quat);
            site.body = remap[site.body.0];
            self.add_site(site)?;
        }
        for mut camera in other.cameras {
            (camera.pos, camera.quat) = place(camera.body, camera.pos, camera.quat);
            camera.body = remap[camera.body.0];
            self.add_camera(camera)?;
        }
        for actuator in other.actuators {
            self.add_actuator(actuator)?;
        }
        for pair in other.contact_pairs {
            self.add_contact_pair(pair)?;
        }
        for sensor in other.sensors {
            self.add_sensor(&sensor.name, sensor.kind)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn body(&self, id: BodyId) -> &Body {
        &self.bodies[id.0]
    }

    pub fn find_body(&self, name: &str) -> Option<BodyId> {
        self.body_names.get(name).map(|&i| BodyId(i))
    }

    /// Direct child bodies of `id`.
    pub fn children(&self, id: BodyId) -> impl Iterator<Item = &Body> {
        self.bodies[id.0].children.iter().map(|c| &self.bodies[c.0])
    }

    pub fn geoms(&self) -> &[Geom] {
        &self.geoms
    }

    pub fn geoms_mut(&mut self) -> &mut [Geom] {
        &mut self.geoms
    }

    pub fn geom_index(&self, name: &str) -> Option<usize> {
        self.geom_names.get(name).copied()
    }

    pub fn find_geom(&self, name: &str) -> Option<&Geom> {
        self.geom_index(name).map(|i| &self.geoms[i])
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joints_mut(&mut self) -> &mut [Joint] {
        &mut self.joints
    }

    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.joint_names.get(name).copied()
    }

    pub fn find_joint(&self, name: &str) -> Option<&Joint> {
        self.joint_index(name).map(|i| &self.joints[i])
    }

    /// Hinge joints of a body in declaration order.
    pub fn joints_of(&self, body: BodyId) -> impl Iterator<Item = (usize, &Joint)> {
        self.joints
            .iter()
            .enumerate()
            .filter(move |(_, j)| j.body == body)
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn site_index(&self, name: &str) -> Option<usize> {
        self.site_names.get(name).copied()
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    pub fn camera_index(&self, name: &str) -> Option<usize> {
        self.camera_names.get(name).copied()
    }

    pub fn actuators(&self) -> &[Actuator] {
        &self.actuators
    }

    pub fn actuators_mut(&mut self) -> &mut [Actuator] {
        &mut self.actuators
    }

    pub fn actuator_index(&self, name: &str) -> Option<usize> {
        self.actuator_names.get(name).copied()
    }

    pub fn contact_pairs(&self) -> &[ContactPair] {
        &self.contact_pairs
    }

    pub fn sensors(&self) -> &[SensorDecl] {
        &self.sensors
    }

    pub fn sensor_dim(&self) -> usize {
        self.sensor_dim
    }

    /// World pose of a body with every joint at its reference position.
    pub fn reference_pose(&self, id: BodyId) -> Isometry3<f64> {
        let mut pose = Isometry3::identity();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == BodyId::WORLD {
                break;
            }
            let body = &self.bodies[current.0];
            pose = body.local_pose() * pose;
            cursor = body.parent;
        }
        pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_link() -> Scene {
        let mut scene = Scene::new("two_link");
        let base = scene
            .add_body("base", BodyId::WORLD, Vector3::new(0.0, 0.0, 1.0), UnitQuaternion::identity())
            .unwrap();
        scene
            .add_body("arm", base, Vector3::new(0.0, 0.0, -0.5), UnitQuaternion::identity())
            .unwrap();
        scene
    }

    #[test]
    fn test_body_tree_links_children() {
        let scene = two_link();
        let base = scene.find_body("base").unwrap();
        let children: Vec<_> = scene.children(base).map(|b| b.name.as_str()).collect();
        assert_eq!(children, vec!["arm"]);
        assert_eq!(scene.body(scene.find_body("arm").unwrap()).parent, Some(base));
    }

    #[test]
    fn test_duplicate_body_rejected() {
        let mut scene = two_link();
        let err = scene
            .add_body("arm", BodyId::WORLD, Vector3::zeros(), UnitQuaternion::identity())
            .unwrap_err();
        assert!(matches!(err, PhysicsError::DuplicateName { kind: "body", .. }));
    }

    #[test]
    fn test_sensor_offsets_are_contiguous() {
        let mut scene = two_link();
        let a = scene
            .add_sensor("pos", SensorKind::FramePos { body: "base".into() })
            .unwrap();
        let b = scene
            .add_sensor("quat", SensorKind::FrameQuat { body: "base".into() })
            .unwrap();
        let c = scene
            .add_sensor("touch", SensorKind::Touch { site: "s".into() })
            .unwrap();
        assert_eq!(a, 0..3);
        assert_eq!(b, 3..7);
        assert_eq!(c, 7..8);
        assert_eq!(scene.sensor_dim(), 8);
    }

    #[test]
    fn test_attach_places_top_level_bodies() {
        let mut arena = Scene::new("arena");
        arena.add_geom(Geom::new(BodyId::WORLD, GeomShape::Plane)).unwrap();
        let fly = two_link();
        let frame = Isometry3::translation(1.0, 2.0, 0.0);
        arena.attach(fly, frame).unwrap();

        let base = arena.find_body("base").unwrap();
        let pose = arena.reference_pose(base);
        assert_eq!(pose.translation.vector, Vector3::new(1.0, 2.0, 1.0));
        let arm = arena.find_body("arm").unwrap();
        assert_eq!(arena.body(arm).parent, Some(base));
        assert_eq!(arena.reference_pose(arm).translation.vector, Vector3::new(1.0, 2.0, 0.5));
    }

    #[test]
    fn test_name_anonymous_geom() {
        let mut scene = Scene::new("s");
        let idx = scene.add_geom(Geom::new(BodyId::WORLD, GeomShape::Plane)).unwrap();
        scene.name_geom(idx, "groundblock_0").unwrap();
        assert_eq!(scene.geom_index("groundblock_0"), Some(idx));
    }

    #[test]
    fn test_position_actuator_force_clamped() {
        let act = Actuator {
            name: "a".into(),
            joint: "j".into(),
            kind: ActuatorKind::Position { kp: 10.0 },
            forcerange: Some([-1.0, 1.0]),
            ctrlrange: None,
        };
        assert_eq!(act.force(0.05, 0.0, 0.0), 0.5);
        assert_eq!(act.force(1.0, 0.0, 0.0), 1.0);
    }
}
