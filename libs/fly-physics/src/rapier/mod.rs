//! [`PhysicsEngine`] implementation on top of Rapier3D.
//!
//! Every MJCF hinge becomes a revolute impulse joint. A body carrying
//! several hinges is split into a chain of light intermediate bodies, one
//! per hinge, ending in the real body. Joint stiffness, damping and the
//! position and velocity actuators drive a force-based joint motor that
//! the solver integrates implicitly; motor actuators apply a torque.

mod camera;
mod hooks;

use image::RgbImage;
use nalgebra as na;
use rapier3d::prelude::*;

use crate::engine::PhysicsEngine;
use crate::error::{PhysicsError, Result};
use crate::scene::{ActuatorKind, BodyId, GeomShape, Scene, SensorKind};
use hooks::ContactPairFilter;

pub const SOLVER_ITERATIONS: usize = 60;

// Intermediate hinge bodies and geometry-less bodies still need inertia.
const LINK_MASS: Real = 1.0e-7;
const LINK_INERTIA: Real = 1.0e-10;

pub struct PhysicsWorld {
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub gravity: Vector<Real>,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub ccd_solver: CCDSolver,
    pub query_pipeline: QueryPipeline,
    hooks: ContactPairFilter,
}

impl PhysicsWorld {
    fn new(gravity: Vector<Real>, dt: Real) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = dt;
        integration_parameters.num_solver_iterations =
            std::num::NonZeroUsize::new(SOLVER_ITERATIONS).unwrap_or(std::num::NonZeroUsize::MIN);

        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            gravity,
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            hooks: ContactPairFilter::default(),
        }
    }

    pub fn step(&mut self) {
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &self.hooks,
            &(),
        );
    }
}

/// Rapier bodies standing in for one hinge.
#[derive(Clone, Copy)]
struct HingeLink {
    joint: ImpulseJointHandle,
    parent: RigidBodyHandle,
    child: RigidBodyHandle,
    /// Child rotation relative to the parent with the hinge at zero.
    rest: na::UnitQuaternion<Real>,
    /// Hinge axis in the child frame.
    axis: na::Unit<na::Vector3<Real>>,
}

/// Handles of the current Rapier world, indexed like the scene.
struct Layout {
    bodies: Vec<RigidBodyHandle>,
    hinges: Vec<HingeLink>,
    colliders: Vec<ColliderHandle>,
}

#[derive(Clone, Copy)]
enum ResolvedSensor {
    JointPos(usize),
    JointVel(usize),
    ActuatorFrc(usize),
    FramePos(BodyId),
    FrameLinVel(BodyId),
    FrameQuat(BodyId),
    FrameAngVel(BodyId),
    Touch(usize),
}

/// Per-hinge drive accumulated for one step.
struct JointDrive {
    stiffness: f64,
    stiffness_target: f64,
    damping: f64,
    damping_target: f64,
    torque: f64,
}

impl JointDrive {
    fn is_passive(&self) -> bool {
        self.stiffness <= 0.0 && self.damping <= 0.0
    }

    fn targets(&self) -> (f64, f64) {
        let pos = if self.stiffness > 0.0 { self.stiffness_target / self.stiffness } else { 0.0 };
        let vel = if self.damping > 0.0 { self.damping_target / self.damping } else { 0.0 };
        (pos, vel)
    }
}

/// Model parameters that can be overridden after instantiation.
struct ModelParams {
    timestep: f64,
    gravity: na::Vector3<f64>,
    joint_stiffness: Vec<f64>,
    joint_damping: Vec<f64>,
    geom_friction: Vec<[f64; 3]>,
}

pub struct RapierEngine {
    scene: Scene,
    model: ModelParams,
    world: PhysicsWorld,
    layout: Layout,
    /// Actuator index -> joint index.
    actuator_joints: Vec<usize>,
    /// (geom1, geom2, explicit sliding friction) per contact pair.
    contact_pairs: Vec<(usize, usize, Option<f64>)>,
    sensors: Vec<(ResolvedSensor, usize)>,
    qpos: Vec<f64>,
    ctrl: Vec<f64>,
    sensordata: Vec<f64>,
}

impl RapierEngine {
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    /// Current hinge coordinate and velocity.
    pub fn joint_state(&self, joint: usize) -> (f64, f64) {
        let link = self.layout.hinges[joint];
        let bodies = &self.world.rigid_body_set;
        let (Some(parent), Some(child)) = (bodies.get(link.parent), bodies.get(link.child)) else {
            return (0.0, 0.0);
        };
        let delta = (parent.rotation() * link.rest).inverse() * child.rotation();
        let quat = delta.quaternion();
        let mut angle = 2.0 * quat.imag().dot(&link.axis.into_inner()).atan2(quat.w);
        if angle > std::f32::consts::PI {
            angle -= std::f32::consts::TAU;
        } else if angle <= -std::f32::consts::PI {
            angle += std::f32::consts::TAU;
        }
        let world_axis = child.rotation() * link.axis.into_inner();
        let rate = (child.angvel() - parent.angvel()).dot(&world_axis);
        (angle as f64, rate as f64)
    }

    fn joint_lookup(&self, name: &str) -> Result<usize> {
        self.scene
            .joint_index(name)
            .ok_or_else(|| PhysicsError::unknown("joint", name))
    }

    fn actuator_force(&self, index: usize) -> f64 {
        let (q, qdot) = self.joint_state(self.actuator_joints[index]);
        self.scene.actuators()[index].force(self.ctrl[index], q, qdot)
    }

    fn rebuild(&mut self) -> Result<()> {
        let (world, layout) = build_world(&self.scene, &self.model, &self.qpos, &self.contact_pairs)?;
        self.world = world;
        self.layout = layout;
        self.refresh_sensors();
        Ok(())
    }

    /// Fold the passive spring-damper and the position and velocity
    /// actuators of every hinge into one implicit joint motor. Motor
    /// actuators add a plain torque on top.
    fn drive_joints(&mut self) {
        let joints = self.scene.joints();
        let mut drives: Vec<JointDrive> = (0..joints.len())
            .map(|j| JointDrive {
                stiffness: self.model.joint_stiffness[j],
                stiffness_target: self.model.joint_stiffness[j] * joints[j].springref,
                damping: self.model.joint_damping[j],
                damping_target: 0.0,
                torque: 0.0,
            })
            .collect();
        for (a, actuator) in self.scene.actuators().iter().enumerate() {
            let drive = &mut drives[self.actuator_joints[a]];
            let ctrl = actuator.clamp_ctrl(self.ctrl[a]);
            match actuator.kind {
                ActuatorKind::Position { kp } => {
                    drive.stiffness += kp;
                    drive.stiffness_target += kp * ctrl;
                }
                ActuatorKind::Velocity { kv } => {
                    drive.damping += kv;
                    drive.damping_target += kv * ctrl;
                }
                ActuatorKind::Motor { .. } => drive.torque += actuator.force(ctrl, 0.0, 0.0),
            }
        }

        let bodies = &mut self.world.rigid_body_set;
        for &handle in &self.layout.bodies {
            if let Some(body) = bodies.get_mut(handle) {
                body.reset_torques(false);
            }
        }
        for (link, drive) in self.layout.hinges.iter().zip(&drives) {
            if let Some(joint) = self.world.impulse_joint_set.get_mut(link.joint) {
                // A motor with zero gains is solved as a rigid velocity lock.
                if drive.is_passive() {
                    joint.data.set_motor(JointAxis::AngX, 0.0, 0.0, 0.0, 0.0);
                    joint.data.set_motor_max_force(JointAxis::AngX, 0.0);
                } else {
                    let (target_pos, target_vel) = drive.targets();
                    joint.data.set_motor(
                        JointAxis::AngX,
                        target_pos as Real,
                        target_vel as Real,
                        drive.stiffness as Real,
                        drive.damping as Real,
                    );
                    joint.data.set_motor_max_force(JointAxis::AngX, Real::MAX);
                }
            }
            if drive.torque == 0.0 {
                continue;
            }
            let Some(child) = bodies.get(link.child) else { continue };
            let moment = child.rotation() * link.axis.into_inner() * drive.torque as Real;
            if let Some(child) = bodies.get_mut(link.child) {
                child.add_torque(moment, true);
            }
            if let Some(parent) = bodies.get_mut(link.parent) {
                parent.add_torque(-moment, true);
            }
        }
    }

    fn refresh_sensors(&mut self) {
        let dt = self.model.timestep;
        for i in 0..self.sensors.len() {
            let (sensor, offset) = self.sensors[i];
            let bodies = &self.world.rigid_body_set;
            let frame = |id: BodyId| bodies.get(self.layout.bodies[id.0]);
            match sensor {
                ResolvedSensor::JointPos(j) => self.sensordata[offset] = self.joint_state(j).0,
                ResolvedSensor::JointVel(j) => self.sensordata[offset] = self.joint_state(j).1,
                ResolvedSensor::ActuatorFrc(a) => self.sensordata[offset] = self.actuator_force(a),
                ResolvedSensor::FramePos(b) => {
                    if let Some(body) = frame(b) {
                        let t = body.translation();
                        self.sensordata[offset..offset + 3].copy_from_slice(&[t.x as f64, t.y as f64, t.z as f64]);
                    }
                }
                ResolvedSensor::FrameLinVel(b) => {
                    if let Some(body) = frame(b) {
                        let v = body.velocity_at_point(&Point::from(*body.translation()));
                        self.sensordata[offset..offset + 3].copy_from_slice(&[v.x as f64, v.y as f64, v.z as f64]);
                    }
                }
                ResolvedSensor::FrameQuat(b) => {
                    if let Some(body) = frame(b) {
                        let q = body.rotation().quaternion();
                        self.sensordata[offset..offset + 4]
                            .copy_from_slice(&[q.w as f64, q.i as f64, q.j as f64, q.k as f64]);
                    }
                }
                ResolvedSensor::FrameAngVel(b) => {
                    if let Some(body) = frame(b) {
                        let w = body.angvel();
                        self.sensordata[offset..offset + 3].copy_from_slice(&[w.x as f64, w.y as f64, w.z as f64]);
                    }
                }
                ResolvedSensor::Touch(site) => self.sensordata[offset] = self.touch(site, dt),
            }
        }
    }

    /// Normal contact force inside the site volume, summed over every
    /// collider of the site's body.
    fn touch(&self, site: usize, dt: f64) -> f64 {
        let site = &self.scene.sites()[site];
        let Some(body) = self.world.rigid_body_set.get(self.layout.bodies[site.body.0]) else {
            return 0.0;
        };
        let center = body.position() * Point::from(site.pos.cast::<Real>());
        let radius = site.size.x as Real;
        let colliders = &self.world.collider_set;

        let mut impulse = 0.0f64;
        for &handle in body.colliders() {
            let Some(collider) = colliders.get(handle) else { continue };
            for pair in self.world.narrow_phase.contact_pairs_with(handle) {
                if !pair.has_any_active_contact {
                    continue;
                }
                let is_first = pair.collider1 == handle;
                for manifold in &pair.manifolds {
                    for point in &manifold.points {
                        let local = if is_first { point.local_p1 } else { point.local_p2 };
                        let world = collider.position() * local;
                        if na::distance(&world, &center) <= radius {
                            impulse += point.data.impulse as f64;
                        }
                    }
                }
            }
        }
        if dt > 0.0 {
            impulse / dt
        } else {
            0.0
        }
    }
}

impl PhysicsEngine for RapierEngine {
    fn instantiate(scene: &Scene) -> Result<Self> {
        let scene = scene.clone();
        let model = ModelParams {
            timestep: scene.option.timestep,
            gravity: scene.option.gravity,
            joint_stiffness: scene.joints().iter().map(|j| j.stiffness).collect(),
            joint_damping: scene.joints().iter().map(|j| j.damping).collect(),
            geom_friction: scene.geoms().iter().map(|g| g.friction).collect(),
        };

        let actuator_joints = scene
            .actuators()
            .iter()
            .map(|a| {
                scene
                    .joint_index(&a.joint)
                    .ok_or_else(|| PhysicsError::unknown("joint", a.joint.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let contact_pairs = scene
            .contact_pairs()
            .iter()
            .map(|p| {
                let g1 = scene.geom_index(&p.geom1).ok_or_else(|| PhysicsError::unknown("geom", p.geom1.clone()))?;
                let g2 = scene.geom_index(&p.geom2).ok_or_else(|| PhysicsError::unknown("geom", p.geom2.clone()))?;
                Ok((g1, g2, p.friction.map(|f| f[0])))
            })
            .collect::<Result<Vec<_>>>()?;

        let sensors = scene
            .sensors()
            .iter()
            .map(|decl| {
                let body = |name: &str| scene.find_body(name).ok_or_else(|| PhysicsError::unknown("body", name));
                let joint = |name: &str| scene.joint_index(name).ok_or_else(|| PhysicsError::unknown("joint", name));
                let resolved = match &decl.kind {
                    SensorKind::JointPos { joint: j } => ResolvedSensor::JointPos(joint(j)?),
                    SensorKind::JointVel { joint: j } => ResolvedSensor::JointVel(joint(j)?),
                    SensorKind::ActuatorFrc { actuator } => ResolvedSensor::ActuatorFrc(
                        scene
                            .actuator_index(actuator)
                            .ok_or_else(|| PhysicsError::unknown("actuator", actuator.clone()))?,
                    ),
                    SensorKind::FramePos { body: b } => ResolvedSensor::FramePos(body(b)?),
                    SensorKind::FrameLinVel { body: b } => ResolvedSensor::FrameLinVel(body(b)?),
                    SensorKind::FrameQuat { body: b } => ResolvedSensor::FrameQuat(body(b)?),
                    SensorKind::FrameAngVel { body: b } => ResolvedSensor::FrameAngVel(body(b)?),
                    SensorKind::Touch { site } => ResolvedSensor::Touch(
                        scene.site_index(site).ok_or_else(|| PhysicsError::unknown("site", site.clone()))?,
                    ),
                };
                Ok((resolved, decl.offset))
            })
            .collect::<Result<Vec<_>>>()?;

        let qpos = vec![0.0; scene.joints().len()];
        let (world, layout) = build_world(&scene, &model, &qpos, &contact_pairs)?;
        log::info!(
            "Instantiated Rapier model '{}': {} rigid bodies, {} hinges, {} contact pairs",
            scene.name,
            world.rigid_body_set.len(),
            layout.hinges.len(),
            world.hooks.len()
        );

        let mut engine = Self {
            ctrl: vec![0.0; scene.actuators().len()],
            sensordata: vec![0.0; scene.sensor_dim()],
            scene,
            model,
            world,
            layout,
            actuator_joints,
            contact_pairs,
            sensors,
            qpos,
        };
        engine.refresh_sensors();
        Ok(engine)
    }

    fn timestep(&self) -> f64 {
        self.model.timestep
    }

    fn reset(&mut self) -> Result<()> {
        self.qpos.iter_mut().for_each(|q| *q = 0.0);
        self.ctrl.iter_mut().for_each(|c| *c = 0.0);
        self.rebuild()
    }

    fn step(&mut self) -> Result<()> {
        self.drive_joints();
        self.world.gravity = self.model.gravity.cast::<Real>();
        self.world.step();
        self.refresh_sensors();
        Ok(())
    }

    fn set_gravity(&mut self, gravity: na::Vector3<f64>) {
        self.model.gravity = gravity;
        self.world.gravity = gravity.cast::<Real>();
    }

    fn set_joint_stiffness(&mut self, joint: &str, stiffness: f64) -> Result<()> {
        let j = self.joint_lookup(joint)?;
        self.model.joint_stiffness[j] = stiffness;
        Ok(())
    }

    fn set_joint_damping(&mut self, joint: &str, damping: f64) -> Result<()> {
        let j = self.joint_lookup(joint)?;
        self.model.joint_damping[j] = damping;
        Ok(())
    }

    fn set_geom_friction(&mut self, geom: &str, friction: [f64; 3]) -> Result<()> {
        let g = self
            .scene
            .geom_index(geom)
            .ok_or_else(|| PhysicsError::unknown("geom", geom))?;
        self.model.geom_friction[g] = friction;
        let colliders = &self.layout.colliders;
        if let Some(collider) = self.world.collider_set.get_mut(colliders[g]) {
            collider.set_friction(friction[0] as Real);
        }
        for &(g1, g2, explicit) in self.contact_pairs.iter().filter(|p| p.0 == g || p.1 == g) {
            let friction = pair_friction(&self.model, g1, g2, explicit);
            self.world.hooks.allow(colliders[g1], colliders[g2], friction);
        }
        Ok(())
    }

    fn set_joint_position(&mut self, joint: &str, qpos: f64) -> Result<()> {
        let j = self.joint_lookup(joint)?;
        self.qpos[j] = qpos;
        self.pose_links();
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
        let index = self
            .scene
            .camera_index(camera)
            .ok_or_else(|| PhysicsError::unknown("camera", camera))?;
        if width == 0 || height == 0 {
            return Err(PhysicsError::Render(format!("invalid image size {width}x{height}")));
        }
        let cam = &self.scene.cameras()[index];
        let body_pose = self
            .world
            .rigid_body_set
            .get(self.layout.bodies[cam.body.0])
            .map(|b| *b.position())
            .unwrap_or_else(Isometry::identity);
        let pose = camera::camera_pose(&self.scene, cam, &body_pose);
        Ok(camera::render(
            &pose,
            cam.fovy,
            width,
            height,
            self.scene.geoms(),
            &self.world.rigid_body_set,
            &self.world.collider_set,
            &self.world.query_pipeline,
        ))
    }
}

impl RapierEngine {
    /// Move every jointed body to the pose given by `qpos`, keeping free
    /// bodies where they are. Moved bodies come to rest.
    fn pose_links(&mut self) {
        let mut poses = vec![na::Isometry3::<f64>::identity(); self.scene.bodies().len()];
        for (index, body) in self.scene.bodies().iter().enumerate().skip(1) {
            let handle = self.layout.bodies[index];
            if body.free {
                if let Some(rb) = self.world.rigid_body_set.get(handle) {
                    poses[index] = rb.position().cast::<f64>();
                }
                continue;
            }
            let parent = body.parent.unwrap_or(BodyId::WORLD);
            let mut pose = poses[parent.0] * body.local_pose();
            for (j, joint) in self.scene.joints_of(BodyId(index)) {
                pose = hinge_pose(&pose, &joint.pos, &joint.axis, self.qpos[j]);
                place_body(&mut self.world, self.layout.hinges[j].child, &pose);
            }
            place_body(&mut self.world, handle, &pose);
            poses[index] = pose;
        }
        self.world.query_pipeline.update(&self.world.collider_set);
        self.refresh_sensors();
    }
}

/// Teleport a dynamic body and its colliders, zeroing its velocity.
fn place_body(world: &mut PhysicsWorld, handle: RigidBodyHandle, pose: &na::Isometry3<f64>) {
    let Some(body) = world.rigid_body_set.get_mut(handle) else { return };
    if !body.is_dynamic() {
        return;
    }
    let pose = pose.cast::<Real>();
    body.set_position(pose, false);
    body.set_linvel(Vector::zeros(), false);
    body.set_angvel(Vector::zeros(), false);
    for &handle in body.colliders() {
        if let Some(collider) = world.collider_set.get_mut(handle) {
            if let Some(local) = collider.position_wrt_parent().copied() {
                collider.set_position(pose * local);
            }
        }
    }
}

/// Rotate `pose` by `angle` about a hinge anchored at `anchor`.
fn hinge_pose(
    pose: &na::Isometry3<f64>,
    anchor: &na::Vector3<f64>,
    axis: &na::Vector3<f64>,
    angle: f64,
) -> na::Isometry3<f64> {
    let anchor = na::Translation3::from(*anchor);
    let rotation = na::UnitQuaternion::from_axis_angle(&na::Unit::new_normalize(*axis), angle);
    pose * anchor * rotation * anchor.inverse()
}

/// Sliding friction of a contact pair: the explicit value, or the larger
/// of the two geoms.
fn pair_friction(model: &ModelParams, g1: usize, g2: usize, explicit: Option<f64>) -> Real {
    explicit.unwrap_or_else(|| model.geom_friction[g1][0].max(model.geom_friction[g2][0])) as Real
}

fn hinge_frame(axis: &na::Vector3<f64>) -> na::UnitQuaternion<f64> {
    na::UnitQuaternion::rotation_between(&na::Vector3::x(), axis)
        .unwrap_or_else(|| na::UnitQuaternion::from_axis_angle(&na::Vector3::z_axis(), std::f64::consts::PI))
}

fn collider_for(shape: &GeomShape) -> ColliderBuilder {
    match *shape {
        GeomShape::Sphere { radius } => ColliderBuilder::ball(radius as Real),
        GeomShape::Capsule { radius, half_length } => {
            ColliderBuilder::capsule_z(half_length as Real, radius as Real)
        }
        GeomShape::Box { half_extents } => ColliderBuilder::cuboid(
            half_extents.x as Real,
            half_extents.y as Real,
            half_extents.z as Real,
        ),
        GeomShape::Cylinder { radius, half_length } => {
            ColliderBuilder::cylinder(half_length as Real, radius as Real)
        }
        GeomShape::Plane => ColliderBuilder::halfspace(Vector::z_axis()),
    }
}

/// Build a fresh Rapier world with every hinge at `qpos`.
fn build_world(
    scene: &Scene,
    model: &ModelParams,
    qpos: &[f64],
    contact_pairs: &[(usize, usize, Option<f64>)],
) -> Result<(PhysicsWorld, Layout)> {
    let mut world = PhysicsWorld::new(model.gravity.cast::<Real>(), model.timestep as Real);
    let link_mass = MassProperties::new(Point::origin(), LINK_MASS, Vector::repeat(LINK_INERTIA));

    let world_handle = world
        .rigid_body_set
        .insert(RigidBodyBuilder::fixed().build());
    let mut handles = vec![world_handle; scene.bodies().len()];
    let mut poses = vec![na::Isometry3::<f64>::identity(); scene.bodies().len()];
    let mut hinges: Vec<Option<HingeLink>> = vec![None; scene.joints().len()];

    // 1. Bodies and joints, parents first
    for (index, body) in scene.bodies().iter().enumerate().skip(1) {
        let parent = body.parent.unwrap_or(BodyId::WORLD);
        let parent_handle = handles[parent.0];
        let base = poses[parent.0] * body.local_pose();
        let joints: Vec<_> = scene.joints_of(BodyId(index)).collect();

        let dynamic = |pose: &na::Isometry3<f64>| {
            RigidBodyBuilder::dynamic()
                .position(pose.cast::<Real>())
                .additional_mass_properties(link_mass)
                .can_sleep(false)
                .build()
        };

        if body.free {
            handles[index] = world.rigid_body_set.insert(dynamic(&base));
            poses[index] = base;
            continue;
        }

        if joints.is_empty() {
            if parent == BodyId::WORLD {
                let rb = RigidBodyBuilder::fixed().position(base.cast::<Real>()).build();
                handles[index] = world.rigid_body_set.insert(rb);
            } else {
                let handle = world.rigid_body_set.insert(dynamic(&base));
                let joint = GenericJointBuilder::new(JointAxesMask::LOCKED_FIXED_AXES)
                    .local_frame1(body.local_pose().cast::<Real>())
                    .local_frame2(Isometry::identity())
                    .contacts_enabled(false)
                    .build();
                world.impulse_joint_set.insert(parent_handle, handle, joint, true);
                handles[index] = handle;
            }
            poses[index] = base;
            continue;
        }

        let mut previous = parent_handle;
        let mut frame_in_previous = body.local_pose();
        let mut rest = body.quat;
        let mut pose = base;
        for (j, joint) in joints {
            pose = hinge_pose(&pose, &joint.pos, &joint.axis, qpos[j]);

            let handle = world.rigid_body_set.insert(dynamic(&pose));
            let frame = na::Isometry3::from_parts(na::Translation3::from(joint.pos), hinge_frame(&joint.axis));
            let hinge = GenericJointBuilder::new(JointAxesMask::LOCKED_REVOLUTE_AXES)
                .local_frame1((frame_in_previous * frame).cast::<Real>())
                .local_frame2(frame.cast::<Real>())
                .motor_model(JointAxis::AngX, MotorModel::ForceBased)
                .contacts_enabled(false)
                .build();
            let joint_handle = world.impulse_joint_set.insert(previous, handle, hinge, true);

            hinges[j] = Some(HingeLink {
                joint: joint_handle,
                parent: previous,
                child: handle,
                rest: rest.cast::<Real>(),
                axis: na::Unit::new_normalize(joint.axis.cast::<Real>()),
            });
            previous = handle;
            frame_in_previous = na::Isometry3::identity();
            rest = na::UnitQuaternion::identity();
        }
        handles[index] = previous;
        poses[index] = pose;
    }

    // 2. Colliders
    let hooks = ActiveHooks::FILTER_CONTACT_PAIRS | ActiveHooks::MODIFY_SOLVER_CONTACTS;
    let mut colliders = Vec::with_capacity(scene.geoms().len());
    for (g, geom) in scene.geoms().iter().enumerate() {
        let mut local = geom.local_pose();
        if matches!(geom.shape, GeomShape::Cylinder { .. }) {
            // Rapier cylinders run along y.
            let upright = na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), std::f64::consts::FRAC_PI_2);
            local = local * na::Isometry3::from_parts(na::Translation3::identity(), upright);
        }
        let collider = collider_for(&geom.shape)
            .position(local.cast::<Real>())
            .density(geom.density as Real)
            .friction(model.geom_friction[g][0] as Real)
            .active_hooks(hooks)
            .user_data(g as u128)
            .build();
        let handle = world
            .collider_set
            .insert_with_parent(collider, handles[geom.body.0], &mut world.rigid_body_set);
        colliders.push(handle);
    }

    // 3. Contact pair filter
    let mut filter = ContactPairFilter::default();
    for &(g1, g2, explicit) in contact_pairs {
        filter.allow(colliders[g1], colliders[g2], pair_friction(model, g1, g2, explicit));
    }
    world.hooks = filter;
    world.query_pipeline.update(&world.collider_set);

    let hinges = hinges
        .into_iter()
        .enumerate()
        .map(|(j, h)| h.ok_or_else(|| PhysicsError::unknown("joint body", scene.joints()[j].name.clone())))
        .collect::<Result<Vec<_>>>()?;

    Ok((world, Layout { bodies: handles, hinges, colliders }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mjcf::MjcfLoader;
    use approx::assert_relative_eq;

    const ARM: &str = r#"
        <mujoco model="arm">
            <compiler angle="radian"/>
            <option timestep="0.001" gravity="0 0 0"/>
            <worldbody>
                <body name="base" pos="0 0 1">
                    <geom name="base_collision" type="box" size="0.1 0.1 0.1"/>
                    <body name="upper" pos="0 0 -0.1">
                        <joint name="shoulder" axis="0 1 0"/>
                        <joint name="shoulder_roll" axis="1 0 0"/>
                        <geom name="upper_collision" type="capsule" fromto="0 0 0 0 0 -0.4" size="0.02"/>
                    </body>
                </body>
                <camera name="cam" pos="0 -3 1" euler="1.5708 0 0"/>
            </worldbody>
            <actuator>
                <position name="actuator_position_shoulder" joint="shoulder" kp="0"/>
            </actuator>
            <sensor>
                <jointpos name="shoulder_pos" joint="shoulder"/>
                <jointpos name="roll_pos" joint="shoulder_roll"/>
                <actuatorfrc name="shoulder_frc" actuator="actuator_position_shoulder"/>
            </sensor>
        </mujoco>
    "#;

    fn arm() -> RapierEngine {
        let scene = MjcfLoader::load_str(ARM).unwrap();
        RapierEngine::instantiate(&scene).unwrap()
    }

    #[test]
    fn test_multi_hinge_body_gets_one_link_per_hinge() {
        let engine = arm();
        // world + fixed base + one intermediate link + upper
        assert_eq!(engine.world().rigid_body_set.len(), 4);
        assert_eq!(engine.layout.hinges.len(), 2);
    }

    #[test]
    fn test_set_joint_position_is_read_back() {
        let mut engine = arm();
        engine.set_joint_position("shoulder", 0.4).unwrap();
        engine.set_joint_position("shoulder_roll", -0.2).unwrap();
        assert_relative_eq!(engine.sensor_data()[0], 0.4, epsilon = 1e-4);
        assert_relative_eq!(engine.sensor_data()[1], -0.2, epsilon = 1e-4);

        engine.reset().unwrap();
        assert_relative_eq!(engine.sensor_data()[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_set_joint_position_moves_colliders_in_place() {
        let mut engine = arm();
        let bodies_before = engine.world().rigid_body_set.len();
        engine.set_joint_position("shoulder", 0.4).unwrap();

        let g = engine.scene().geom_index("upper_collision").unwrap();
        let world = engine.world();
        let collider = world.collider_set.get(engine.layout.colliders[g]).unwrap();
        let body = world.rigid_body_set.get(collider.parent().unwrap()).unwrap();
        let expected = body.position() * collider.position_wrt_parent().unwrap();
        assert_relative_eq!(collider.position().translation.vector, expected.translation.vector, epsilon = 1e-6);
        // The capsule hangs below the shoulder and swings towards -x.
        assert!(collider.position().translation.x < -0.05);
        assert_eq!(world.rigid_body_set.len(), bodies_before);
        assert_eq!(body.linvel().norm(), 0.0);
    }

    #[test]
    fn test_friction_override_updates_collider_and_pair() {
        let mut scene = MjcfLoader::load_str(ARM).unwrap();
        scene
            .add_contact_pair(crate::scene::ContactPair {
                name: "base_upper".to_string(),
                geom1: "base_collision".to_string(),
                geom2: "upper_collision".to_string(),
                solref: [-1e6, -1e4],
                margin: 0.0,
                friction: None,
            })
            .unwrap();
        let mut engine = RapierEngine::instantiate(&scene).unwrap();
        engine.set_geom_friction("upper_collision", [3.0, 0.0, 0.0]).unwrap();

        let base = engine.layout.colliders[scene.geom_index("base_collision").unwrap()];
        let upper = engine.layout.colliders[scene.geom_index("upper_collision").unwrap()];
        assert_relative_eq!(engine.world().collider_set.get(upper).unwrap().friction(), 3.0);
        assert_eq!(engine.world().hooks.friction(base, upper), Some(3.0));
    }

    #[test]
    fn test_actuator_force_follows_gain_and_control() {
        let mut scene = MjcfLoader::load_str(ARM).unwrap();
        scene.actuators_mut()[0].set_gain(2.0);
        let mut engine = RapierEngine::instantiate(&scene).unwrap();
        engine.set_control(0, 0.5).unwrap();
        engine.refresh_sensors();
        assert_relative_eq!(engine.sensor_data()[2], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_unknown_joint_override_fails() {
        let mut engine = arm();
        let err = engine.set_joint_stiffness("elbow", 1.0).unwrap_err();
        assert!(matches!(err, PhysicsError::UnknownName { kind: "joint", .. }));
    }

    #[test]
    fn test_render_size_and_hit() {
        let mut engine = arm();
        let img = engine.render("cam", 32, 24).unwrap();
        assert_eq!(img.dimensions(), (32, 24));
        // The arm sits in the middle of the view.
        let center = img.get_pixel(16, 12);
        assert_ne!(center.0, BACKGROUND_PIXEL);
    }

    const BACKGROUND_PIXEL: [u8; 3] = [26, 26, 31];
}
