//! Loader for the subset of MJCF used by the fly body model.
//!
//! Supported: `compiler/@angle`, `option` (timestep, gravity), nested
//! `worldbody` bodies with hinge/free joints, geoms (sphere, capsule, box,
//! cylinder, plane; `fromto` on capsules and cylinders), sites, cameras,
//! `actuator` (position, velocity, motor), `contact/pair` and the frame,
//! joint, actuator and touch sensors.

use std::path::Path;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use roxmltree::{Document, Node};

use crate::error::{PhysicsError, Result};
use crate::scene::{
    Actuator, ActuatorKind, BodyId, Camera, CameraMode, ContactPair, Geom, GeomShape, Joint,
    Scene, SensorKind, Site,
};

pub struct MjcfLoader {
    angle_in_degrees: bool,
}

impl MjcfLoader {
    pub fn load_file(path: impl AsRef<Path>) -> Result<Scene> {
        let content = std::fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    pub fn load_str(xml: &str) -> Result<Scene> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        if !root.has_tag_name("mujoco") {
            return Err(PhysicsError::MissingElement {
                element: "mujoco",
                context: "document root".to_string(),
            });
        }

        let angle_in_degrees = root
            .children()
            .find(|n| n.has_tag_name("compiler"))
            .and_then(|n| n.attribute("angle"))
            .map_or(true, |a| a != "radian");
        let loader = MjcfLoader { angle_in_degrees };

        let mut scene = Scene::new(root.attribute("model").unwrap_or("unnamed"));

        // 1. Global options
        if let Some(option) = root.children().find(|n| n.has_tag_name("option")) {
            if let Some(dt) = parse_scalar(option, "timestep")? {
                scene.option.timestep = dt;
            }
            if let Some(g) = parse_vec3(option, "gravity")? {
                scene.option.gravity = g;
            }
        }

        // 2. Kinematic tree
        let worldbody = root
            .children()
            .find(|n| n.has_tag_name("worldbody"))
            .ok_or_else(|| PhysicsError::MissingElement {
                element: "worldbody",
                context: "mujoco".to_string(),
            })?;
        loader.parse_body_contents(&mut scene, worldbody, BodyId::WORLD)?;

        // 3. Actuators, contact pairs, sensors
        for section in root.children().filter(|n| n.is_element()) {
            match section.tag_name().name() {
                "actuator" => loader.parse_actuators(&mut scene, section)?,
                "contact" => loader.parse_contacts(&mut scene, section)?,
                "sensor" => loader.parse_sensors(&mut scene, section)?,
                _ => {}
            }
        }

        log::debug!(
            "Loaded MJCF '{}': {} bodies, {} joints, {} geoms, {} actuators",
            scene.name,
            scene.bodies().len(),
            scene.joints().len(),
            scene.geoms().len(),
            scene.actuators().len()
        );
        Ok(scene)
    }

    fn parse_body_contents(&self, scene: &mut Scene, node: Node, body: BodyId) -> Result<()> {
        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "body" => {
                    let name = child.attribute("name").ok_or_else(|| {
                        PhysicsError::MissingAttribute {
                            attribute: "name",
                            element: "body".to_string(),
                        }
                    })?;
                    let pos = parse_vec3(child, "pos")?.unwrap_or_else(Vector3::zeros);
                    let quat = self.parse_orientation(child)?;
                    let id = scene.add_body(name, body, pos, quat)?;
                    self.parse_body_contents(scene, child, id)?;
                }
                "freejoint" => scene.set_free(body, true),
                "joint" => match child.attribute("type").unwrap_or("hinge") {
                    "free" => scene.set_free(body, true),
                    "hinge" => {
                        let joint = self.parse_joint(child, body)?;
                        scene.add_joint(joint)?;
                    }
                    other => return Err(PhysicsError::UnsupportedJointType(other.to_string())),
                },
                "geom" => {
                    let geom = self.parse_geom(child, body)?;
                    scene.add_geom(geom)?;
                }
                "site" => {
                    let site = self.parse_site(child, body)?;
                    scene.add_site(site)?;
                }
                "camera" => {
                    let camera = self.parse_camera(child, body)?;
                    scene.add_camera(camera)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_joint(&self, node: Node, body: BodyId) -> Result<Joint> {
        let name = required(node, "name", "joint")?;
        let axis = parse_vec3(node, "axis")?.unwrap_or_else(Vector3::z);
        if axis.norm() == 0.0 {
            return Err(PhysicsError::invalid("axis", name, "zero-length axis"));
        }
        let mut joint = Joint::hinge(name, body, axis);
        joint.pos = parse_vec3(node, "pos")?.unwrap_or_else(Vector3::zeros);
        joint.stiffness = parse_scalar(node, "stiffness")?.unwrap_or(0.0);
        joint.damping = parse_scalar(node, "damping")?.unwrap_or(0.0);
        joint.springref = self.angle(parse_scalar(node, "springref")?.unwrap_or(0.0));
        joint.range = parse_pair(node, "range")?.map(|[lo, hi]| [self.angle(lo), self.angle(hi)]);
        Ok(joint)
    }

    fn parse_geom(&self, node: Node, body: BodyId) -> Result<Geom> {
        let kind = node.attribute("type").unwrap_or("sphere");
        let element = node.attribute("name").unwrap_or("geom").to_string();
        let size = parse_floats(node, "size")?.unwrap_or_default();
        let size_at = |i: usize| -> Result<f64> {
            size.get(i)
                .copied()
                .ok_or_else(|| PhysicsError::invalid("size", element.clone(), format!("{kind} needs at least {} values", i + 1)))
        };

        let mut pos = parse_vec3(node, "pos")?.unwrap_or_else(Vector3::zeros);
        let mut quat = self.parse_orientation(node)?;
        let fromto = parse_floats(node, "fromto")?;
        if let Some(v) = &fromto {
            if v.len() != 6 {
                return Err(PhysicsError::invalid("fromto", element.clone(), "expected 6 values"));
            }
        }

        let segment = |fromto: &Option<Vec<f64>>| {
            fromto.as_ref().map(|v| {
                let a = Vector3::new(v[0], v[1], v[2]);
                let b = Vector3::new(v[3], v[4], v[5]);
                let dir = b - a;
                let rot = UnitQuaternion::rotation_between(&Vector3::z(), &dir)
                    .unwrap_or_else(|| {
                        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
                    });
                ((a + b) * 0.5, rot, dir.norm() * 0.5)
            })
        };

        let shape = match kind {
            "sphere" => GeomShape::Sphere { radius: size_at(0)? },
            "capsule" | "cylinder" => {
                let radius = size_at(0)?;
                let half_length = match segment(&fromto) {
                    Some((center, rot, half)) => {
                        pos = center;
                        quat = rot;
                        half
                    }
                    None => size_at(1)?,
                };
                if kind == "capsule" {
                    GeomShape::Capsule { radius, half_length }
                } else {
                    GeomShape::Cylinder { radius, half_length }
                }
            }
            "box" => GeomShape::Box {
                half_extents: Vector3::new(size_at(0)?, size_at(1)?, size_at(2)?),
            },
            "plane" => GeomShape::Plane,
            other => return Err(PhysicsError::UnsupportedGeomType(other.to_string())),
        };

        let mut geom = Geom::new(body, shape);
        geom.name = node.attribute("name").map(str::to_string);
        geom.pos = pos;
        geom.quat = quat;
        if let Some(f) = parse_floats(node, "friction")? {
            for (slot, value) in geom.friction.iter_mut().zip(f) {
                *slot = value;
            }
        }
        if let Some(density) = parse_scalar(node, "density")? {
            geom.density = density;
        }
        if let Some(rgba) = parse_floats(node, "rgba")? {
            if rgba.len() == 4 {
                geom.rgba = [rgba[0] as f32, rgba[1] as f32, rgba[2] as f32, rgba[3] as f32];
            }
        }
        Ok(geom)
    }

    fn parse_site(&self, node: Node, body: BodyId) -> Result<Site> {
        let size = parse_floats(node, "size")?.unwrap_or_else(|| vec![0.005]);
        let first = size.first().copied().unwrap_or(0.005);
        Ok(Site {
            name: required(node, "name", "site")?.to_string(),
            body,
            pos: parse_vec3(node, "pos")?.unwrap_or_else(Vector3::zeros),
            quat: self.parse_orientation(node)?,
            size: Vector3::new(
                first,
                size.get(1).copied().unwrap_or(first),
                size.get(2).copied().unwrap_or(first),
            ),
            group: parse_scalar(node, "group")?.unwrap_or(0.0) as u8,
        })
    }

    fn parse_camera(&self, node: Node, body: BodyId) -> Result<Camera> {
        let name = required(node, "name", "camera")?;
        let mode = match node.attribute("mode").unwrap_or("fixed") {
            "fixed" => CameraMode::Fixed,
            "track" | "trackcom" => CameraMode::Track,
            other => {
                return Err(PhysicsError::invalid("mode", name, format!("unsupported camera mode '{other}'")))
            }
        };
        Ok(Camera {
            name: name.to_string(),
            body,
            pos: parse_vec3(node, "pos")?.unwrap_or_else(Vector3::zeros),
            quat: self.parse_orientation(node)?,
            fovy: parse_scalar(node, "fovy")?.unwrap_or(45.0),
            mode,
        })
    }

    fn parse_actuators(&self, scene: &mut Scene, section: Node) -> Result<()> {
        for node in section.children().filter(|n| n.is_element()) {
            let tag = node.tag_name().name();
            let kind = match tag {
                "position" => ActuatorKind::Position {
                    kp: parse_scalar(node, "kp")?.unwrap_or(1.0),
                },
                "velocity" => ActuatorKind::Velocity {
                    kv: parse_scalar(node, "kv")?.unwrap_or(1.0),
                },
                "motor" => ActuatorKind::Motor {
                    gear: parse_floats(node, "gear")?
                        .and_then(|g| g.first().copied())
                        .unwrap_or(1.0),
                },
                _ => continue,
            };
            let joint = required(node, "joint", tag)?;
            let name = node
                .attribute("name")
                .map_or_else(|| format!("actuator_{tag}_{joint}"), str::to_string);
            scene.add_actuator(Actuator {
                name,
                joint: joint.to_string(),
                kind,
                forcerange: parse_pair(node, "forcerange")?,
                ctrlrange: parse_pair(node, "ctrlrange")?,
            })?;
        }
        Ok(())
    }

    fn parse_contacts(&self, scene: &mut Scene, section: Node) -> Result<()> {
        for node in section.children().filter(|n| n.has_tag_name("pair")) {
            let geom1 = required(node, "geom1", "pair")?;
            let geom2 = required(node, "geom2", "pair")?;
            let friction = match parse_floats(node, "friction")? {
                Some(f) if f.len() == 5 => Some([f[0], f[1], f[2], f[3], f[4]]),
                Some(_) => return Err(PhysicsError::invalid("friction", "pair", "expected 5 values")),
                None => None,
            };
            scene.add_contact_pair(ContactPair {
                name: node
                    .attribute("name")
                    .map_or_else(|| format!("{geom1}_{geom2}"), str::to_string),
                geom1: geom1.to_string(),
                geom2: geom2.to_string(),
                solref: parse_pair(node, "solref")?.unwrap_or([0.02, 1.0]),
                margin: parse_scalar(node, "margin")?.unwrap_or(0.0),
                friction,
            })?;
        }
        Ok(())
    }

    fn parse_sensors(&self, scene: &mut Scene, section: Node) -> Result<()> {
        for (i, node) in section.children().filter(|n| n.is_element()).enumerate() {
            let tag = node.tag_name().name();
            let kind = match tag {
                "jointpos" => SensorKind::JointPos { joint: required(node, "joint", tag)?.into() },
                "jointvel" => SensorKind::JointVel { joint: required(node, "joint", tag)?.into() },
                "actuatorfrc" => SensorKind::ActuatorFrc {
                    actuator: required(node, "actuator", tag)?.into(),
                },
                "touch" => SensorKind::Touch { site: required(node, "site", tag)?.into() },
                "framepos" | "framelinvel" | "framequat" | "frameangvel" => {
                    if let Some(objtype) = node.attribute("objtype") {
                        if objtype != "body" && objtype != "xbody" {
                            return Err(PhysicsError::invalid("objtype", tag, format!("unsupported '{objtype}'")));
                        }
                    }
                    let body = required(node, "objname", tag)?.to_string();
                    match tag {
                        "framepos" => SensorKind::FramePos { body },
                        "framelinvel" => SensorKind::FrameLinVel { body },
                        "framequat" => SensorKind::FrameQuat { body },
                        _ => SensorKind::FrameAngVel { body },
                    }
                }
                other => return Err(PhysicsError::UnsupportedSensorType(other.to_string())),
            };
            let name = node
                .attribute("name")
                .map_or_else(|| format!("{tag}_{i}"), str::to_string);
            scene.add_sensor(&name, kind)?;
        }
        Ok(())
    }

    /// `quat` (w x y z), `euler` (intrinsic xyz) or `axisangle`.
    fn parse_orientation(&self, node: Node) -> Result<UnitQuaternion<f64>> {
        let element = node.tag_name().name();
        if let Some(q) = parse_floats(node, "quat")? {
            if q.len() != 4 {
                return Err(PhysicsError::invalid("quat", element, "expected 4 values"));
            }
            return Ok(UnitQuaternion::from_quaternion(Quaternion::new(q[0], q[1], q[2], q[3])));
        }
        if let Some(e) = parse_vec3(node, "euler")? {
            return Ok(euler_xyz(self.angle(e.x), self.angle(e.y), self.angle(e.z)));
        }
        if let Some(a) = parse_floats(node, "axisangle")? {
            if a.len() != 4 {
                return Err(PhysicsError::invalid("axisangle", element, "expected 4 values"));
            }
            return Ok(axis_angle([a[0], a[1], a[2], self.angle(a[3])]));
        }
        Ok(UnitQuaternion::identity())
    }

    fn angle(&self, value: f64) -> f64 {
        if self.angle_in_degrees {
            value.to_radians()
        } else {
            value
        }
    }
}

/// Intrinsic x-y-z Euler rotation.
pub fn euler_xyz(a: f64, b: f64, c: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), a)
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), b)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), c)
}

/// Rotation from `(x, y, z, angle)`; a zero axis yields the identity.
pub fn axis_angle(v: [f64; 4]) -> UnitQuaternion<f64> {
    let axis = Vector3::new(v[0], v[1], v[2]);
    match nalgebra::Unit::try_new(axis, 1e-12) {
        Some(axis) => UnitQuaternion::from_axis_angle(&axis, v[3]),
        None => UnitQuaternion::identity(),
    }
}

fn required<'a>(node: Node<'a, '_>, attribute: &'static str, element: &str) -> Result<&'a str> {
    node.attribute(attribute)
        .ok_or_else(|| PhysicsError::MissingAttribute {
            attribute,
            element: element.to_string(),
        })
}

fn parse_floats(node: Node, attribute: &'static str) -> Result<Option<Vec<f64>>> {
    let Some(text) = node.attribute(attribute) else {
        return Ok(None);
    };
    text.split_whitespace()
        .map(|s| {
            s.parse::<f64>().map_err(|e| {
                PhysicsError::invalid(attribute, node.tag_name().name(), e.to_string())
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn parse_scalar(node: Node, attribute: &'static str) -> Result<Option<f64>> {
    match parse_floats(node, attribute)? {
        Some(v) if v.len() == 1 => Ok(Some(v[0])),
        Some(_) => Err(PhysicsError::invalid(attribute, node.tag_name().name(), "expected 1 value")),
        None => Ok(None),
    }
}

fn parse_pair(node: Node, attribute: &'static str) -> Result<Option<[f64; 2]>> {
    match parse_floats(node, attribute)? {
        Some(v) if v.len() == 2 => Ok(Some([v[0], v[1]])),
        Some(_) => Err(PhysicsError::invalid(attribute, node.tag_name().name(), "expected 2 values")),
        None => Ok(None),
    }
}

fn parse_vec3(node: Node, attribute: &'static str) -> Result<Option<Vector3<f64>>> {
    match parse_floats(node, attribute)? {
        Some(v) if v.len() == 3 => Ok(Some(Vector3::new(v[0], v[1], v[2]))),
        Some(_) => Err(PhysicsError::invalid(attribute, node.tag_name().name(), "expected 3 values")),
        None => Ok(None),
    }
}
