//! Sensor declarations and the partition of the flat sensor buffer.

use std::ops::Range;

use fly_physics::{Scene, SensorKind, Site};
use nalgebra::{DMatrix, DVector, Matrix4x3, Quaternion, UnitQuaternion, Vector3};

use crate::config::ControlMode;
use crate::error::{NmfError, Result};
use crate::presets;

/// Actuator forces are read in the engine's force unit; joint torques are
/// reported in N.
pub const TORQUE_SCALE: f64 = 1e-9;

pub const THORAX: &str = "Thorax";

/// Radius of the touch sensing volume. It covers the whole segment.
pub const TOUCH_SITE_SIZE: f64 = 1000.0;
pub const TOUCH_SITE_GROUP: u8 = 3;

#[derive(Clone, Debug)]
struct JointSlots {
    pos: usize,
    vel: usize,
    /// Position, velocity and torque actuator forces.
    force: [usize; 3],
}

/// Offsets of every declared sensor in the engine's buffer. Computed once
/// at declaration and stable for the life of the model.
#[derive(Clone, Debug)]
pub struct SensorNetwork {
    joints: Vec<JointSlots>,
    thorax: [Range<usize>; 4],
    end_effectors: Vec<Range<usize>>,
    antennae: Option<Vec<Range<usize>>>,
    touch: Vec<usize>,
    dim: usize,
}

/// One reading of the buffer, split into named quantities.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorReadout {
    /// Rows: position, velocity, torque; one column per actuated joint.
    pub joints: DMatrix<f64>,
    /// Rows: thorax position, linear velocity, orientation as Euler
    /// angles, angular velocity.
    pub fly: Matrix4x3<f64>,
    pub contact_forces: DVector<f64>,
    /// x, y, z of each end effector, concatenated.
    pub end_effectors: DVector<f64>,
    pub antennae: Option<Vec<Vector3<f64>>>,
}

fn missing(kind: &str, name: &str) -> NmfError {
    NmfError::config(format!("{kind} '{name}' not found on the body model"))
}

fn body_sensor(scene: &mut Scene, name: String, kind: SensorKind, body: &str) -> Result<Range<usize>> {
    if scene.find_body(body).is_none() {
        return Err(missing("body", body));
    }
    Ok(scene.add_sensor(&name, kind)?)
}

impl SensorNetwork {
    /// Declare the sensors on `scene`, in buffer order: per actuated joint
    /// position, velocity and the three actuator forces; the thorax
    /// bundle; end effector positions; antennae positions when olfaction
    /// is enabled; one touch sensor per placement.
    pub fn declare(
        scene: &mut Scene,
        actuated_joints: &[String],
        contact_sensor_placements: &[String],
        olfaction: bool,
    ) -> Result<Self> {
        let mut joints = Vec::with_capacity(actuated_joints.len());
        for joint in actuated_joints {
            if scene.find_joint(joint).is_none() {
                return Err(missing("joint", joint));
            }
            let pos = scene.add_sensor(&format!("jointpos_{joint}"), SensorKind::JointPos { joint: joint.clone() })?;
            let vel = scene.add_sensor(&format!("jointvel_{joint}"), SensorKind::JointVel { joint: joint.clone() })?;
            let mut force = [0; 3];
            for (slot, (mode, tag)) in force
                .iter_mut()
                .zip(ControlMode::ALL.iter().zip(["position", "velocity", "motor"]))
            {
                let actuator = mode.actuator_name(joint);
                if scene.actuator_index(&actuator).is_none() {
                    return Err(missing("actuator", &actuator));
                }
                *slot = scene
                    .add_sensor(&format!("actuatorfrc_{tag}_{joint}"), SensorKind::ActuatorFrc { actuator })?
                    .start;
            }
            joints.push(JointSlots { pos: pos.start, vel: vel.start, force });
        }

        let thorax = [
            body_sensor(scene, "thorax_pos".into(), SensorKind::FramePos { body: THORAX.into() }, THORAX)?,
            body_sensor(scene, "thorax_linvel".into(), SensorKind::FrameLinVel { body: THORAX.into() }, THORAX)?,
            body_sensor(scene, "thorax_quat".into(), SensorKind::FrameQuat { body: THORAX.into() }, THORAX)?,
            body_sensor(scene, "thorax_angvel".into(), SensorKind::FrameAngVel { body: THORAX.into() }, THORAX)?,
        ];

        let end_effectors = presets::end_effectors()
            .into_iter()
            .map(|name| body_sensor(scene, format!("{name}_pos"), SensorKind::FramePos { body: name.clone() }, &name))
            .collect::<Result<Vec<_>>>()?;

        let antennae = if olfaction {
            Some(
                presets::ANTENNAE
                    .iter()
                    .map(|&name| body_sensor(scene, format!("{name}_pos"), SensorKind::FramePos { body: name.into() }, name))
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            None
        };

        let mut touch = Vec::with_capacity(contact_sensor_placements.len());
        for placement in contact_sensor_placements {
            let geom_name = format!("{placement}_collision");
            let geom = scene.find_geom(&geom_name).ok_or_else(|| missing("geometry", &geom_name))?;
            let site = Site {
                name: format!("site_{geom_name}"),
                body: geom.body,
                pos: geom.pos,
                quat: geom.quat,
                size: Vector3::repeat(TOUCH_SITE_SIZE),
                group: TOUCH_SITE_GROUP,
            };
            let site_name = site.name.clone();
            scene.add_site(site)?;
            let range = scene.add_sensor(&format!("touch_{geom_name}"), SensorKind::Touch { site: site_name })?;
            touch.push(range.start);
        }

        Ok(Self {
            joints,
            thorax,
            end_effectors,
            antennae,
            touch,
            dim: scene.sensor_dim(),
        })
    }

    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    pub fn num_contacts(&self) -> usize {
        self.touch.len()
    }

    pub fn has_antennae(&self) -> bool {
        self.antennae.is_some()
    }

    /// Length of the buffer this network expects.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn read(&self, data: &[f64]) -> Result<SensorReadout> {
        if data.len() < self.dim {
            return Err(NmfError::config(format!(
                "sensor buffer has {} values, expected {}",
                data.len(),
                self.dim
            )));
        }
        let vec3 = |range: &Range<usize>| Vector3::new(data[range.start], data[range.start + 1], data[range.start + 2]);

        let mut joints = DMatrix::zeros(3, self.joints.len());
        for (i, slots) in self.joints.iter().enumerate() {
            joints[(0, i)] = data[slots.pos];
            joints[(1, i)] = data[slots.vel];
            joints[(2, i)] = slots.force.iter().map(|&o| data[o]).sum::<f64>() * TORQUE_SCALE;
        }

        let q = &data[self.thorax[2].clone()];
        let quat = Quaternion::new(q[0], q[1], q[2], q[3]);
        let orientation = if quat.norm() > 0.0 {
            UnitQuaternion::from_quaternion(quat)
        } else {
            UnitQuaternion::identity()
        };
        let (roll, pitch, yaw) = orientation.euler_angles();
        let fly = Matrix4x3::from_rows(&[
            vec3(&self.thorax[0]).transpose(),
            vec3(&self.thorax[1]).transpose(),
            Vector3::new(roll, pitch, yaw).transpose(),
            vec3(&self.thorax[3]).transpose(),
        ]);

        let contact_forces = DVector::from_iterator(self.touch.len(), self.touch.iter().map(|&o| data[o]));
        let end_effectors = DVector::from_iterator(
            3 * self.end_effectors.len(),
            self.end_effectors.iter().flat_map(|r| data[r.clone()].iter().copied()),
        );
        let antennae = self.antennae.as_ref().map(|ranges| ranges.iter().map(vec3).collect());

        Ok(SensorReadout {
            joints,
            fly,
            contact_forces,
            end_effectors,
            antennae,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template;
    use approx::assert_relative_eq;

    fn declare(olfaction: bool) -> (Scene, SensorNetwork) {
        let mut scene = template::load().unwrap();
        let joints = vec!["joint_LFCoxa".to_string(), "joint_RHTibia".to_string()];
        let placements = vec!["LFTarsus5".to_string(), "RMTibia".to_string()];
        let network = SensorNetwork::declare(&mut scene, &joints, &placements, olfaction).unwrap();
        (scene, network)
    }

    #[test]
    fn test_layout() {
        let (scene, network) = declare(false);
        // 2 joints x 5 + 3 + 3 + 4 + 3 + 6 x 3 + 2
        assert_eq!(network.dim(), 10 + 13 + 18 + 2);
        assert_eq!(scene.sensor_dim(), network.dim());
        assert_eq!(scene.sensors()[0].name, "jointpos_joint_LFCoxa");
        assert_eq!(scene.sensors()[4].name, "actuatorfrc_motor_joint_LFCoxa");
        assert_eq!(
            scene.sensors()[4].kind,
            SensorKind::ActuatorFrc { actuator: "actuator_torque_joint_LFCoxa".into() }
        );
        assert!(!network.has_antennae());
    }

    #[test]
    fn test_touch_site_matches_geometry() {
        let (scene, _) = declare(false);
        let geom = scene.find_geom("RMTibia_collision").unwrap();
        let site = &scene.sites()[scene.site_index("site_RMTibia_collision").unwrap()];
        assert_eq!(site.body, geom.body);
        assert_eq!(site.pos, geom.pos);
        assert_eq!(site.group, 3);
        assert_eq!(site.size.x, 1000.0);
    }

    #[test]
    fn test_antennae_declared_with_olfaction() {
        let (scene, network) = declare(true);
        assert!(network.has_antennae());
        assert!(scene.sensors().iter().any(|s| s.name == "RFuniculus_pos"));
    }

    #[test]
    fn test_read_partitions_buffer() {
        let (_, network) = declare(false);
        let mut data = vec![0.0; network.dim()];
        // joint_LFCoxa
        data[0] = 0.25;
        data[1] = -1.5;
        data[2] = 1.0e9;
        data[3] = 2.0e9;
        data[4] = -0.5e9;
        // thorax position, then identity orientation
        data[10..13].copy_from_slice(&[1.0, 2.0, 3.0]);
        data[16] = 1.0;
        data[41] = 7.0;

        let readout = network.read(&data).unwrap();
        assert_eq!(readout.joints.shape(), (3, 2));
        assert_eq!(readout.joints[(0, 0)], 0.25);
        assert_eq!(readout.joints[(1, 0)], -1.5);
        assert_relative_eq!(readout.joints[(2, 0)], 2.5);
        assert_eq!(readout.fly[(0, 2)], 3.0);
        assert_relative_eq!(readout.fly[(2, 0)], 0.0);
        assert_eq!(readout.end_effectors.len(), 18);
        assert_eq!(readout.contact_forces.as_slice(), &[7.0, 0.0]);
    }

    #[test]
    fn test_orientation_as_euler() {
        let (_, network) = declare(false);
        let mut data = vec![0.0; network.dim()];
        let q = UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3);
        data[16..20].copy_from_slice(&[q.w, q.i, q.j, q.k]);
        let readout = network.read(&data).unwrap();
        assert_relative_eq!(readout.fly[(2, 0)], 0.1, epsilon = 1e-12);
        assert_relative_eq!(readout.fly[(2, 1)], -0.2, epsilon = 1e-12);
        assert_relative_eq!(readout.fly[(2, 2)], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_placement_is_configuration_error() {
        let mut scene = template::load().unwrap();
        let err = SensorNetwork::declare(&mut scene, &[], &["LFWing".to_string()], false).unwrap_err();
        assert!(matches!(err, NmfError::Configuration(_)));
    }
}
