//! Built-in NeuroMechFly body description.
//!
//! A capsule skeleton of the adult fly in millimetres: thorax, head with
//! antennae, abdomen and six legs of eight segments each. Every leg DoF
//! carries a position, a velocity and a torque actuator; gains start at
//! zero and are set by the model builder for the selected control mode.

use fly_physics::{MjcfLoader, Scene};

use crate::error::Result;
use crate::presets::{LEG_DOFS, POSITIONS, SIDES};

/// Uniform density of the body segments.
pub const DENSITY: f64 = 1.0e-3;

const CUTICLE: &str = "0.55 0.4 0.25 1";
const LEG: &str = "0.6 0.45 0.3 1";
const EYE: &str = "0.7 0.12 0.1 1";

// (length, radius) of each leg segment
const COXA: (f64, f64) = (0.32, 0.07);
const FEMUR: (f64, f64) = (0.75, 0.055);
const TIBIA: (f64, f64) = (0.65, 0.04);
const TARSUS1: (f64, f64) = (0.2, 0.03);
const TARSUS: (f64, f64) = (0.08, 0.025);

const JOINT_STIFFNESS: f64 = 0.05;
const JOINT_DAMPING: f64 = 0.06;

/// Parse the built-in body into a scene.
pub fn load() -> Result<Scene> {
    Ok(MjcfLoader::load_str(&mjcf())?)
}

pub fn mjcf() -> String {
    let mut xml = String::from(
        r#"<mujoco model="neuromechfly">
  <compiler angle="radian"/>
  <option timestep="0.0001" gravity="0 0 -9810"/>
  <worldbody>
    <body name="Thorax" pos="0 0 0">
      <freejoint/>
"#,
    );
    xml.push_str(&capsule("Thorax_collision", [-0.45, 0.0, 0.0], [0.4, 0.0, 0.0], 0.3, CUTICLE));
    xml.push_str(&visual_capsule("Thorax_visual", [-0.45, 0.0, 0.05], [0.4, 0.0, 0.05], 0.28));
    xml.push_str(
        "      <camera name=\"camera_left_top\" mode=\"track\" pos=\"0 8 5\" quat=\"0 0 0.4848 0.8747\" fovy=\"40\"/>\n",
    );
    xml.push_str(&head());
    xml.push_str(&format!(
        "      <body name=\"A1A2\" pos=\"-0.45 0 -0.05\">\n{}{}      </body>\n",
        capsule("A1A2_collision", [0.0; 3], [-0.8, 0.0, -0.15], 0.33, CUTICLE),
        visual_capsule("A1A2_visual", [0.0; 3], [-0.8, 0.0, -0.1], 0.3),
    ));
    for side in SIDES {
        for pos in POSITIONS {
            xml.push_str(&leg(side, pos));
        }
    }
    xml.push_str("    </body>\n  </worldbody>\n  <actuator>\n");
    for joint in actuated_leg_joints() {
        xml.push_str(&format!(
            "    <position name=\"actuator_position_{joint}\" joint=\"{joint}\" kp=\"0\"/>\n"
        ));
        xml.push_str(&format!(
            "    <velocity name=\"actuator_velocity_{joint}\" joint=\"{joint}\" kv=\"0\"/>\n"
        ));
        xml.push_str(&format!(
            "    <motor name=\"actuator_torque_{joint}\" joint=\"{joint}\" gear=\"1\"/>\n"
        ));
    }
    xml.push_str("  </actuator>\n</mujoco>\n");
    xml
}

fn actuated_leg_joints() -> impl Iterator<Item = String> {
    SIDES.into_iter().flat_map(|side| {
        POSITIONS
            .into_iter()
            .flat_map(move |pos| LEG_DOFS.iter().map(move |dof| format!("joint_{side}{pos}{dof}")))
    })
}

fn vec3(v: [f64; 3]) -> String {
    format!("{} {} {}", v[0], v[1], v[2])
}

fn capsule(name: &str, from: [f64; 3], to: [f64; 3], radius: f64, rgba: &str) -> String {
    format!(
        "      <geom name=\"{name}\" type=\"capsule\" fromto=\"{} {}\" size=\"{radius}\" density=\"{DENSITY}\" rgba=\"{rgba}\"/>\n",
        vec3(from),
        vec3(to)
    )
}

fn visual_capsule(name: &str, from: [f64; 3], to: [f64; 3], radius: f64) -> String {
    format!(
        "      <geom name=\"{name}\" type=\"capsule\" fromto=\"{} {}\" size=\"{radius}\" density=\"0\" rgba=\"{CUTICLE}\"/>\n",
        vec3(from),
        vec3(to)
    )
}

fn joint(name: &str, axis: [f64; 3]) -> String {
    format!(
        "      <joint name=\"{name}\" axis=\"{}\" stiffness=\"{JOINT_STIFFNESS}\" damping=\"{JOINT_DAMPING}\"/>\n",
        vec3(axis)
    )
}

fn head() -> String {
    let mut xml = String::from("      <body name=\"Head\" pos=\"0.6 0 0.15\">\n");
    xml.push_str(&format!(
        "      <geom name=\"Head_collision\" type=\"sphere\" size=\"0.3\" density=\"{DENSITY}\" rgba=\"{CUTICLE}\"/>\n"
    ));
    for (side, s) in [('L', 1.0), ('R', -1.0)] {
        xml.push_str(&format!(
            "      <geom name=\"{side}Eye_visual\" type=\"sphere\" pos=\"0.08 {} 0.05\" size=\"0.17\" density=\"0\" rgba=\"{EYE}\"/>\n",
            0.2 * s
        ));
        xml.push_str(&format!(
            "      <body name=\"{side}Pedicel\" pos=\"0.25 {} 0.15\">\n",
            0.1 * s
        ));
        xml.push_str(&capsule(&format!("{side}Pedicel_collision"), [0.0; 3], [0.08, 0.02 * s, 0.1], 0.03, LEG));
        xml.push_str(&format!(
            "      <body name=\"{side}Funiculus\" pos=\"0.08 {} 0.1\">\n",
            0.02 * s
        ));
        xml.push_str(&capsule(&format!("{side}Funiculus_collision"), [0.0; 3], [0.05, 0.0, -0.12], 0.035, LEG));
        xml.push_str("      </body>\n      </body>\n");
    }
    xml.push_str("      </body>\n");
    xml
}

/// One leg, `side` L (+y) or R (-y). At zero angles the coxa hangs down
/// and the distal segments stretch out sideways.
fn leg(side: char, pos: char) -> String {
    let s = if side == 'L' { 1.0 } else { -1.0 };
    let x = match pos {
        'F' => 0.3,
        'M' => 0.0,
        _ => -0.25,
    };
    let leg = format!("{side}{pos}");
    let flex = [-s, 0.0, 0.0];
    let along = [0.0, s, 0.0];

    let mut xml = format!("      <body name=\"{leg}Coxa\" pos=\"{x} {} -0.2\">\n", 0.2 * s);
    xml.push_str(&joint(&format!("joint_{leg}Coxa"), [0.0, 1.0, 0.0]));
    xml.push_str(&joint(&format!("joint_{leg}Coxa_roll"), [1.0, 0.0, 0.0]));
    xml.push_str(&joint(&format!("joint_{leg}Coxa_yaw"), [0.0, 0.0, 1.0]));
    let coxa_end = [0.0, 0.1 * s, -COXA.0];
    xml.push_str(&capsule(&format!("{leg}Coxa_collision"), [0.0; 3], coxa_end, COXA.1, LEG));

    xml.push_str(&format!("      <body name=\"{leg}Femur\" pos=\"{}\">\n", vec3(coxa_end)));
    xml.push_str(&joint(&format!("joint_{leg}Femur"), flex));
    xml.push_str(&joint(&format!("joint_{leg}Femur_roll"), along));
    xml.push_str(&capsule(&format!("{leg}Femur_collision"), [0.0; 3], [0.0, FEMUR.0 * s, 0.0], FEMUR.1, LEG));

    xml.push_str(&format!("      <body name=\"{leg}Tibia\" pos=\"0 {} 0\">\n", FEMUR.0 * s));
    xml.push_str(&joint(&format!("joint_{leg}Tibia"), flex));
    xml.push_str(&capsule(&format!("{leg}Tibia_collision"), [0.0; 3], [0.0, TIBIA.0 * s, 0.0], TIBIA.1, LEG));

    let mut offset = TIBIA.0;
    for i in 1..=5 {
        let (length, radius) = if i == 1 { TARSUS1 } else { TARSUS };
        xml.push_str(&format!("      <body name=\"{leg}Tarsus{i}\" pos=\"0 {} 0\">\n", offset * s));
        xml.push_str(&joint(&format!("joint_{leg}Tarsus{i}"), flex));
        xml.push_str(&capsule(
            &format!("{leg}Tarsus{i}_collision"),
            [0.0; 3],
            [0.0, length * s, 0.0],
            radius,
            LEG,
        ));
        offset = length;
    }
    // Tarsus1-5, Tibia, Femur, Coxa
    xml.push_str(&"      </body>\n".repeat(8));
    xml
}
