//! Naming conventions of the NeuroMechFly body model.

use crate::error::{NmfError, Result};

pub const SIDES: [char; 2] = ['L', 'R'];
pub const POSITIONS: [char; 3] = ['F', 'M', 'H'];

/// Actuated degrees of freedom of one leg, proximal to distal.
pub const LEG_DOFS: [&str; 7] = ["Coxa", "Coxa_roll", "Coxa_yaw", "Femur", "Femur_roll", "Tibia", "Tarsus1"];

/// Leg links that carry a collision geometry, proximal to distal.
pub static LEG_LINKS: [&str; 8] = [
    "Coxa", "Femur", "Tibia", "Tarsus1", "Tarsus2", "Tarsus3", "Tarsus4", "Tarsus5",
];

pub const ANTENNAE: [&str; 2] = ["LFuniculus", "RFuniculus"];

pub const COLLISION_PRESETS: [&str; 5] = ["all", "legs", "legs-no-coxa", "tarsi", "none"];

fn legs() -> impl Iterator<Item = String> {
    SIDES
        .into_iter()
        .flat_map(|side| POSITIONS.into_iter().map(move |pos| format!("{side}{pos}")))
}

/// All 42 leg joints.
pub fn all_leg_dofs() -> Vec<String> {
    legs()
        .flat_map(|leg| LEG_DOFS.iter().map(move |dof| format!("joint_{leg}{dof}")))
        .collect()
}

/// Reduced 18-DoF leg model: one coxa, femur and tibia joint per leg.
pub fn leg_dofs_3_per_leg() -> Vec<String> {
    legs()
        .flat_map(|leg| {
            let coxa = if leg.ends_with('F') { "Coxa" } else { "Coxa_roll" };
            [coxa, "Femur", "Tibia"].map(|dof| format!("joint_{leg}{dof}"))
        })
        .collect()
}

/// The 30 tarsal segments, default contact sensor placements.
pub fn all_tarsi_links() -> Vec<String> {
    legs()
        .flat_map(|leg| (1..=5).map(move |i| format!("{leg}Tarsus{i}")))
        .collect()
}

/// Passive tarsal joints made compliant at construction.
pub fn compliant_tarsus_joints() -> Vec<String> {
    legs()
        .flat_map(|leg| (2..=5).map(move |i| format!("joint_{leg}Tarsus{i}")))
        .collect()
}

/// Leg tips whose positions are tracked.
pub fn end_effectors() -> Vec<String> {
    legs().map(|leg| format!("{leg}Tarsus5")).collect()
}

/// Collision geometry names for a named preset. `"all"` depends on the
/// loaded model and is resolved by [`crate::config::CollisionSpec`].
pub fn collision_geoms(preset: &str) -> Result<Vec<String>> {
    let links: &[&str] = match preset {
        "legs" => &LEG_LINKS,
        "legs-no-coxa" => &LEG_LINKS[1..],
        "tarsi" => &LEG_LINKS[3..],
        "none" => &[],
        other => {
            return Err(NmfError::config(format!(
                "unknown collision geometry preset '{other}'"
            )))
        }
    };
    Ok(legs()
        .flat_map(|leg| links.iter().map(move |link| format!("{leg}{link}_collision")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_dof_counts() {
        let dofs = all_leg_dofs();
        assert_eq!(dofs.len(), 42);
        assert_eq!(dofs[0], "joint_LFCoxa");
        assert_eq!(dofs[41], "joint_RHTarsus1");

        let reduced = leg_dofs_3_per_leg();
        assert_eq!(reduced.len(), 18);
        assert_eq!(reduced[0], "joint_LFCoxa");
        assert_eq!(reduced[3], "joint_LMCoxa_roll");
    }

    #[test]
    fn test_tarsi_and_end_effectors() {
        let tarsi = all_tarsi_links();
        assert_eq!(tarsi.len(), 30);
        assert_eq!(tarsi[4], "LFTarsus5");
        assert_eq!(end_effectors(), ["LFTarsus5", "LMTarsus5", "LHTarsus5", "RFTarsus5", "RMTarsus5", "RHTarsus5"]);
        assert_eq!(compliant_tarsus_joints().len(), 24);
    }

    #[test]
    fn test_collision_presets() {
        assert_eq!(collision_geoms("legs").unwrap().len(), 48);
        assert_eq!(collision_geoms("legs-no-coxa").unwrap().len(), 42);
        let tarsi = collision_geoms("tarsi").unwrap();
        assert_eq!(tarsi.len(), 30);
        assert_eq!(tarsi[0], "LFTarsus1_collision");
        assert!(collision_geoms("none").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_preset_is_configuration_error() {
        let err = collision_geoms("wings").unwrap_err();
        assert!(matches!(err, NmfError::Configuration(_)));
    }
}
