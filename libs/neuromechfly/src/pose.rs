//! Initial joint configurations.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::presets::{self, POSITIONS, SIDES};

/// Joint name to angle in radians. Applied after every reset, only to
/// joints that are actuated; other entries are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitialPose {
    angles: BTreeMap<String, f64>,
}

impl InitialPose {
    pub fn new(angles: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self { angles: angles.into_iter().collect() }
    }

    /// Every leg fully extended.
    pub fn stretched() -> Self {
        Self::new(presets::all_leg_dofs().into_iter().map(|joint| (joint, 0.0)))
    }

    /// Standing posture with the legs flexed under the body.
    pub fn tripod() -> Self {
        let mut angles = BTreeMap::new();
        for side in SIDES {
            for pos in POSITIONS {
                let leg = format!("{side}{pos}");
                let (coxa, femur, tibia) = match pos {
                    'F' => (0.35, 0.9, 1.1),
                    'M' => (0.0, 0.8, 1.2),
                    _ => (-0.3, 0.85, 1.2),
                };
                angles.insert(format!("joint_{leg}Coxa"), coxa);
                angles.insert(format!("joint_{leg}Coxa_roll"), 0.0);
                angles.insert(format!("joint_{leg}Coxa_yaw"), 0.0);
                angles.insert(format!("joint_{leg}Femur"), femur);
                angles.insert(format!("joint_{leg}Femur_roll"), 0.0);
                angles.insert(format!("joint_{leg}Tibia"), tibia);
                angles.insert(format!("joint_{leg}Tarsus1"), -0.6);
            }
        }
        Self { angles }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn get(&self, joint: &str) -> Option<f64> {
        self.angles.get(joint).copied()
    }

    pub fn insert(&mut self, joint: impl Into<String>, angle: f64) {
        self.angles.insert(joint.into(), angle);
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.angles.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
