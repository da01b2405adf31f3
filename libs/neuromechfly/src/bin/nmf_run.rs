//! Run the fly for a number of steps holding its initial pose and save the
//! rendered video.
//!
//! Usage: `nmf-run [CONFIG_JSON] [STEPS] [OUTPUT_DIR]`

use std::path::PathBuf;

use log::{info, warn};
use neuromechfly::{Action, ControlMode, EnvConfig, NeuroMechFly, NmfError, Result};

const DEFAULT_STEPS: usize = 1000;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).compact().init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = match args.first().filter(|a| !a.is_empty()) {
        Some(path) => EnvConfig::from_json_file(path)?,
        None => EnvConfig::default(),
    };
    let steps = match args.get(1) {
        Some(s) => s
            .parse::<usize>()
            .map_err(|e| NmfError::config(format!("invalid step count '{s}': {e}")))?,
        None => DEFAULT_STEPS,
    };
    if let Some(dir) = args.get(2) {
        config.output_dir = Some(PathBuf::from(dir));
    }

    let mut env = NeuroMechFly::new(config)?;
    let (_, _) = env.reset()?;

    // Hold the initial pose in position mode, apply nothing otherwise.
    let action = match env.model().control() {
        ControlMode::Position => Action::new(
            env.model()
                .actuated_joints()
                .iter()
                .map(|joint| env.config().init_pose.get(joint).unwrap_or(0.0))
                .collect(),
        ),
        ControlMode::Velocity | ControlMode::Torque => Action::zeros(env.model().actuators().len()),
    };

    let mut frames = 0;
    for _ in 0..steps {
        let (observation, _, terminated, truncated, _) = env.step(&action)?;
        if env.render()? {
            frames += 1;
        }
        if terminated || truncated {
            break;
        }
        if observation.fly.iter().any(|v| !v.is_finite()) {
            warn!("Simulation diverged at t = {:.4}s", env.curr_time());
            break;
        }
    }
    let position = env.get_observation()?.fly.row(0).clone_owned();
    info!(
        "Simulated {:.4}s, captured {frames} frames, thorax at ({:.3}, {:.3}, {:.3})",
        env.curr_time(),
        position[0],
        position[1],
        position[2]
    );
    env.close()
}
