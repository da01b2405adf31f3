mod common;

use approx::assert_relative_eq;
use common::{FakeEngine, THORAX_RISE_PER_STEP};
use neuromechfly::contact::blend_friction;
use neuromechfly::{
    template, Action, EnvConfig, FlatTerrain, InitialPose, NeuroMechFly, NmfError, Observation, OdorArena,
    OdorSource, RenderMode, TaskPolicy,
};
use nalgebra::Vector3;
use std::sync::Arc;

type FakeFly = NeuroMechFly<FakeEngine>;

fn fly(config: EnvConfig) -> FakeFly {
    NeuroMechFly::with_arena(config, Box::new(FlatTerrain::default())).unwrap()
}

fn three_joint_config() -> EnvConfig {
    EnvConfig {
        actuated_joints: vec!["joint_LFCoxa".into(), "joint_LFFemur".into(), "joint_LFTibia".into()],
        ..Default::default()
    }
}

#[test]
fn test_step_advances_time_by_one_timestep() {
    let mut env = fly(EnvConfig::default());
    let (first, info) = env.reset().unwrap();
    assert!(info.is_empty());
    assert_eq!(env.curr_time(), 0.0);

    let action = Action::zeros(42);
    let mut time = 0.0;
    for _ in 0..5 {
        let (obs, reward, terminated, truncated, info) = env.step(&action).unwrap();
        time += 1e-4;
        assert_eq!(env.curr_time(), time);
        assert_eq!(obs.joints.shape(), first.joints.shape());
        assert_eq!(obs.joints.shape(), (3, 42));
        assert_eq!(obs.contact_forces.len(), 30);
        assert_eq!(obs.end_effectors.len(), 18);
        assert!(obs.vision.is_none());
        assert!(obs.odor_intensity.is_none());
        assert_eq!(reward, 0.0);
        assert!(!terminated && !truncated && info.is_empty());
    }
    let obs = env.get_observation().unwrap();
    assert_relative_eq!(obs.fly[(0, 2)], 5.0 * THORAX_RISE_PER_STEP);
}

#[test]
fn test_reset_is_bit_identical() {
    let mut env = fly(three_joint_config());
    let (before, _) = env.reset().unwrap();
    for i in 0..10 {
        let t = i as f64 * 0.1;
        env.step(&Action::new(vec![t, -t, 0.5])).unwrap();
        env.render().unwrap();
    }
    assert!(!env.frames().is_empty());

    let (after, _) = env.reset().unwrap();
    assert_eq!(before.joints, after.joints);
    assert_eq!(before.fly, after.fly);
    assert_eq!(before.contact_forces, after.contact_forces);
    assert_eq!(env.curr_time(), 0.0);
    assert!(env.frames().is_empty());
    assert!(env.vision_update_mask().is_empty());
}

#[test]
fn test_position_targets_reach_selected_actuators() {
    let mut env = fly(three_joint_config());
    env.reset().unwrap();
    let (obs, ..) = env.step(&Action::new(vec![0.3, -0.2, 0.1])).unwrap();
    assert_eq!(obs.joints.row(0).iter().copied().collect::<Vec<_>>(), [0.3, -0.2, 0.1]);
    // Torque is the summed actuator force channels.
    assert_relative_eq!(obs.joints[(2, 0)], 0.3e-9);
}

#[test]
fn test_wrong_action_length_is_rejected() {
    let mut env = fly(three_joint_config());
    env.reset().unwrap();
    let err = env.step(&Action::zeros(42)).unwrap_err();
    assert!(matches!(err, NmfError::Action { expected: 3, got: 42 }));
    assert_eq!(env.curr_time(), 0.0);
}

#[test]
fn test_action_space_bounds() {
    let env = fly(three_joint_config());
    let space = env.action_space();
    assert_eq!(space.dim(), 3);
    assert_eq!(space.high[0], std::f64::consts::PI);
    assert!(space.contains(&Action::new(vec![0.0, 3.0, -3.0])));
    assert!(!space.contains(&Action::new(vec![0.0, 4.0, 0.0])));

    let torque = fly(EnvConfig { control: "torque".into(), ..three_joint_config() });
    assert!(torque.action_space().contains(&Action::new(vec![1e6, 0.0, 0.0])));
}

fn joins(pairs: &[fly_physics::ContactPair], a: &str, b: &str) -> bool {
    let (a, b) = (format!("{a}_collision"), format!("{b}_collision"));
    pairs
        .iter()
        .any(|p| (p.geom1 == a && p.geom2 == b) || (p.geom1 == b && p.geom2 == a))
}

#[test]
fn test_self_contacts_skip_adjacent_links() {
    let env = fly(EnvConfig { self_collisions: "all".into(), ..Default::default() });
    let pairs = env.model().self_contacts();
    assert!(!pairs.is_empty());

    // Parent and child segments
    assert!(!joins(pairs, "Thorax", "LFCoxa"));
    assert!(!joins(pairs, "LFCoxa", "LFFemur"));
    assert!(!joins(pairs, "LFTibia", "LFTarsus1"));
    assert!(!joins(pairs, "RHTarsus4", "RHTarsus5"));
    // Separate legs, and a segment two links away from the thorax
    assert!(joins(pairs, "LFTibia", "RFTibia"));
    assert!(joins(pairs, "LFFemur", "RMFemur"));
    assert!(joins(pairs, "Thorax", "LFFemur"));

    let mut keys: Vec<(String, String)> = pairs
        .iter()
        .map(|p| {
            let (a, b) = (p.geom1.clone(), p.geom2.clone());
            if a < b { (a, b) } else { (b, a) }
        })
        .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
}

#[test]
fn test_floor_friction_and_overrides() {
    let mut config = EnvConfig::default();
    config.sim_params.friction = [0.8, 0.004, 0.0002];
    config.sim_params.joint_stiffness = 0.5;
    let arena = FlatTerrain { friction: [1.2, 0.006, 0.0] };
    let env: FakeFly = NeuroMechFly::with_arena(config, Box::new(arena)).unwrap();

    let expected = blend_friction([0.8, 0.004, 0.0002], [1.2, 0.006, 0.0]);
    assert_relative_eq!(expected[0], 1.0);
    assert_eq!(expected[0], expected[1]);
    assert_eq!(expected[3], expected[4]);
    let floor = env.model().floor_contacts();
    assert_eq!(floor.len(), 48);
    assert!(floor.iter().all(|p| p.friction == Some(expected) && p.geom2 == "ground"));

    let engine = env.engine();
    assert_eq!(engine.geom_friction("LFTibia_collision"), [0.8, 0.004, 0.0002]);
    assert_eq!(engine.geom_friction("ground"), [1.2, 0.006, 0.0]);
    assert_eq!(engine.joint_stiffness("joint_LFCoxa"), 0.5);
    assert_eq!(engine.joint_stiffness("joint_LFTarsus3"), 2.2);
    assert_eq!(engine.joint_damping("joint_RHTarsus5"), 0.126);
    assert_eq!(engine.gravity, Vector3::new(0.0, 0.0, -9810.0));
}

#[test]
fn test_vision_cadence() {
    let mut config = three_joint_config();
    config.sim_params.enable_vision = true;
    config.sim_params.render_mode = RenderMode::Headless;
    let mut env = fly(config);
    let (first, _) = env.reset().unwrap();
    let vision = first.vision.as_ref().unwrap();
    assert_eq!(vision[0].shape(), (721, 2));
    // Green reads as 0.8, blue as 0.2.
    assert_relative_eq!(vision[1][(100, 0)], 0.8);
    assert_relative_eq!(vision[1][(100, 1)], 0.2);
    assert!(first.raw_vision.is_none());

    let steps = 400;
    for _ in 0..steps {
        env.step(&Action::zeros(3)).unwrap();
    }
    let mask = env.vision_update_mask();
    assert_eq!(mask.len(), steps);
    let updates = mask.iter().filter(|&&m| m).count();
    // dt * R = 1e-4 * 500
    let fraction = updates as f64 / steps as f64;
    assert!((fraction - 0.05).abs() <= 0.01, "{fraction}");
    // Both eyes on every update, plus the samples taken by the reset at
    // construction and the explicit one.
    assert_eq!(env.engine().renders.len(), 2 * (updates + 2));
    assert!(env.engine().renders.iter().all(|c| c.starts_with("camera_")));
}

#[test]
fn test_construction_resets_the_environment() {
    let mut config = three_joint_config();
    config.sim_params.enable_vision = true;
    config.sim_params.render_mode = RenderMode::Headless;
    let mut env = fly(config);
    assert!(env.state().vision.is_some());
    assert_eq!(env.curr_time(), 0.0);

    let steps = 40;
    for _ in 0..steps {
        env.step(&Action::zeros(3)).unwrap();
    }
    let mask = env.vision_update_mask();
    assert_eq!(mask.len(), steps);
    // Sampled at t = 0, next due after 2 ms.
    assert!(mask[..19].iter().all(|&m| !m));
    assert!(mask.iter().any(|&m| m));
}

#[test]
fn test_vision_is_shared_until_the_next_update() {
    let mut config = three_joint_config();
    config.sim_params.enable_vision = true;
    config.sim_params.render_raw_vision = true;
    config.sim_params.render_mode = RenderMode::Headless;
    let mut env = fly(config);
    let (first, _) = env.reset().unwrap();
    let (second, ..) = env.step(&Action::zeros(3)).unwrap();
    assert!(!env.vision_update_mask()[0]);
    assert!(Arc::ptr_eq(first.raw_vision.as_ref().unwrap(), second.raw_vision.as_ref().unwrap()));
    assert!(Arc::ptr_eq(first.vision.as_ref().unwrap(), second.vision.as_ref().unwrap()));
}

#[test]
fn test_raw_vision_is_kept_on_request() {
    let mut config = three_joint_config();
    config.sim_params.enable_vision = true;
    config.sim_params.render_raw_vision = true;
    let mut env = fly(config);
    let (obs, _) = env.reset().unwrap();
    let raw = obs.raw_vision.unwrap();
    assert_eq!(raw[0].dimensions(), (450, 512));
    assert_eq!(env.observation_space().raw_vision, Some((2, 512, 450, 3)));
}

#[test]
fn test_init_pose_ignores_unmatched_entries() {
    let mut pose = InitialPose::stretched();
    pose.insert("joint_LFCoxa", 0.4);
    pose.insert("joint_LFTibia", -1.1);
    // Not actuated here, and not on the body at all.
    pose.insert("joint_RMFemur", 0.7);
    pose.insert("joint_LFWing", 1.0);
    let config = EnvConfig { init_pose: pose, ..three_joint_config() };
    let mut env = fly(config);

    let (obs, _) = env.reset().unwrap();
    assert_eq!(obs.joints[(0, 0)], 0.4);
    assert_eq!(obs.joints[(0, 1)], 0.0);
    assert_eq!(obs.joints[(0, 2)], -1.1);
}

#[test]
fn test_tripod_pose_applies_to_all_leg_joints() {
    let config = EnvConfig { init_pose: InitialPose::tripod(), ..Default::default() };
    let mut env = fly(config);
    let (obs, _) = env.reset().unwrap();
    let pose = InitialPose::tripod();
    for (i, joint) in env.model().actuated_joints().iter().enumerate() {
        assert_eq!(obs.joints[(0, i)], pose.get(joint).unwrap(), "{joint}");
    }
}

#[test]
fn test_unsupported_render_mode() {
    let mut config = three_joint_config();
    config.sim_params.render_mode = RenderMode::from("interactive");
    let mut env = fly(config);
    env.reset().unwrap();
    let err = env.render().unwrap_err();
    assert!(matches!(err, NmfError::RenderMode(ref mode) if mode == "interactive"));
}

#[test]
fn test_render_cadence_and_headless() {
    let mut env = fly(three_joint_config());
    env.reset().unwrap();
    let mut captured = 0;
    for _ in 0..400 {
        env.step(&Action::zeros(3)).unwrap();
        if env.render().unwrap() {
            captured += 1;
        }
    }
    // One frame every 1/60 s of simulated time, from the first step.
    assert_eq!(captured, 3);
    assert_eq!(env.frames().len(), 3);
    assert_eq!(env.frames()[0].dimensions(), (640, 480));

    let mut config = three_joint_config();
    config.sim_params.render_mode = RenderMode::Headless;
    let mut env = fly(config);
    env.reset().unwrap();
    env.step(&Action::zeros(3)).unwrap();
    assert!(!env.render().unwrap());
    assert!(env.frames().is_empty());
}

#[test]
fn test_close_writes_video_to_output_dir() {
    let dir = std::env::temp_dir().join(format!("nmf-close-{}", std::process::id()));
    let config = EnvConfig { output_dir: Some(dir.clone()), ..three_joint_config() };
    let mut env = fly(config);
    assert!(dir.is_dir());
    env.reset().unwrap();
    for _ in 0..200 {
        env.step(&Action::zeros(3)).unwrap();
        env.render().unwrap();
    }
    env.close().unwrap();
    assert!(dir.join("video.gif").is_file());
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_odor_observation() {
    let mut config = three_joint_config();
    config.sim_params.enable_olfaction = true;
    let arena = OdorArena::new(vec![OdorSource { position: Vector3::new(10.0, 0.0, 0.0), peak: vec![100.0, 50.0] }])
        .unwrap();
    let mut env: FakeFly = NeuroMechFly::with_arena(config, Box::new(arena)).unwrap();
    let (obs, _) = env.reset().unwrap();
    // Antennae read at the origin in the stand-in engine.
    let odor = obs.odor_intensity.unwrap();
    assert_eq!(odor.shape(), (2, 2));
    assert_relative_eq!(odor[(0, 0)], 1.0);
    assert_relative_eq!(odor[(1, 1)], 0.5);
    assert_eq!(env.observation_space().odor_intensity, Some((2, 2)));
}

struct Climb;

impl TaskPolicy for Climb {
    fn reward(&mut self, observation: &Observation) -> f64 {
        observation.fly[(0, 2)]
    }

    fn terminated(&mut self, observation: &Observation) -> bool {
        observation.fly[(0, 2)] >= 3.0 * THORAX_RISE_PER_STEP
    }
}

#[test]
fn test_task_policy_drives_outcome() {
    let mut env = fly(three_joint_config()).with_task(Climb);
    env.reset().unwrap();
    let mut steps = 0;
    loop {
        let (_, reward, terminated, _, _) = env.step(&Action::zeros(3)).unwrap();
        steps += 1;
        assert!(reward > 0.0);
        if terminated {
            break;
        }
    }
    assert_eq!(steps, 3);
}

#[test]
fn test_configuration_errors() {
    let config = EnvConfig { actuated_joints: vec!["joint_LFWing".into()], ..Default::default() };
    let result: Result<FakeFly, _> = NeuroMechFly::with_arena(config, Box::new(FlatTerrain::default()));
    assert!(matches!(result, Err(NmfError::Configuration(_))));

    let config = EnvConfig { self_collisions: "wings".into(), ..Default::default() };
    let result: Result<FakeFly, _> = NeuroMechFly::with_arena(config, Box::new(FlatTerrain::default()));
    assert!(matches!(result, Err(NmfError::Configuration(_))));

    let config = EnvConfig { contact_sensor_placements: vec!["LFWing".into()], ..Default::default() };
    let result: Result<FakeFly, _> =
        NeuroMechFly::with_body(config, Box::new(FlatTerrain::default()), template::load().unwrap());
    assert!(matches!(result, Err(NmfError::Configuration(_))));
}
