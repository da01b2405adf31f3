//! Ray-cast camera over the Rapier query pipeline.
//!
//! One ray per pixel against every collider in the scene, shaded with a
//! headlight Lambert term and the geometry's RGBA colour.

use image::{Rgb, RgbImage};
use nalgebra as na;
use rapier3d::prelude::*;

use crate::scene::{Camera, CameraMode, Geom, Scene};

const MAX_DEPTH: Real = 1.0e4;
const AMBIENT: Real = 0.25;
const BACKGROUND: [u8; 3] = [26, 26, 31];

/// World pose of `camera` given the current pose of its body.
pub fn camera_pose(scene: &Scene, camera: &Camera, body_pose: &Isometry<Real>) -> Isometry<Real> {
    let local = na::Isometry3::from_parts(na::Translation3::from(camera.pos), camera.quat).cast::<Real>();
    match camera.mode {
        CameraMode::Fixed => body_pose * local,
        CameraMode::Track => {
            let reference = scene.reference_pose(camera.body).rotation.cast::<Real>();
            Isometry::from_parts(
                Translation::from(body_pose.translation.vector + reference * local.translation.vector),
                reference * local.rotation,
            )
        }
    }
}

pub fn render(
    pose: &Isometry<Real>,
    fovy_degrees: f64,
    width: u32,
    height: u32,
    geoms: &[Geom],
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    query_pipeline: &QueryPipeline,
) -> RgbImage {
    let tan_y = (fovy_degrees.to_radians() * 0.5).tan() as Real;
    let aspect = width as Real / height.max(1) as Real;
    let origin = Point::from(pose.translation.vector);

    let visible = |_: ColliderHandle, collider: &Collider| {
        geoms
            .get(collider.user_data as usize)
            .map_or(true, |g| g.rgba[3] > 0.05)
    };
    let filter = QueryFilter::default().predicate(&visible);

    RgbImage::from_fn(width, height, |px, py| {
        let x = (2.0 * (px as Real + 0.5) / width as Real - 1.0) * tan_y * aspect;
        let y = (1.0 - 2.0 * (py as Real + 0.5) / height as Real) * tan_y;
        let dir = pose.rotation * vector![x, y, -1.0].normalize();
        let ray = Ray::new(origin, dir);

        match query_pipeline.cast_ray_and_get_normal(bodies, colliders, &ray, MAX_DEPTH, true, filter) {
            Some((handle, hit)) => {
                let rgba = colliders
                    .get(handle)
                    .and_then(|c| geoms.get(c.user_data as usize))
                    .map_or([0.5, 0.5, 0.5, 1.0], |g| g.rgba);
                let shade = AMBIENT + (1.0 - AMBIENT) * (-hit.normal.dot(&dir)).max(0.0);
                Rgb([
                    (rgba[0] * shade * 255.0).clamp(0.0, 255.0) as u8,
                    (rgba[1] * shade * 255.0).clamp(0.0, 255.0) as u8,
                    (rgba[2] * shade * 255.0).clamp(0.0, 255.0) as u8,
                ])
            }
            None => Rgb(BACKGROUND),
        }
    })
}
