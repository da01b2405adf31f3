//! Contact pair enumeration.
//!
//! The engine only computes contacts between registered geometry pairs.
//! Two families are registered: self contacts between body segments, and
//! floor contacts between body segments and the terrain.

use std::collections::HashSet;

use fly_physics::{BodyId, ContactPair, Scene};
use log::debug;

use crate::error::{NmfError, Result};

pub const SOLREF: [f64; 2] = [-1.0e6, -1.0e4];
pub const MARGIN: f64 = 0.0;

fn pair(name: String, geom1: &str, geom2: &str, friction: Option<[f64; 5]>) -> ContactPair {
    ContactPair {
        name,
        geom1: geom1.to_string(),
        geom2: geom2.to_string(),
        solref: SOLREF,
        margin: MARGIN,
        friction,
    }
}

fn geom_body(body: &Scene, geom: &str) -> Result<BodyId> {
    body.find_geom(geom)
        .map(|g| g.body)
        .ok_or_else(|| NmfError::config(format!("collision geometry '{geom}' not found on the body model")))
}

fn parent_name(body: &Scene, id: BodyId) -> &str {
    let parent = body.body(id).parent.unwrap_or(BodyId::WORLD);
    &body.body(parent).name
}

fn is_child(body: &Scene, child: BodyId, of: BodyId) -> bool {
    let name = &body.body(child).name;
    body.children(of).any(|c| &c.name == name)
}

/// Whether segments carrying the two geometries are close enough in the
/// kinematic tree that contacts between them must be ignored.
///
/// Ancestry is tested one level deep, with a substring match of a link
/// name against the other link's parent name.
pub fn is_adjacent(body: &Scene, a: BodyId, b: BodyId) -> bool {
    let name_a = &body.body(a).name;
    let name_b = &body.body(b).name;
    name_a == name_b
        || is_child(body, a, b)
        || is_child(body, b, a)
        || parent_name(body, b).contains(name_a.as_str())
        || parent_name(body, a).contains(name_b.as_str())
}

/// Pairs between every two geometries of `geoms` whose links are not
/// adjacent. `(a, b)` and `(b, a)` count once; the first-seen order names
/// the pair.
pub fn self_contacts(body: &Scene, geoms: &[String]) -> Result<Vec<ContactPair>> {
    let bodies = geoms
        .iter()
        .map(|g| geom_body(body, g))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for (i, geom1) in geoms.iter().enumerate() {
        for (j, geom2) in geoms.iter().enumerate() {
            if geom1 == geom2 {
                continue;
            }
            let key = if geom1 < geom2 { (geom1, geom2) } else { (geom2, geom1) };
            if seen.contains(&key) {
                continue;
            }
            if is_adjacent(body, bodies[i], bodies[j]) {
                continue;
            }
            seen.insert(key);
            pairs.push(pair(format!("{geom1}_{geom2}"), geom1, geom2, None));
        }
    }
    debug!("Enumerated {} self contact pairs over {} geometries", pairs.len(), geoms.len());
    Ok(pairs)
}

/// Elementwise mean of the two triples, laid out as
/// (slide, slide, spin, roll, roll).
pub fn blend_friction(fly: [f64; 3], terrain: [f64; 3]) -> [f64; 5] {
    let mean = [0, 1, 2].map(|i| (fly[i] + terrain[i]) / 2.0);
    [mean[0], mean[0], mean[1], mean[2], mean[2]]
}

/// A terrain geometry is ground when it has no name, or a name that marks
/// it neither visual nor collision.
pub fn is_ground(name: Option<&str>) -> bool {
    name.map_or(true, |n| !(n.contains("visual") || n.contains("collision")))
}

/// Pair every ground geometry of `terrain` with every body geometry in
/// `geoms`. Anonymous ground geometries are named `groundblock_{k}`.
pub fn floor_contacts(
    terrain: &mut Scene,
    body: &Scene,
    geoms: &[String],
    fly_friction: [f64; 3],
    terrain_friction: [f64; 3],
) -> Result<Vec<ContactPair>> {
    for geom in geoms {
        geom_body(body, geom)?;
    }
    let friction = blend_friction(fly_friction, terrain_friction);

    let mut pairs = Vec::new();
    let mut ground_id = 0;
    for index in 0..terrain.geoms().len() {
        if !is_ground(terrain.geoms()[index].name.as_deref()) || geoms.is_empty() {
            continue;
        }
        let ground = match &terrain.geoms()[index].name {
            Some(name) => name.clone(),
            None => {
                let name = format!("groundblock_{ground_id}");
                ground_id += 1;
                terrain.name_geom(index, &name)?;
                name
            }
        };
        for geom in geoms {
            pairs.push(pair(format!("{ground}_{geom}"), geom, &ground, Some(friction)));
        }
    }
    debug!("Enumerated {} floor contact pairs", pairs.len());
    Ok(pairs)
}
