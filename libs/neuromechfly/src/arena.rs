//! Terrains the fly is spawned into.

use fly_physics::{BodyId, Geom, GeomShape, Scene};
use nalgebra::{DMatrix, Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{NmfError, Result};

pub const DEFAULT_FRICTION: [f64; 3] = [1.0, 0.005, 0.0001];

const GROUND_RGBA: [f32; 4] = [0.3, 0.3, 0.35, 1.0];
const BLOCK_RGBA: [f32; 4] = [0.35, 0.33, 0.3, 1.0];

/// The world the fly lives in: terrain geometries on the world body, the
/// friction they contribute to floor contacts, and an optional odor field.
pub trait Arena {
    /// A fresh terrain scene. Ground geometries are either anonymous or
    /// named without `visual` or `collision`.
    fn scene(&self) -> Result<Scene>;

    /// Sliding, torsional, rolling.
    fn friction(&self) -> [f64; 3] {
        DEFAULT_FRICTION
    }

    /// Frame the fly's root is attached at, from a position and an
    /// axis-angle `(x, y, z, angle)`.
    fn spawn_frame(&self, pos: [f64; 3], orient: [f64; 4]) -> Isometry3<f64> {
        let axis = Vector3::new(orient[0], orient[1], orient[2]);
        let rotation = Unit::try_new(axis, 1e-12)
            .map(|axis| UnitQuaternion::from_axis_angle(&axis, orient[3]))
            .unwrap_or_else(UnitQuaternion::identity);
        Isometry3::from_parts(Translation3::new(pos[0], pos[1], pos[2]), rotation)
    }

    /// Number of independent odors in the field.
    fn odor_dimensions(&self) -> usize {
        0
    }

    /// Intensity of each odor at each position, odors by positions.
    fn odor_intensity(&self, positions: &[Vector3<f64>]) -> DMatrix<f64> {
        DMatrix::zeros(self.odor_dimensions(), positions.len())
    }
}

/// An infinite flat floor.
#[derive(Clone, Debug)]
pub struct FlatTerrain {
    pub friction: [f64; 3],
}

impl Default for FlatTerrain {
    fn default() -> Self {
        Self { friction: DEFAULT_FRICTION }
    }
}

impl Arena for FlatTerrain {
    fn scene(&self) -> Result<Scene> {
        let mut scene = Scene::new("flat_terrain");
        let mut ground = Geom::new(BodyId::WORLD, GeomShape::Plane);
        ground.name = Some("ground".to_string());
        ground.friction = self.friction;
        ground.rgba = GROUND_RGBA;
        scene.add_geom(ground)?;
        Ok(scene)
    }

    fn friction(&self) -> [f64; 3] {
        self.friction
    }
}

/// A checkerboard of square blocks. Every other block is raised by a
/// random amount drawn from `height_range`.
#[derive(Clone, Debug)]
pub struct BlocksTerrain {
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    pub block_size: f64,
    pub height_range: (f64, f64),
    pub friction: [f64; 3],
    pub seed: u64,
}

impl Default for BlocksTerrain {
    fn default() -> Self {
        Self {
            x_range: (-10.0, 35.0),
            y_range: (-20.0, 20.0),
            block_size: 1.3,
            height_range: (0.35, 0.35),
            friction: DEFAULT_FRICTION,
            seed: 0,
        }
    }
}

impl BlocksTerrain {
    fn centres(range: (f64, f64), size: f64) -> Vec<f64> {
        let mut centres = Vec::new();
        let mut c = range.0;
        while c < range.1 {
            centres.push(c);
            c += size;
        }
        centres
    }
}

impl Arena for BlocksTerrain {
    fn scene(&self) -> Result<Scene> {
        if !(self.block_size > 0.0) || self.height_range.0 > self.height_range.1 {
            return Err(NmfError::config(format!(
                "invalid block terrain: size {}, heights {:?}",
                self.block_size, self.height_range
            )));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut scene = Scene::new("blocks_terrain");
        let half = self.block_size / 2.0;
        // Blocks reach this far below z = 0 so raised and flush blocks
        // share a bottom.
        let depth = self.block_size;

        for (i, x) in Self::centres(self.x_range, self.block_size).into_iter().enumerate() {
            for (j, y) in Self::centres(self.y_range, self.block_size).into_iter().enumerate() {
                let top = if (i + j) % 2 == 1 {
                    if self.height_range.0 < self.height_range.1 {
                        rng.random_range(self.height_range.0..self.height_range.1)
                    } else {
                        self.height_range.0
                    }
                } else {
                    0.0
                };
                let mut block = Geom::new(
                    BodyId::WORLD,
                    GeomShape::Box { half_extents: Vector3::new(half, half, (top + depth) / 2.0) },
                );
                block.pos = Vector3::new(x, y, (top - depth) / 2.0);
                block.friction = self.friction;
                block.rgba = BLOCK_RGBA;
                scene.add_geom(block)?;
            }
        }
        Ok(scene)
    }

    fn friction(&self) -> [f64; 3] {
        self.friction
    }
}

/// One odor emitter. `peak` holds its intensity per odor dimension at
/// unit distance.
#[derive(Clone, Debug, PartialEq)]
pub struct OdorSource {
    pub position: Vector3<f64>,
    pub peak: Vec<f64>,
}

/// Flat terrain with point odor sources whose intensity falls off with
/// the squared distance.
#[derive(Clone, Debug)]
pub struct OdorArena {
    pub terrain: FlatTerrain,
    sources: Vec<OdorSource>,
    dimensions: usize,
}

impl OdorArena {
    pub fn new(sources: Vec<OdorSource>) -> Result<Self> {
        let dimensions = sources.first().map_or(0, |s| s.peak.len());
        if let Some(bad) = sources.iter().find(|s| s.peak.len() != dimensions) {
            return Err(NmfError::config(format!(
                "odor source at {:?} has {} dimensions, expected {dimensions}",
                bad.position.as_slice(),
                bad.peak.len()
            )));
        }
        Ok(Self {
            terrain: FlatTerrain::default(),
            sources,
            dimensions,
        })
    }

    pub fn sources(&self) -> &[OdorSource] {
        &self.sources
    }
}

impl Arena for OdorArena {
    fn scene(&self) -> Result<Scene> {
        let mut scene = self.terrain.scene()?;
        for (i, source) in self.sources.iter().enumerate() {
            let mut marker = Geom::new(BodyId::WORLD, GeomShape::Sphere { radius: 0.25 });
            marker.name = Some(format!("odor_source_{i}_visual"));
            marker.pos = source.position;
            marker.density = 0.0;
            marker.rgba = [0.9, 0.2, 0.2, 1.0];
            scene.add_geom(marker)?;
        }
        Ok(scene)
    }

    fn friction(&self) -> [f64; 3] {
        self.terrain.friction
    }

    fn odor_dimensions(&self) -> usize {
        self.dimensions
    }

    fn odor_intensity(&self, positions: &[Vector3<f64>]) -> DMatrix<f64> {
        DMatrix::from_fn(self.dimensions, positions.len(), |dim, p| {
            self.sources
                .iter()
                .map(|s| {
                    let d2 = (positions[p] - s.position).norm_squared();
                    if d2 > 0.0 {
                        s.peak[dim] / d2
                    } else {
                        f64::INFINITY
                    }
                })
                .sum()
        })
    }
}
