use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec3, Vec4};
use image::error::{ImageError, ParameterError, ParameterErrorKind};

/// Identity of a cubemap, used by backends as the upload cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CubemapId(u64);

/// Cube faces in array-layer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Maps a direction onto a face and `[0, 1]` face coordinates.
    fn project(dir: Vec3) -> (CubeFace, f32, f32) {
        let a = dir.abs();
        let (face, ma, sc, tc) = if a.x >= a.y && a.x >= a.z {
            if dir.x >= 0.0 {
                (CubeFace::PositiveX, a.x, -dir.z, -dir.y)
            } else {
                (CubeFace::NegativeX, a.x, dir.z, -dir.y)
            }
        } else if a.y >= a.z {
            if dir.y >= 0.0 {
                (CubeFace::PositiveY, a.y, dir.x, dir.z)
            } else {
                (CubeFace::NegativeY, a.y, dir.x, -dir.z)
            }
        } else if dir.z >= 0.0 {
            (CubeFace::PositiveZ, a.z, dir.x, -dir.y)
        } else {
            (CubeFace::NegativeZ, a.z, -dir.x, -dir.y)
        };
        let ma = ma.max(f32::EPSILON);
        (face, (sc / ma + 1.0) * 0.5, (tc / ma + 1.0) * 0.5)
    }

    /// Direction through face coordinates `(u, v)`; inverse of [`Self::project`].
    fn direction(self, u: f32, v: f32) -> Vec3 {
        let sc = u * 2.0 - 1.0;
        let tc = v * 2.0 - 1.0;
        match self {
            CubeFace::PositiveX => Vec3::new(1.0, -tc, -sc),
            CubeFace::NegativeX => Vec3::new(-1.0, -tc, sc),
            CubeFace::PositiveY => Vec3::new(sc, 1.0, tc),
            CubeFace::NegativeY => Vec3::new(sc, -1.0, -tc),
            CubeFace::PositiveZ => Vec3::new(sc, -tc, 1.0),
            CubeFace::NegativeZ => Vec3::new(-sc, -tc, -1.0),
        }
        .normalize()
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A six-face environment map drawn by the skybox pass.
///
/// Texels are linear RGBA floats, stored face by face in [`CubeFace::ALL`]
/// order, each face `size * size` texels, row-major.
#[derive(Debug)]
pub struct Cubemap {
    id: CubemapId,
    size: u32,
    texels: Vec<Vec4>,
}

/// Shared reference to a cubemap.
pub type CubemapHandle = Rc<Cubemap>;

impl Cubemap {
    fn from_fn(size: u32, mut texel: impl FnMut(Vec3) -> Vec4) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let size = size.max(1);
        let mut texels = Vec::with_capacity((size * size * 6) as usize);
        for face in CubeFace::ALL {
            for y in 0..size {
                for x in 0..size {
                    let u = (x as f32 + 0.5) / size as f32;
                    let v = (y as f32 + 0.5) / size as f32;
                    texels.push(texel(face.direction(u, v)));
                }
            }
        }
        Self {
            id: CubemapId(NEXT.fetch_add(1, Ordering::Relaxed)),
            size,
            texels,
        }
    }

    /// Every direction returns `color`.
    pub fn solid(color: Vec4) -> Self {
        Self::from_fn(1, |_| color)
    }

    /// A vertical sky gradient: `ground` below the horizon blending to
    /// `horizon` at eye level and `zenith` straight up.
    pub fn gradient(zenith: Vec3, horizon: Vec3, ground: Vec3, size: u32) -> Self {
        Self::from_fn(size, |dir| {
            let color = if dir.y >= 0.0 {
                horizon.lerp(zenith, dir.y.sqrt())
            } else {
                horizon.lerp(ground, (-dir.y * 4.0).min(1.0))
            };
            color.extend(1.0)
        })
    }

    /// Loads six square, equally sized face images in [`CubeFace::ALL`] order.
    pub fn from_files<P: AsRef<Path>>(paths: [P; 6]) -> Result<Self, ImageError> {
        let mut faces = Vec::with_capacity(6);
        for path in &paths {
            faces.push(image::open(path.as_ref())?.to_rgba32f());
        }
        let size = faces[0].width();
        if faces
            .iter()
            .any(|f| f.width() != size || f.height() != size)
        {
            return Err(ImageError::Parameter(ParameterError::from_kind(
                ParameterErrorKind::DimensionMismatch,
            )));
        }

        let mut cubemap = Self::from_fn(size, |_| Vec4::ZERO);
        for (face, image) in faces.iter().enumerate() {
            let offset = face * (size * size) as usize;
            for (i, pixel) in image.pixels().enumerate() {
                cubemap.texels[offset + i] = Vec4::from_array(pixel.0);
            }
        }
        Ok(cubemap)
    }

    pub fn id(&self) -> CubemapId {
        self.id
    }

    /// Edge length of each face in texels.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Nearest-texel lookup along `dir`.
    pub fn sample(&self, dir: Vec3) -> Vec4 {
        let (face, u, v) = CubeFace::project(dir);
        let last = self.size - 1;
        let x = ((u * self.size as f32) as u32).min(last);
        let y = ((v * self.size as f32) as u32).min(last);
        let index = face.index() * (self.size * self.size) as usize + (y * self.size + x) as usize;
        self.texels[index]
    }

    /// Face data as 8-bit RGBA, layer-major, for GPU upload.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.texels
            .iter()
            .flat_map(|t| t.clamp(Vec4::ZERO, Vec4::ONE).to_array())
            .map(|c| (c * 255.0 + 0.5) as u8)
            .collect()
    }
}
