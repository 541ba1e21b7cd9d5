//! Average-hash fingerprints of crop images and a nearest-neighbour store.

use image::DynamicImage;
use img_hash::image::{DynamicImage as HashInput, ImageBuffer, Rgba};
use img_hash::{HashAlg, Hasher, HasherConfig, ImageHash};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Why a crop could not be hashed.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("cannot load image '{path}': {source}")]
    Load {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("image buffer of {width}x{height} could not be converted")]
    Buffer { width: u32, height: u32 },
}

/// Mean ("average") hash over a `hash_size × hash_size` grayscale grid.
pub struct PerceptualHasher {
    hasher: Hasher,
    hash_size: u32,
}

impl fmt::Debug for PerceptualHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerceptualHasher")
            .field("hash_size", &self.hash_size)
            .finish()
    }
}

impl PerceptualHasher {
    pub fn new(hash_size: u32) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .hash_size(hash_size, hash_size)
            .to_hasher();
        Self { hasher, hash_size }
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    /// Hash a decoded image.
    ///
    /// `img_hash` is built on an older `image` release, so pixels are handed
    /// over as raw RGBA.
    pub fn hash_image(&self, img: &DynamicImage) -> Result<ImageHash, HashError> {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_raw(width, height, rgba.into_raw())
                .ok_or(HashError::Buffer { width, height })?;
        Ok(self.hasher.hash_image(&HashInput::ImageRgba8(buffer)))
    }

    pub fn hash_file(&self, path: &Path) -> Result<ImageHash, HashError> {
        let img = image::open(path).map_err(|source| HashError::Load {
            path: path.display().to_string(),
            source,
        })?;
        self.hash_image(&img)
    }
}

/// A stored hash close to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    /// The id passed to [`HashIndex::insert`].
    pub id: usize,
    /// Hamming distance in bits.
    pub distance: u32,
}

/// Store of accepted hashes, queried for the closest one.
pub trait HashIndex {
    fn insert(&mut self, hash: ImageHash, id: usize);

    /// Closest stored hash; among equally close ones, the earliest inserted.
    fn nearest(&self, hash: &ImageHash) -> Option<Neighbor>;

    /// Every stored hash within `max_distance` bits, in insertion order.
    fn within(&self, hash: &ImageHash, max_distance: u32) -> Vec<Neighbor>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive scan; fine for the few thousand crops of one run.
#[derive(Default)]
pub struct LinearHashIndex {
    entries: Vec<(ImageHash, usize)>,
}

impl LinearHashIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashIndex for LinearHashIndex {
    fn insert(&mut self, hash: ImageHash, id: usize) {
        self.entries.push((hash, id));
    }

    fn nearest(&self, hash: &ImageHash) -> Option<Neighbor> {
        let mut best: Option<Neighbor> = None;
        for (stored, id) in &self.entries {
            let distance = hash.dist(stored);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Neighbor { id: *id, distance });
            }
        }
        best
    }

    fn within(&self, hash: &ImageHash, max_distance: u32) -> Vec<Neighbor> {
        self.entries
            .iter()
            .map(|(stored, id)| Neighbor {
                id: *id,
                distance: hash.dist(stored),
            })
            .filter(|n| n.distance <= max_distance)
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn stripes(width: u32, height: u32, band: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
            if (x / band) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    fn split(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, y| {
            if y < height / 2 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        }))
    }

    #[test]
    fn rescaled_image_hashes_close() {
        let h = PerceptualHasher::new(16);
        let a = h.hash_image(&stripes(256, 256, 32)).unwrap();
        let b = h.hash_image(&stripes(512, 512, 64)).unwrap();
        assert!(a.dist(&b) <= 5, "distance {}", a.dist(&b));
    }

    #[test]
    fn different_images_hash_far_apart() {
        let h = PerceptualHasher::new(16);
        let a = h.hash_image(&stripes(256, 256, 32)).unwrap();
        let b = h.hash_image(&split(256, 256)).unwrap();
        assert!(a.dist(&b) > 5);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let h = PerceptualHasher::new(16);
        let err = h.hash_file(Path::new("/nonexistent/crop.png")).unwrap_err();
        assert!(matches!(err, HashError::Load { .. }));
    }

    #[test]
    fn nearest_prefers_closest_then_earliest() {
        let h = PerceptualHasher::new(16);
        let stripes_hash = h.hash_image(&stripes(256, 256, 32)).unwrap();
        let split_hash = h.hash_image(&split(256, 256)).unwrap();

        let mut index = LinearHashIndex::new();
        assert!(index.nearest(&stripes_hash).is_none());
        index.insert(split_hash.clone(), 0);
        index.insert(stripes_hash.clone(), 1);
        index.insert(stripes_hash.clone(), 2);

        let n = index.nearest(&stripes_hash).unwrap();
        assert_eq!(n, Neighbor { id: 1, distance: 0 });
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn within_returns_every_close_hash_in_insertion_order() {
        let h = PerceptualHasher::new(16);
        let stripes_hash = h.hash_image(&stripes(256, 256, 32)).unwrap();
        let split_hash = h.hash_image(&split(256, 256)).unwrap();

        let mut index = LinearHashIndex::new();
        index.insert(stripes_hash.clone(), 0);
        index.insert(split_hash, 1);
        index.insert(stripes_hash.clone(), 2);

        let ids: Vec<usize> = index.within(&stripes_hash, 5).into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(LinearHashIndex::new().within(&stripes_hash, 64).is_empty());
    }
}
