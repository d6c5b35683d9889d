use std::collections::{HashMap, HashSet};

use bit_vec::BitVec;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::debug;

use crate::config::IndexConfig;
use crate::error::{QaError, Result};
use crate::model::MessageId;
use crate::vector::{dot, VectorSpace};

/// Signed Random Projection index for cosine similarity.
///
/// `n_planes` Gaussian hyperplanes are drawn once from the seed. A vector's
/// signature has bit `i` set when its dot product with plane `i` is `>= 0`.
/// The signature is cut into `n_bands` contiguous bands of `band_size` bits
/// and each band's bits, packed into an integer, key one bucket table.
/// Any two vectors sharing a whole band collide in that band's bucket.
///
/// Planes are immutable for the life of the index; regenerating them means
/// rebuilding from scratch.
#[derive(Debug)]
pub struct SrpIndex {
    space: VectorSpace,
    n_planes: usize,
    n_bands: usize,
    band_size: usize,
    seed: u64,
    // Row-major, n_planes x dim
    planes: Vec<f32>,
    // buckets[band][band_key] -> item ids
    buckets: Vec<HashMap<u64, Vec<MessageId>>>,
    inserted: usize,
}

impl SrpIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let space = VectorSpace::new(config.dim)?;
        let (n_planes, n_bands) = (config.n_planes, config.n_bands);

        if n_planes == 0 || n_bands == 0 {
            return Err(QaError::Configuration(format!(
                "n_planes ({}) and n_bands ({}) must be non-zero", n_planes, n_bands
            )));
        }
        if n_planes % n_bands != 0 {
            return Err(QaError::Configuration(format!(
                "n_planes ({}) is not divisible by n_bands ({})", n_planes, n_bands
            )));
        }
        let band_size = n_planes / n_bands;
        if band_size > u64::BITS as usize {
            return Err(QaError::Configuration(format!(
                "band size {} exceeds the 64-bit band key", band_size
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let planes = (0..n_planes * config.dim)
            .map(|_| StandardNormal.sample(&mut rng))
            .collect();

        debug!(dim = config.dim, n_planes, n_bands, band_size, seed = config.seed, "SRP planes generated");

        Ok(Self {
            space,
            n_planes,
            n_bands,
            band_size,
            seed: config.seed,
            planes,
            buckets: vec![HashMap::new(); n_bands],
            inserted: 0,
        })
    }

    pub fn space(&self) -> VectorSpace {
        self.space
    }

    pub fn n_planes(&self) -> usize {
        self.n_planes
    }

    pub fn n_bands(&self) -> usize {
        self.n_bands
    }

    pub fn band_size(&self) -> usize {
        self.band_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of `insert` calls, duplicates included.
    pub fn len(&self) -> usize {
        self.inserted
    }

    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    /// Total non-empty buckets across all bands.
    pub fn bucket_count(&self) -> usize {
        self.buckets.iter().map(HashMap::len).sum()
    }

    pub fn clear(&mut self) {
        for band in &mut self.buckets {
            band.clear();
        }
        self.inserted = 0;
    }

    pub fn signature(&self, v: &[f32]) -> Result<BitVec> {
        self.space.check(v)?;
        let dim = self.space.dim();
        let mut bits = BitVec::from_elem(self.n_planes, false);
        for (i, plane) in self.planes.chunks_exact(dim).enumerate() {
            if dot(plane, v) >= 0.0 {
                bits.set(i, true);
            }
        }
        Ok(bits)
    }

    /// Packs band `band`'s bits `[band * band_size, (band + 1) * band_size)`
    /// into an integer, bit `j` of the slice landing on bit `j` of the key.
    ///
    /// Returns `None` for an out-of-range band or a signature of the wrong length.
    pub fn band_key(&self, signature: &BitVec, band: usize) -> Option<u64> {
        if band >= self.n_bands || signature.len() != self.n_planes {
            return None;
        }
        Some(self.band_key_unchecked(signature, band))
    }

    // Callers guarantee `band < n_bands` and a full-length signature.
    fn band_key_unchecked(&self, signature: &BitVec, band: usize) -> u64 {
        signature
            .iter()
            .skip(band * self.band_size)
            .take(self.band_size)
            .enumerate()
            .fold(0u64, |key, (j, bit)| key | (u64::from(bit) << j))
    }

    /// Appends `id` to one bucket per band. Repeated ids are not de-duplicated.
    pub fn insert(&mut self, id: MessageId, v: &[f32]) -> Result<()> {
        let signature = self.signature(v)?;
        for band in 0..self.n_bands {
            let key = self.band_key_unchecked(&signature, band);
            self.buckets[band].entry(key).or_default().push(id);
        }
        self.inserted += 1;
        Ok(())
    }

    /// Union of the query's bucket in every band.
    pub fn candidates(&self, query: &[f32]) -> Result<HashSet<MessageId>> {
        let signature = self.signature(query)?;
        let mut out = HashSet::new();
        if self.is_empty() {
            return Ok(out);
        }
        for band in 0..self.n_bands {
            let key = self.band_key_unchecked(&signature, band);
            if let Some(ids) = self.buckets[band].get(&key) {
                out.extend(ids.iter().copied());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dim: usize, n_planes: usize, n_bands: usize) -> IndexConfig {
        IndexConfig { dim, n_planes, n_bands, seed: 7 }
    }

    fn unit(v: &[f32]) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    #[test]
    fn indivisible_bands_fail_construction() {
        let err = SrpIndex::new(&config(8, 10, 3)).unwrap_err();
        assert!(matches!(err, QaError::Configuration(_)));
    }

    #[test]
    fn oversized_band_is_rejected() {
        assert!(SrpIndex::new(&config(8, 128, 1)).is_err());
        assert!(SrpIndex::new(&config(8, 128, 2)).is_ok());
    }

    #[test]
    fn signature_has_one_bit_per_plane() {
        let index = SrpIndex::new(&config(16, 64, 8)).unwrap();
        let sig = index.signature(&unit(&[1.0; 16])).unwrap();
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn bands_cover_every_bit_exactly_once() {
        let index = SrpIndex::new(&config(4, 12, 3)).unwrap();
        // Setting a single bit must light up exactly one band, at the expected position.
        for bit in 0..12 {
            let mut sig = BitVec::from_elem(12, false);
            sig.set(bit, true);
            let keys: Vec<u64> = (0..3).map(|b| index.band_key(&sig, b).unwrap()).collect();
            let owner = bit / 4;
            for (band, key) in keys.iter().enumerate() {
                if band == owner {
                    assert_eq!(*key, 1u64 << (bit % 4));
                } else {
                    assert_eq!(*key, 0);
                }
            }
        }
    }

    #[test]
    fn band_key_rejects_bad_input() {
        let index = SrpIndex::new(&config(4, 4, 2)).unwrap();
        let sig = BitVec::from_elem(4, true);
        assert_eq!(index.band_key(&sig, 2), None);
        assert_eq!(index.band_key(&BitVec::from_elem(3, true), 0), None);
        assert_eq!(index.band_key(&sig, 1), Some(0b11));
    }

    #[test]
    fn planes_are_finite_standard_normal_draws() {
        let index = SrpIndex::new(&config(32, 64, 8)).unwrap();
        assert_eq!(index.planes.len(), 64 * 32);
        assert!(index.planes.iter().all(|x| x.is_finite()));
        let n = index.planes.len() as f32;
        let mean = index.planes.iter().sum::<f32>() / n;
        let var = index.planes.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
        assert!(mean.abs() < 0.1, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.15, "variance {}", var);
    }

    #[test]
    fn internal_band_keys_match_public_band_key() {
        let index = SrpIndex::new(&config(8, 16, 4)).unwrap();
        let sig = index.signature(&unit(&[0.3, -1.0, 2.0, 0.1, -0.4, 0.9, 1.1, -0.2])).unwrap();
        for band in 0..4 {
            assert_eq!(index.band_key(&sig, band), Some(index.band_key_unchecked(&sig, band)));
        }
    }

    #[test]
    fn same_seed_gives_same_signatures() {
        let a = SrpIndex::new(&config(16, 32, 4)).unwrap();
        let b = SrpIndex::new(&config(16, 32, 4)).unwrap();
        let v = unit(&(0..16).map(|i| (i as f32).sin()).collect::<Vec<_>>());
        assert_eq!(a.signature(&v).unwrap(), b.signature(&v).unwrap());
    }

    #[test]
    fn identical_query_always_collides() {
        let mut index = SrpIndex::new(&config(4, 4, 2)).unwrap();
        index.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        let found = index.candidates(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(found.contains(&1));
    }

    #[test]
    fn empty_index_has_no_candidates() {
        let index = SrpIndex::new(&config(4, 4, 2)).unwrap();
        assert!(index.candidates(&[0.0, 1.0, 0.0, 0.0]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_inserts_collapse_in_candidates() {
        let mut index = SrpIndex::new(&config(4, 8, 4)).unwrap();
        index.insert(9, &[0.0, 0.0, 1.0, 0.0]).unwrap();
        index.insert(9, &[0.0, 0.0, 1.0, 0.0]).unwrap();
        assert_eq!(index.len(), 2);
        let found = index.candidates(&[0.0, 0.0, 1.0, 0.0]).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn dimension_mismatch_fails_fast() {
        let mut index = SrpIndex::new(&config(4, 4, 2)).unwrap();
        assert!(matches!(
            index.insert(1, &[1.0, 0.0]),
            Err(QaError::DimensionMismatch { expected: 4, actual: 2 })
        ));
        assert!(index.is_empty());
        assert!(index.candidates(&[1.0; 5]).is_err());
    }

    #[test]
    fn opposite_vectors_never_share_a_band() {
        let mut index = SrpIndex::new(&config(8, 16, 4)).unwrap();
        let v = unit(&[1.0, 2.0, -0.5, 0.3, 0.0, 1.5, -2.0, 0.7]);
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        index.insert(1, &v).unwrap();
        // Every projection flips sign (ties at exactly zero are measure-zero here).
        assert!(index.candidates(&neg).unwrap().is_empty());
    }
}
