use crate::error::{QaError, Result};

/// Fixed-dimension embedding space.
///
/// Vectors are assumed L2-normalized by the producer, so cosine similarity
/// is the plain dot product. Nothing here re-normalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSpace {
    dim: usize,
}

impl VectorSpace {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(QaError::Configuration("dim must be non-zero".into()));
        }
        Ok(Self { dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Fails fast on a vector of the wrong length instead of truncating.
    #[inline]
    pub fn check(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dim {
            return Err(QaError::DimensionMismatch { expected: self.dim, actual: v.len() });
        }
        Ok(())
    }

    /// Cosine similarity of two normalized vectors, higher is closer.
    #[inline]
    pub fn cosine(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        self.check(a)?;
        self.check(b)?;
        Ok(dot(a, b))
    }
}

/// Unrolled dot product. 8 lanes keeps register pressure low while still
/// letting LLVM emit packed FMAs on AVX2.
#[inline(always)]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);

    let mut sum = 0.0;
    let remainder_start = n - n % 8;

    for (ac, bc) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        sum += ac[0]*bc[0] + ac[1]*bc[1] + ac[2]*bc[2] + ac[3]*bc[3] +
        ac[4]*bc[4] + ac[5]*bc[5] + ac[6]*bc[6] + ac[7]*bc[7];
    }

    for i in remainder_start..n {
        sum += a[i] * b[i];
    }
    sum
}
