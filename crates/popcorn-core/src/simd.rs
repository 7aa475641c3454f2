//! Vector math used by the flat scan and the query path
//!
//! Inner-product and squared-L2 kernels have explicit SIMD paths for aarch64
//! (NEON) and x86_64 (AVX2+FMA, detected at runtime), with a scalar fallback.
//!
//! Once both sides are unit length, the inner product is the cosine similarity:
//! ```text
//! a · b = cos(θ)   for ||a|| = ||b|| = 1
//! ```
//! so queries are normalized here before they reach an inner-product index.

#[cfg(target_arch = "aarch64")]
const NEON_LANES: usize = 4;
#[cfg(target_arch = "x86_64")]
const AVX_LANES: usize = 8;

fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2sq_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Length of the prefix that fills whole registers of `lanes` floats.
#[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
#[inline(always)]
fn body_len(len: usize, lanes: usize) -> usize {
    len - len % lanes
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let split = body_len(a.len(), NEON_LANES);
    let mut acc = vdupq_n_f32(0.0);
    for (ca, cb) in a[..split]
        .chunks_exact(NEON_LANES)
        .zip(b[..split].chunks_exact(NEON_LANES))
    {
        acc = vfmaq_f32(acc, vld1q_f32(ca.as_ptr()), vld1q_f32(cb.as_ptr()));
    }
    vaddvq_f32(acc) + dot_scalar(&a[split..], &b[split..])
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn l2sq_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::*;

    let split = body_len(a.len(), NEON_LANES);
    let mut acc = vdupq_n_f32(0.0);
    for (ca, cb) in a[..split]
        .chunks_exact(NEON_LANES)
        .zip(b[..split].chunks_exact(NEON_LANES))
    {
        let d = vsubq_f32(vld1q_f32(ca.as_ptr()), vld1q_f32(cb.as_ptr()));
        acc = vfmaq_f32(acc, d, d);
    }
    vaddvq_f32(acc) + l2sq_scalar(&a[split..], &b[split..])
}

/// Sum of the 8 lanes of an AVX register.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn reduce_add(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let quad = _mm_add_ps(_mm256_castps256_ps128(v), _mm256_extractf128_ps(v, 1));
    let pair = _mm_add_ps(quad, _mm_movehdup_ps(quad));
    _mm_cvtss_f32(_mm_add_ss(pair, _mm_movehl_ps(pair, pair)))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let split = body_len(a.len(), AVX_LANES);
    let mut acc = _mm256_setzero_ps();
    for (ca, cb) in a[..split]
        .chunks_exact(AVX_LANES)
        .zip(b[..split].chunks_exact(AVX_LANES))
    {
        acc = _mm256_fmadd_ps(_mm256_loadu_ps(ca.as_ptr()), _mm256_loadu_ps(cb.as_ptr()), acc);
    }
    reduce_add(acc) + dot_scalar(&a[split..], &b[split..])
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn l2sq_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let split = body_len(a.len(), AVX_LANES);
    let mut acc = _mm256_setzero_ps();
    for (ca, cb) in a[..split]
        .chunks_exact(AVX_LANES)
        .zip(b[..split].chunks_exact(AVX_LANES))
    {
        let d = _mm256_sub_ps(_mm256_loadu_ps(ca.as_ptr()), _mm256_loadu_ps(cb.as_ptr()));
        acc = _mm256_fmadd_ps(d, d, acc);
    }
    reduce_add(acc) + l2sq_scalar(&a[split..], &b[split..])
}

#[cfg(target_arch = "x86_64")]
fn avx2_available() -> bool {
    use std::sync::OnceLock;
    static DETECTED: OnceLock<bool> = OnceLock::new();
    *DETECTED.get_or_init(|| is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma"))
}

/// Inner product of two equal-length vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);

    #[cfg(target_arch = "aarch64")]
    return unsafe { dot_neon(a, b) };

    #[cfg(target_arch = "x86_64")]
    if avx2_available() {
        return unsafe { dot_avx2(a, b) };
    }

    #[allow(unreachable_code)]
    dot_scalar(a, b)
}

/// Squared Euclidean distance ||a - b||², the value FAISS reports for L2 indexes.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);

    #[cfg(target_arch = "aarch64")]
    return unsafe { l2sq_neon(a, b) };

    #[cfg(target_arch = "x86_64")]
    if avx2_available() {
        return unsafe { l2sq_avx2(a, b) };
    }

    #[allow(unreachable_code)]
    l2sq_scalar(a, b)
}

/// Euclidean norm, accumulated in f64.
///
/// Accumulating in f64 keeps large-but-finite f32 inputs from overflowing to
/// infinity before the square root.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| {
            let x = x as f64;
            x * x
        })
        .sum::<f64>()
        .sqrt()
}

/// Unit-length copy of `v`, or `None` when the norm is zero or not finite.
pub fn l2_normalized(v: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|&x| (x as f64 / norm) as f32).collect())
}

/// Check if a vector is L2 normalized within `tolerance`.
#[cfg(test)]
pub(crate) fn is_normalized(v: &[f32], tolerance: f32) -> bool {
    (dot_product(v, v) - 1.0).abs() < tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product_small() {
        // 2 - 3 + 8
        assert_eq!(dot_product(&[1.0, -1.0, 2.0], &[2.0, 3.0, 4.0]), 7.0);
        assert_eq!(dot_product(&[], &[]), 0.0);
    }

    #[test]
    fn test_kernels_match_scalar_with_tail() {
        // 13 lanes exercises both the SIMD body and the scalar tail
        let a: Vec<f32> = (0..13).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..13).map(|i| (13 - i) as f32).collect();

        assert!((dot_product(&a, &b) - dot_scalar(&a, &b)).abs() < 1e-3);
        assert!((l2_distance_squared(&a, &b) - l2sq_scalar(&a, &b)).abs() < 1e-2);
    }

    #[test]
    fn test_l2_distance_squared() {
        let origin = [0.0f32; 3];
        let p = [1.0, 2.0, 2.0];
        assert_eq!(l2_distance_squared(&origin, &p), 9.0);
        assert_eq!(l2_distance_squared(&p, &p), 0.0);
    }

    #[test]
    fn test_l2_normalized() {
        let v = l2_normalized(&[0.0, -5.0, 12.0]).unwrap();
        assert!((v[1] + 5.0 / 13.0).abs() < 1e-6);
        assert!((v[2] - 12.0 / 13.0).abs() < 1e-6);
        assert!(is_normalized(&v, 1e-5));
    }

    #[test]
    fn test_zero_vector_has_no_direction() {
        assert!(l2_normalized(&[0.0f32; 64]).is_none());
    }

    #[test]
    fn test_l2_norm_does_not_overflow() {
        let v = [3.0e30f32, 4.0e30];
        let norm = l2_norm(&v);
        assert!(norm.is_finite());
        assert!((norm - 5.0e30).abs() / 5.0e30 < 1e-6);

        let unit = l2_normalized(&v).unwrap();
        assert!(is_normalized(&unit, 1e-5));
    }

    #[test]
    fn test_is_normalized_tolerance() {
        assert!(is_normalized(&[1.0f32, 0.0, 0.0], 1e-6));
        assert!(is_normalized(&[0.9999999f32, 0.0, 0.0], 1e-5));
        assert!(!is_normalized(&[0.5f32, 0.0, 0.0], 1e-5));
    }
}
