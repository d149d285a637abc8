//! Numeric workloads executed by every benchmark task.
//!
//! Both kernels compute the dot product of the first `n` elements of two
//! slices. [`scalar_reduce`] is a plain sequential loop; [`chunked_reduce`]
//! keeps one accumulator per lane of the preferred vector width so the
//! compiler can keep the hot loop in SIMD registers, then folds the lanes and
//! finishes the `n % W` tail one element at a time.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::host::preferred_vector_width;

/// Which reduction a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kernel {
    Scalar,
    Chunked,
}

impl Kernel {
    pub fn reduce(self, a: &[f32], b: &[f32], n: usize) -> f32 {
        match self {
            Kernel::Scalar => scalar_reduce(a, b, n),
            Kernel::Chunked => chunked_reduce(a, b, n),
        }
    }
}

pub fn scalar_reduce(a: &[f32], b: &[f32], n: usize) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        sum += x * y;
    }
    sum
}

/// Chunked reduction at the host's preferred lane count.
pub fn chunked_reduce(a: &[f32], b: &[f32], n: usize) -> f32 {
    match preferred_vector_width() {
        16 => chunked_reduce_lanes::<16>(a, b, n),
        8 => chunked_reduce_lanes::<8>(a, b, n),
        _ => chunked_reduce_lanes::<4>(a, b, n),
    }
}

/// Chunked reduction with a fixed lane count `W`.
pub fn chunked_reduce_lanes<const W: usize>(a: &[f32], b: &[f32], n: usize) -> f32 {
    let (a, b) = (&a[..n], &b[..n]);
    let bound = n - n % W;

    let mut lanes = [0.0f32; W];
    for (ca, cb) in a[..bound].chunks_exact(W).zip(b[..bound].chunks_exact(W)) {
        for lane in 0..W {
            lanes[lane] += ca[lane] * cb[lane];
        }
    }

    let mut sum: f32 = lanes.iter().sum();
    for (x, y) in a[bound..].iter().zip(&b[bound..]) {
        sum += x * y;
    }
    sum
}

/// The two read-only input arrays shared by all tasks of a run.
#[derive(Debug, Clone)]
pub struct Dataset {
    a: Vec<f32>,
    b: Vec<f32>,
}

impl Dataset {
    /// Fills both arrays with uniform values in `[0, 1)`.
    pub fn random(len: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let a = (0..len).map(|_| rng.r#gen::<f32>()).collect();
        let b = (0..len).map(|_| rng.r#gen::<f32>()).collect();
        Self { a, b }
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn a(&self) -> &[f32] {
        &self.a
    }

    pub fn b(&self) -> &[f32] {
        &self.b
    }

    pub fn reduce(&self, kernel: Kernel, n: usize) -> f32 {
        kernel.reduce(&self.a, &self.b, n)
    }
}

/// Opaque sink for kernel results, so the optimizer cannot drop the work.
#[derive(Debug, Default)]
pub struct Blackhole {
    bits: AtomicU32,
}

impl Blackhole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&self, value: f32) {
        self.bits
            .store(std::hint::black_box(value).to_bits(), Ordering::Relaxed);
    }

    /// Last consumed value.
    pub fn value(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(x: f32, y: f32) {
        let scale = x.abs().max(y.abs()).max(1.0);
        assert!(
            (x - y).abs() / scale < 1e-3,
            "{x} and {y} differ beyond tolerance"
        );
    }

    #[test]
    fn chunked_matches_scalar_on_random_data() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let len = rng.gen_range(0..5_000);
            let data = Dataset::random(len, Some(rng.r#gen()));
            let n = if len == 0 { 0 } else { rng.gen_range(0..=len) };
            let scalar = scalar_reduce(data.a(), data.b(), n);
            assert_close(chunked_reduce(data.a(), data.b(), n), scalar);
            assert_close(chunked_reduce_lanes::<4>(data.a(), data.b(), n), scalar);
            assert_close(chunked_reduce_lanes::<8>(data.a(), data.b(), n), scalar);
            assert_close(chunked_reduce_lanes::<16>(data.a(), data.b(), n), scalar);
        }
    }

    #[test]
    fn tail_only_and_empty_inputs() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        assert_eq!(chunked_reduce_lanes::<8>(&a, &b, 3), 32.0);
        assert_eq!(scalar_reduce(&a, &b, 3), 32.0);
        assert_eq!(chunked_reduce_lanes::<4>(&a, &b, 0), 0.0);
        assert_eq!(scalar_reduce(&a, &b, 0), 0.0);
    }

    #[test]
    fn prefix_length_is_respected() {
        let a = [1.0f32; 20];
        let b = [2.0f32; 20];
        assert_eq!(scalar_reduce(&a, &b, 9), 18.0);
        assert_eq!(chunked_reduce_lanes::<4>(&a, &b, 9), 18.0);
        assert_eq!(Kernel::Chunked.reduce(&a, &b, 17), 34.0);
    }

    #[test]
    fn seeded_datasets_are_reproducible() {
        let d1 = Dataset::random(128, Some(42));
        let d2 = Dataset::random(128, Some(42));
        assert_eq!(d1.a(), d2.a());
        assert_eq!(d1.b(), d2.b());
        assert!(d1.a().iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(d1.reduce(Kernel::Scalar, 128), d2.reduce(Kernel::Scalar, 128));
    }

    #[test]
    fn blackhole_keeps_last_value() {
        let sink = Blackhole::new();
        assert_eq!(sink.value(), 0.0);
        sink.consume(3.5);
        sink.consume(-1.25);
        assert_eq!(sink.value(), -1.25);
    }
}
