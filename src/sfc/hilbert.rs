//! Hilbert curve index computation for 2-D and 3-D points, with the
//! inverse map used for seeding and testing.
//!
//! The forward map walks `resolution` levels of the recursive sub-square
//! (sub-cube) decomposition, accumulating `d` bits per level with the
//! classical rotation/reflection rules, and divides by `2^(d * resolution)`
//! to land in the unit interval.

use rayon::prelude::*;

use crate::points::DistributedPoints;
use crate::types::{Error, Result, Scalar, Settings};

/// Deepest refinement such that the accumulated index fits a `u64` and the
/// divisor `2^(d * r)` stays representable.
pub fn max_resolution(dims: usize) -> usize {
    63 / dims
}

/// Curve refinement for a run: the configured resolution if set, otherwise
/// `max(ceil(log2 N), 21)`, both clamped to [`max_resolution`].
pub fn resolution(settings: &Settings, global_count: usize, dims: usize) -> usize {
    let cap = max_resolution(dims);
    if settings.sfc_resolution > 0 {
        settings.sfc_resolution.min(cap)
    } else {
        let bits = (global_count.max(2) as f64).log2().ceil() as usize;
        bits.max(21).min(cap)
    }
}

fn rescale<T: Scalar>(point: &[T], min: &[T], max: &[T]) -> Result<Vec<f64>> {
    let mut scaled = Vec::with_capacity(point.len());
    for d in 0..point.len() {
        let value = ((point[d] - min[d]) / (max[d] - min[d]))
            .to_f64()
            .unwrap_or(f64::NAN);
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::InvalidCoordinate {
                dim: d,
                value: point[d].to_f64().unwrap_or(f64::NAN),
                min: min[d].to_f64().unwrap_or(f64::NAN),
                max: max[d].to_f64().unwrap_or(f64::NAN),
            });
        }
        scaled.push(value);
    }
    Ok(scaled)
}

/// Hilbert index of a single point, rescaled into the unit cube by the
/// given bounds. Returns a value in `[0, 1]`.
pub fn hilbert_index<T: Scalar>(
    point: &[T],
    resolution: usize,
    min: &[T],
    max: &[T],
) -> Result<f64> {
    let scaled = rescale(point, min, max)?;
    match point.len() {
        2 => Ok(index_2d(scaled[0], scaled[1], resolution)),
        3 => Ok(index_3d(scaled[0], scaled[1], scaled[2], resolution)),
        d => Err(Error::InvalidArgument(format!(
            "space filling curve only implemented for two or three dimensions, got {d}"
        ))),
    }
}

/// Hilbert indices of all local points of a distributed point set, in local
/// order. One cache-friendly pass per point, parallel over the local set.
pub fn hilbert_indices<T: Scalar>(
    points: &DistributedPoints<T>,
    resolution: usize,
    min: &[T],
    max: &[T],
) -> Result<Vec<f64>> {
    let dims = points.dims();
    (0..points.local_count())
        .into_par_iter()
        .map(|i| {
            let mut point = [T::zero(); 3];
            for d in 0..dims {
                point[d] = points.coords(d)[i];
            }
            hilbert_index(&point[..dims], resolution, min, max)
        })
        .collect()
}

fn index_2d(mut x: f64, mut y: f64, resolution: usize) -> f64 {
    let mut integer_index: u64 = 0;
    for _ in 0..resolution {
        let sub_square: u64;
        if x < 0.5 {
            if y < 0.5 {
                sub_square = 0;
                let tmp = x;
                x = 2.0 * y;
                y = 2.0 * tmp;
            } else {
                sub_square = 1;
                x *= 2.0;
                y = 2.0 * y - 1.0;
            }
        } else if y < 0.5 {
            sub_square = 3;
            let tmp = x;
            x = -2.0 * y + 1.0;
            y = -2.0 * tmp + 2.0;
        } else {
            sub_square = 2;
            x = 2.0 * x - 1.0;
            y = 2.0 * y - 1.0;
        }
        integer_index = (integer_index << 2) | sub_square;
    }
    integer_index as f64 / (1u64 << (2 * resolution)) as f64
}

fn index_3d(mut x: f64, mut y: f64, mut z: f64, resolution: usize) -> f64 {
    let mut integer_index: u64 = 0;
    for _ in 0..resolution {
        let sub_cube: u64;
        if z < 0.5 {
            if x < 0.5 {
                if y < 0.5 {
                    sub_cube = 0;
                    let tmp = x;
                    x = 2.0 * z;
                    z = 2.0 * y;
                    y = 2.0 * tmp;
                } else {
                    sub_cube = 1;
                    let tmp = x;
                    x = 2.0 * y - 1.0;
                    y = 2.0 * z;
                    z = 2.0 * tmp;
                }
            } else if y >= 0.5 {
                sub_cube = 2;
                let tmp = x;
                x = 2.0 * y - 1.0;
                y = 2.0 * z;
                z = 2.0 * tmp - 1.0;
            } else {
                sub_cube = 3;
                x = -2.0 * x + 2.0;
                y = -2.0 * y + 1.0;
                z = 2.0 * z;
            }
        } else if x >= 0.5 {
            if y < 0.5 {
                sub_cube = 4;
                x = -2.0 * x + 2.0;
                y = -2.0 * y + 1.0;
                z = 2.0 * z - 1.0;
            } else {
                sub_cube = 5;
                let tmp = x;
                x = 2.0 * y - 1.0;
                y = -2.0 * z + 2.0;
                z = -2.0 * tmp + 2.0;
            }
        } else if y < 0.5 {
            sub_cube = 7;
            let tmp = x;
            x = -2.0 * z + 2.0;
            z = -2.0 * y + 1.0;
            y = 2.0 * tmp;
        } else {
            sub_cube = 6;
            let tmp = x;
            x = 2.0 * y - 1.0;
            y = -2.0 * z + 2.0;
            z = -2.0 * tmp + 1.0;
        }
        integer_index = (integer_index << 3) | sub_cube;
    }
    integer_index as f64 / (1u64 << (3 * resolution)) as f64
}

/// Point in the unit square or cube at position `index` along the curve of
/// the given refinement. Returns the lower corner of the containing cell,
/// so the distance to any preimage of `index` is at most `2^-resolution`
/// per dimension.
pub fn index_to_point(index: f64, resolution: usize, dims: usize) -> Result<Vec<f64>> {
    match dims {
        2 => Ok(index_to_point_2d(index, resolution).to_vec()),
        3 => Ok(index_to_point_3d(index, resolution).to_vec()),
        d => Err(Error::InvalidArgument(format!(
            "space filling curve only implemented for two or three dimensions, got {d}"
        ))),
    }
}

fn index_to_point_2d(index: f64, level: usize) -> [f64; 2] {
    if level == 0 {
        return [0.0, 0.0];
    }
    let q = ((4.0 * index).floor() as usize).min(3);
    let r = 4.0 * index - q as f64;
    let p = index_to_point_2d(r, level - 1);
    match q {
        0 => [p[1] / 2.0, p[0] / 2.0],
        1 => [p[0] / 2.0, p[1] / 2.0 + 0.5],
        2 => [p[0] / 2.0 + 0.5, p[1] / 2.0 + 0.5],
        _ => [1.0 - p[1] / 2.0, 0.5 - p[0] / 2.0],
    }
}

fn index_to_point_3d(index: f64, level: usize) -> [f64; 3] {
    if level == 0 {
        return [0.0, 0.0, 0.0];
    }
    let q = ((8.0 * index).floor() as usize).min(7);
    let r = 8.0 * index - q as f64;
    let p = index_to_point_3d(r, level - 1);
    match q {
        0 => [p[1] / 2.0, p[2] / 2.0, p[0] / 2.0],
        1 => [p[2] / 2.0, 0.5 + p[0] / 2.0, p[1] / 2.0],
        2 => [0.5 + p[2] / 2.0, 0.5 + p[0] / 2.0, p[1] / 2.0],
        3 => [1.0 - p[0] / 2.0, 0.5 - p[1] / 2.0, p[2] / 2.0],
        4 => [1.0 - p[0] / 2.0, 0.5 - p[1] / 2.0, 0.5 + p[2] / 2.0],
        5 => [1.0 - p[2] / 2.0, 0.5 + p[0] / 2.0, 1.0 - p[1] / 2.0],
        6 => [0.5 - p[2] / 2.0, 0.5 + p[0] / 2.0, 1.0 - p[1] / 2.0],
        _ => [p[1] / 2.0, 0.5 - p[2] / 2.0, 1.0 - p[0] / 2.0],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::{points_fixture_2d, points_fixture_3d};

    fn unit_bounds(dims: usize) -> (Vec<f64>, Vec<f64>) {
        (vec![0.0; dims], vec![1.0; dims])
    }

    #[test]
    fn test_unit_interval_range() {
        let (min, max) = unit_bounds(2);
        for &(x, y) in &[(0.0, 0.0), (0.3, 0.7), (0.99, 0.01), (1.0, 1.0)] {
            let h = hilbert_index(&[x, y], 16, &min, &max).unwrap();
            assert!((0.0..=1.0).contains(&h), "index {h} for ({x}, {y})");
        }
    }

    #[test]
    fn test_out_of_bounds_coordinate() {
        let (min, max) = unit_bounds(2);
        let result = hilbert_index(&[1.5, 0.5], 16, &min, &max);
        assert!(matches!(result, Err(Error::InvalidCoordinate { dim: 0, .. })));
    }

    #[test]
    fn test_locality_of_nearby_points() {
        // neighbors on a fine grid must receive nearby curve positions
        let (min, max) = unit_bounds(2);
        let h1 = hilbert_index(&[0.3, 0.3], 20, &min, &max).unwrap();
        let h2 = hilbert_index(&[0.3 + 1e-6, 0.3], 20, &min, &max).unwrap();
        assert!((h1 - h2).abs() < 1e-3);
    }

    #[test]
    fn test_round_trip_2d() {
        let resolution = 12;
        let tolerance = 0.5f64.powi(resolution as i32);
        let (min, max) = unit_bounds(2);
        let points = points_fixture_2d::<f64>(500, 42);
        for i in 0..points.local_count() {
            let p = [points.coords(0)[i], points.coords(1)[i]];
            let h = hilbert_index(&p, resolution, &min, &max).unwrap();
            let q = index_to_point(h, resolution, 2).unwrap();
            for d in 0..2 {
                assert!(
                    (p[d] - q[d]).abs() <= tolerance,
                    "round trip moved {} by {} in dimension {d}",
                    p[d],
                    (p[d] - q[d]).abs()
                );
            }
        }
    }

    #[test]
    fn test_round_trip_3d() {
        let resolution = 10;
        let tolerance = 0.5f64.powi(resolution as i32);
        let (min, max) = unit_bounds(3);
        let points = points_fixture_3d::<f64>(500, 7);
        for i in 0..points.local_count() {
            let p = [
                points.coords(0)[i],
                points.coords(1)[i],
                points.coords(2)[i],
            ];
            let h = hilbert_index(&p, resolution, &min, &max).unwrap();
            let q = index_to_point(h, resolution, 3).unwrap();
            for d in 0..3 {
                assert!((p[d] - q[d]).abs() <= tolerance);
            }
        }
    }

    #[test]
    fn test_bulk_matches_single() {
        let points = points_fixture_3d::<f64>(200, 3);
        let (min, max) = unit_bounds(3);
        let bulk = hilbert_indices(&points, 15, &min, &max).unwrap();
        for i in 0..points.local_count() {
            let p = [
                points.coords(0)[i],
                points.coords(1)[i],
                points.coords(2)[i],
            ];
            assert_eq!(bulk[i], hilbert_index(&p, 15, &min, &max).unwrap());
        }
    }

    #[test]
    fn test_resolution_clamp() {
        let settings = Settings::default();
        assert_eq!(resolution(&settings, 1 << 30, 3), 21);
        assert_eq!(resolution(&settings, 100, 2), 21);

        let deep = Settings {
            sfc_resolution: 60,
            ..Settings::default()
        };
        assert_eq!(resolution(&deep, 100, 3), 21);
        assert_eq!(resolution(&deep, 100, 2), 31);
    }
}
