//! Redistribution of a distributed point set along the Hilbert curve.
//!
//! A distributed sample sort of `(curve value, global id)` pairs produces a
//! globally sorted, evenly rebalanced pair sequence; the lower splitter of
//! every rank is then gathered and each original record is routed to the
//! rank whose splitter interval contains it. Ties in the curve value are
//! broken by the global id, so the total order and therefore the whole
//! redistribution is deterministic.

use itertools::Itertools;
use log::debug;
use rand::prelude::*;

use crate::parallel::Collectives;
use crate::points::DistributedPoints;
use crate::sfc::hilbert;
use crate::types::{Error, Result, Scalar, Settings};

/// A point's position in the total curve order: value first, global id as
/// the tie-break.
#[derive(Clone, Copy, Debug, PartialEq)]
struct CurveKey {
    value: f64,
    gid: u64,
}

impl CurveKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value
            .total_cmp(&other.value)
            .then(self.gid.cmp(&other.gid))
    }

    fn le(&self, other: &Self) -> bool {
        self.cmp(other) != std::cmp::Ordering::Greater
    }
}

/// Number of local samples each rank contributes to the splitter election.
const SAMPLES_PER_RANK: usize = 64;

/// Redistribute coordinates and weights so every rank owns a contiguous
/// block of the global Hilbert order, with block sizes equal up to one.
///
/// Returns the auxiliary partition vector of the new distribution, which
/// assigns every point its owner rank. Equivalent to partitioning by the
/// curve and redistributing, but in one pass.
pub fn redistribute<T: Scalar, C: Collectives>(
    points: &mut DistributedPoints<T>,
    settings: &Settings,
    comm: &C,
) -> Result<Vec<usize>> {
    let size = comm.size();
    let rank = comm.rank();
    let dims = points.dims();
    let num_weights = points.num_weights();
    let local_n = points.local_count();
    let global_n = points.global_count();

    let (min, max) = points.global_bounds(comm)?;
    let resolution = hilbert::resolution(settings, global_n, dims);
    let values = hilbert::hilbert_indices(points, resolution, &min, &max)?;

    let gid_checksum = comm.sum_scalar(points.global_ids().iter().sum::<u64>());

    // local keys in curve order
    let mut keys: Vec<CurveKey> = values
        .iter()
        .zip(points.global_ids())
        .map(|(&value, &gid)| CurveKey { value, gid })
        .collect();
    keys.sort_unstable_by(CurveKey::cmp);

    // sample sort of the keys, then an exact rebalance into blocks of
    // global_n / size, so the final splitters produce an even load
    let sorted_keys = sample_sort_keys(keys, settings, comm);
    let balanced_keys = rebalance_sorted_keys(sorted_keys, global_n, comm);

    // every rank's lower splitter; ranks that ended up empty inherit the
    // splitter of their successor so nothing is routed to them
    let splitters = gather_splitters(&balanced_keys, comm)?;

    // route the original records by binary search against the splitters;
    // iterating the local points in curve order keeps each rank's batch
    // contiguous
    let mut order: Vec<usize> = (0..local_n).collect();
    order.sort_unstable_by(|&a, &b| {
        CurveKey {
            value: values[a],
            gid: points.global_ids()[a],
        }
        .cmp(&CurveKey {
            value: values[b],
            gid: points.global_ids()[b],
        })
    });

    let mut send_counts = vec![0usize; size];
    for &i in &order {
        let key = CurveKey {
            value: values[i],
            gid: points.global_ids()[i],
        };
        let target = splitters[1..].partition_point(|s| s.le(&key));
        send_counts[target] += 1;
    }

    let send_values = order.iter().map(|&i| values[i]).collect_vec();
    let send_gids = order.iter().map(|&i| points.global_ids()[i]).collect_vec();

    let recv_values = comm.all_to_all_varcount(&send_values, &send_counts);
    let recv_gids = comm.all_to_all_varcount(&send_gids, &send_counts);

    let mut recv_coords = Vec::with_capacity(dims);
    for d in 0..dims {
        let send = order.iter().map(|&i| points.coords(d)[i]).collect_vec();
        recv_coords.push(comm.all_to_all_varcount(&send, &send_counts));
    }
    let mut recv_weights = Vec::with_capacity(num_weights);
    for w in 0..num_weights {
        let send = order.iter().map(|&i| points.weights(w)[i]).collect_vec();
        recv_weights.push(comm.all_to_all_varcount(&send, &send_counts));
    }

    // restore the total curve order among the received records
    let new_local_n = recv_gids.len();
    let mut perm: Vec<usize> = (0..new_local_n).collect();
    perm.sort_unstable_by(|&a, &b| {
        CurveKey {
            value: recv_values[a],
            gid: recv_gids[a],
        }
        .cmp(&CurveKey {
            value: recv_values[b],
            gid: recv_gids[b],
        })
    });

    let coords = (0..dims)
        .map(|d| perm.iter().map(|&i| recv_coords[d][i]).collect_vec())
        .collect_vec();
    let weights = (0..num_weights)
        .map(|w| perm.iter().map(|&i| recv_weights[w][i]).collect_vec())
        .collect_vec();
    let global_ids = perm.iter().map(|&i| recv_gids[i]).collect_vec();

    points.install(coords, weights, global_ids);

    debug_assert_eq!(
        comm.sum_scalar(points.global_ids().iter().sum::<u64>()),
        gid_checksum
    );
    if settings.debug_mode {
        let after = comm.sum_scalar(points.global_ids().iter().sum::<u64>());
        if after != gid_checksum {
            return Err(Error::InternalInvariant(format!(
                "global id checksum changed during redistribution: {gid_checksum} != {after}"
            )));
        }
    }

    debug!(
        "rank {rank}: redistributed {local_n} -> {new_local_n} local points at resolution {resolution}"
    );

    Ok(vec![rank; points.local_count()])
}

/// Sample sort of the local keys: every rank contributes random samples,
/// the gathered samples elect `size - 1` splitters, and a variable-count
/// all-to-all moves each key to its bucket.
fn sample_sort_keys<C: Collectives>(
    keys: Vec<CurveKey>,
    settings: &Settings,
    comm: &C,
) -> Vec<CurveKey> {
    let size = comm.size();
    if size == 1 {
        return keys;
    }

    let mut rng = StdRng::seed_from_u64(settings.seed.wrapping_add(comm.rank() as u64));
    let n_samples = SAMPLES_PER_RANK.min(keys.len());
    let local_samples = (0..n_samples)
        .map(|_| keys[rng.gen_range(0..keys.len())])
        .collect_vec();

    let mut all_samples = decode_keys(
        comm.all_gather_varcount(&encode_values(&local_samples)),
        comm.all_gather_varcount(&encode_gids(&local_samples)),
    );
    all_samples.sort_unstable_by(CurveKey::cmp);

    // every (total / size)-th sample becomes a bucket boundary
    let total = all_samples.len();
    if total == 0 {
        return keys;
    }
    let splitters = (1..size)
        .map(|r| all_samples[(r * total / size).min(total - 1)])
        .collect_vec();

    let mut send_counts = vec![0usize; size];
    for key in &keys {
        let target = splitters.partition_point(|s| s.le(key));
        send_counts[target] += 1;
    }

    let mut received = decode_keys(
        comm.all_to_all_varcount(&encode_values(&keys), &send_counts),
        comm.all_to_all_varcount(&encode_gids(&keys), &send_counts),
    );
    received.sort_unstable_by(CurveKey::cmp);
    received
}

/// Move the globally sorted keys into contiguous blocks of `global_n /
/// size` keys, so the load per rank differs by at most one.
fn rebalance_sorted_keys<C: Collectives>(
    keys: Vec<CurveKey>,
    global_n: usize,
    comm: &C,
) -> Vec<CurveKey> {
    let size = comm.size();
    if size == 1 {
        return keys;
    }

    let mut counts = vec![0u64; size];
    comm.all_gather(&[keys.len() as u64], &mut counts);
    let my_offset: u64 = counts[..comm.rank()].iter().sum();

    // rank r owns global positions [r * n / p, (r + 1) * n / p)
    let starts = (0..size).map(|r| (r * global_n) / size).collect_vec();
    let mut send_counts = vec![0usize; size];
    for local in 0..keys.len() {
        let global_pos = my_offset as usize + local;
        let target = starts.partition_point(|&s| s <= global_pos) - 1;
        send_counts[target] += 1;
    }

    let mut received = decode_keys(
        comm.all_to_all_varcount(&encode_values(&keys), &send_counts),
        comm.all_to_all_varcount(&encode_gids(&keys), &send_counts),
    );
    received.sort_unstable_by(CurveKey::cmp);
    received
}

/// Lower splitter of every rank, weakly increasing. Empty ranks inherit
/// their successor's splitter; a trailing run of empty ranks gets a
/// sentinel above every key.
fn gather_splitters<C: Collectives>(keys: &[CurveKey], comm: &C) -> Result<Vec<CurveKey>> {
    let size = comm.size();

    let sentinel = CurveKey {
        value: f64::INFINITY,
        gid: u64::MAX,
    };
    let local_min = keys.first().copied().unwrap_or(sentinel);

    let mut splitters = decode_keys(
        comm.all_gather_varcount(&[local_min.value]),
        comm.all_gather_varcount(&[local_min.gid]),
    );

    for r in (0..size - 1).rev() {
        if splitters[r].value.is_infinite() {
            splitters[r] = splitters[r + 1];
        }
    }

    for r in 1..size {
        if splitters[r].cmp(&splitters[r - 1]) == std::cmp::Ordering::Less {
            return Err(Error::InternalInvariant(
                "splitters are not weakly increasing".into(),
            ));
        }
    }
    Ok(splitters)
}

fn encode_values(keys: &[CurveKey]) -> Vec<f64> {
    keys.iter().map(|k| k.value).collect()
}

fn encode_gids(keys: &[CurveKey]) -> Vec<u64> {
    keys.iter().map(|k| k.gid).collect()
}

fn decode_keys(values: Vec<f64>, gids: Vec<u64>) -> Vec<CurveKey> {
    values
        .into_iter()
        .zip(gids)
        .map(|(value, gid)| CurveKey { value, gid })
        .collect()
}

/// Check that the current distribution follows the Hilbert order: every
/// rank's local values must lie below the minimum of all higher ranks.
///
/// Used by debug builds and tests before prefix-sum based center seeding.
pub fn confirm_distribution<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    settings: &Settings,
    comm: &C,
) -> Result<bool> {
    let (min, max) = points.global_bounds(comm)?;
    let resolution = hilbert::resolution(settings, points.global_count(), points.dims());
    let values = hilbert::hilbert_indices(points, resolution, &min, &max)?;

    let local_min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let local_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mins = comm.all_gather_varcount(&[local_min]);
    let maxs = comm.all_gather_varcount(&[local_max]);

    let mut previous_max = f64::NEG_INFINITY;
    for r in 0..comm.size() {
        if mins[r].is_infinite() {
            continue; // empty rank
        }
        if mins[r] < previous_max {
            return Ok(false);
        }
        previous_max = maxs[r];
    }
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::points_fixture_2d;
    use crate::parallel::SerialComm;

    #[test]
    fn test_redistribute_sorts_by_curve_value() {
        let mut points = points_fixture_2d::<f64>(512, 11);
        let settings = Settings::default();
        let comm = SerialComm;

        let gid_sum_before: u64 = points.global_ids().iter().sum();
        let partition = redistribute(&mut points, &settings, &comm).unwrap();

        assert_eq!(partition.len(), points.local_count());
        assert!(partition.iter().all(|&p| p == 0));
        assert_eq!(points.global_ids().iter().sum::<u64>(), gid_sum_before);

        let (min, max) = points.global_bounds(&comm).unwrap();
        let resolution = hilbert::resolution(&settings, points.global_count(), 2);
        let values = hilbert::hilbert_indices(&points, resolution, &min, &max).unwrap();
        for pair in values.windows(2) {
            assert!(pair[0] <= pair[1], "points are not in curve order");
        }

        assert!(confirm_distribution(&points, &settings, &comm).unwrap());
    }

    #[test]
    fn test_redistribute_is_deterministic() {
        let settings = Settings {
            seed: 99,
            ..Settings::default()
        };
        let comm = SerialComm;

        let mut first = points_fixture_2d::<f64>(300, 5);
        let mut second = first.clone();
        redistribute(&mut first, &settings, &comm).unwrap();
        redistribute(&mut second, &settings, &comm).unwrap();

        assert_eq!(first.global_ids(), second.global_ids());
        assert_eq!(first.coords(0), second.coords(0));
        assert_eq!(first.coords(1), second.coords(1));
    }

    #[test]
    fn test_weights_follow_points() {
        let base = points_fixture_2d::<f64>(64, 2);
        let weights: Vec<f64> = (0..64).map(|i| i as f64).collect();
        let mut points = DistributedPoints::new(
            base.all_coords().to_vec(),
            vec![weights],
            base.global_ids().to_vec(),
            64,
        )
        .unwrap();

        let settings = Settings::default();
        redistribute(&mut points, &settings, &SerialComm).unwrap();

        // the weight of a point equals its original global id, which must
        // still hold after the exchange
        for i in 0..points.local_count() {
            assert_eq!(points.weights(0)[i], points.global_ids()[i] as f64);
        }
    }
}
