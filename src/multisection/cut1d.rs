//! 1-D cut placement over a weighted projection array.
//!
//! Both algorithms return the start offset of every part (the first always
//! zero) together with the weight of every part. The optimal variant
//! implements the bound-narrowing search of Nicol (as presented by Pinar
//! and Aykanat, 2004) over the prefix-sum array; the greedy variant is the
//! classical single-scan 2-approximation.

use crate::types::{Error, Result, Scalar};

/// Optimal 1-D partition of `weights` into `parts` contiguous parts,
/// minimizing the heaviest part.
///
/// A binary search over candidate part boundaries narrows a global
/// interval `[lower, upper)` on the optimal bottleneck, probing candidate
/// bottlenecks for feasibility; the final splitters are the leftmost ones
/// achieving the optimal bottleneck, so equal-weight ties resolve to the
/// lowest index. Runs in `O(n · parts · log n)`.
pub fn partition_1d_optimal<T: Scalar>(
    weights: &[T],
    parts: usize,
) -> Result<(Vec<usize>, Vec<T>)> {
    let n = weights.len();
    if n == 0 {
        return Err(Error::InvalidArgument("the projection array is empty".into()));
    }
    if parts == 0 {
        return Err(Error::InvalidArgument("cannot cut into zero parts".into()));
    }

    let prefix = prefix_sums(weights);
    let total = prefix[n];

    if parts == 1 {
        return Ok((vec![0], vec![total]));
    }

    let mut lower = total / T::from(parts).unwrap();
    let mut upper = total;

    // narrow [lower, upper) by binary-searching each part's end index;
    // the probe keeps the bounds globally valid, so after the last part
    // `upper` is the optimal bottleneck
    let mut part_start = 0usize;
    for _ in 1..parts {
        let mut index_low = part_start;
        let mut index_high = n;
        while index_low < index_high {
            let index_mid = (index_low + index_high) / 2;
            let candidate = prefix[index_mid] - prefix[part_start];

            if lower <= candidate && candidate < upper {
                if probe(&prefix, parts, candidate) {
                    index_high = index_mid;
                    upper = candidate;
                } else {
                    index_low = index_mid + 1;
                    lower = candidate;
                }
            } else if candidate >= upper {
                index_high = index_mid;
            } else {
                index_low = index_mid + 1;
            }
        }
        part_start = index_high.saturating_sub(1);
    }

    let (feasible, mut cuts) = probe_with_splitters(&prefix, parts, upper);
    if !feasible {
        return Err(Error::InternalInvariant(
            "the narrowed bottleneck is not feasible".into(),
        ));
    }

    let weights_of = |cuts: &[usize]| {
        (0..parts)
            .map(|p| {
                let end = if p + 1 < parts { cuts[p + 1] } else { n };
                prefix[end] - prefix[cuts[p]]
            })
            .collect::<Vec<T>>()
    };

    // the leftmost solution at a feasible target realizes a bottleneck of
    // at most the target; chase that fixpoint so the returned bottleneck
    // is exactly the heaviest part of its own cuts
    let mut part_weights = weights_of(&cuts);
    loop {
        let bottleneck = part_weights
            .iter()
            .copied()
            .fold(T::neg_infinity(), T::max);
        if bottleneck >= upper {
            break;
        }
        upper = bottleneck;
        cuts = probe_with_splitters(&prefix, parts, upper).1;
        part_weights = weights_of(&cuts);
    }

    Ok((cuts, part_weights))
}

/// Greedy 1-D partition: a single scan closes a part when its weight
/// passes the running average, choosing between including or excluding the
/// straddling bin by the smaller deviation. A 2-approximation in
/// `O(n + parts)`.
pub fn partition_1d_greedy<T: Scalar>(
    weights: &[T],
    parts: usize,
) -> Result<(Vec<usize>, Vec<T>)> {
    let n = weights.len();
    if n == 0 {
        return Err(Error::InvalidArgument("the projection array is empty".into()));
    }
    if parts == 0 {
        return Err(Error::InvalidArgument("cannot cut into zero parts".into()));
    }

    let mut total = weights.iter().copied().fold(T::zero(), |a, b| a + b);
    let mut average = total / T::from(parts).unwrap();

    let mut cuts = vec![0usize; parts];
    let mut part_weights = vec![T::zero(); parts];

    let mut part = 1usize;
    let mut this_part_weight = T::zero();
    let mut i = 0usize;
    while i < n {
        if part >= parts {
            break;
        }
        this_part_weight = this_part_weight + weights[i];
        if this_part_weight > average {
            // keep the straddling bin or push it to the next part,
            // whichever deviates less from the running average
            let without = this_part_weight - weights[i];
            if this_part_weight - average > average - without {
                cuts[part] = i;
                total = total - without;
                part_weights[part - 1] = without;
                // the straddling bin is re-examined for the next part
                i = i.wrapping_sub(1);
            } else {
                cuts[part] = i + 1;
                total = total - this_part_weight;
                part_weights[part - 1] = this_part_weight;
            }
            average = total / T::from(parts - part).unwrap();
            this_part_weight = T::zero();
            part += 1;
        }
        i = i.wrapping_add(1);
    }

    // whatever remains is the last part
    part_weights[parts - 1] = total;
    for p in part..parts {
        if p > 0 && cuts[p] == 0 {
            cuts[p] = n;
        }
    }
    Ok((cuts, part_weights))
}

/// Can `prefix` be cut into `parts` contiguous parts, none heavier than
/// `target`? Greedy scan closing each part at the last bin that fits.
pub fn probe<T: Scalar>(prefix: &[T], parts: usize, target: T) -> bool {
    probe_with_splitters(prefix, parts, target).0
}

fn probe_with_splitters<T: Scalar>(prefix: &[T], parts: usize, target: T) -> (bool, Vec<usize>) {
    let n = prefix.len() - 1;
    let total = prefix[n];
    let mut cuts = vec![0usize; parts];

    if target * T::from(parts).unwrap() < total {
        return (false, cuts);
    }

    let mut part = 1usize;
    let mut reachable = target;
    while part < parts && reachable < total {
        // last prefix position not exceeding the reachable sum
        let split = prefix.partition_point(|&s| s <= reachable) - 1;
        cuts[part] = split;
        reachable = prefix[split] + target;
        part += 1;
    }

    if reachable >= total {
        // parts that were never needed collapse to empty tails
        for p in part..parts {
            cuts[p] = n;
        }
        (true, cuts)
    } else {
        (false, cuts)
    }
}

fn prefix_sums<T: Scalar>(weights: &[T]) -> Vec<T> {
    let mut prefix = Vec::with_capacity(weights.len() + 1);
    prefix.push(T::zero());
    for &w in weights {
        let last = *prefix.last().unwrap();
        prefix.push(last + w);
    }
    prefix
}
