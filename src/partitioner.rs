//! Top-level driver: dispatch between the partitioning methods and the
//! optional block renumbering post-pass.

use itertools::Itertools;
use log::info;

use crate::comm_tree::CommTree;
use crate::kmeans;
use crate::multisection;
use crate::parallel::Collectives;
use crate::points::DistributedPoints;
use crate::sfc;
use crate::types::{Diagnostics, Error, InitialPartition, Result, Scalar, Settings};

/// Compute a balanced k-way partition of the points against the given
/// communication tree.
///
/// Dispatches on [`Settings::initial_partition`]:
/// * `Sfc` redistributes along the curve and takes the resulting owner
///   ranks as blocks; requires `k` equal to the number of ranks,
/// * `KMeans` runs the balanced k-means, hierarchically when the tree has
///   inner levels, with an optional repartitioning pass,
/// * `Multisection` cuts the bounding box into rectangles,
/// * `None` leaves every point in block 0.
///
/// The result is aligned with the (possibly redistributed) input points.
pub fn partition_points<T: Scalar, C: Collectives>(
    points: &mut DistributedPoints<T>,
    tree: &CommTree<T>,
    settings: &Settings,
    comm: &C,
) -> Result<(Vec<usize>, Diagnostics)> {
    settings.validate()?;
    if settings.num_blocks != tree.num_leaves() {
        return Err(Error::InvalidArgument(format!(
            "the tree has {} leaves but the settings ask for {} blocks",
            tree.num_leaves(),
            settings.num_blocks
        )));
    }

    let (mut partition, diagnostics) = match settings.initial_partition {
        InitialPartition::Sfc => {
            if settings.num_blocks != comm.size() {
                return Err(Error::InvalidArgument(
                    "the curve partition requires as many blocks as ranks".into(),
                ));
            }
            let partition = sfc::redistribute(points, settings, comm)?;
            (partition, Diagnostics::default())
        }
        InitialPartition::KMeans => {
            if settings.repartition {
                kmeans::compute_hier_plus_repart(points, tree, settings, comm)?
            } else if tree.num_levels() > 2 {
                kmeans::compute_hierarchical_partition(points, tree, settings, comm)?
            } else {
                sfc::redistribute(points, settings, comm)?;
                kmeans::compute_partition_flat(points, tree, settings, comm)?
            }
        }
        InitialPartition::Multisection => {
            let (partition, _) = multisection::compute_partition(points, settings, comm)?;
            (partition, Diagnostics::default())
        }
        InitialPartition::None => (vec![0; points.local_count()], Diagnostics::default()),
    };

    if settings.mapping_renumbering {
        partition = renumber_blocks_by_curve(points, &partition, settings, comm)?;
    }

    info!(
        "partitioned {} points into {} blocks",
        points.global_count(),
        settings.num_blocks
    );
    Ok((partition, diagnostics))
}

/// Relabel the blocks by the curve position of their centroids, so block
/// ids follow spatial locality. The relabelling is a bijection; the
/// partition itself does not change.
pub fn renumber_blocks_by_curve<T: Scalar, C: Collectives>(
    points: &DistributedPoints<T>,
    partition: &[usize],
    settings: &Settings,
    comm: &C,
) -> Result<Vec<usize>> {
    let num_blocks = settings.num_blocks;
    let (min, max) = points.global_bounds(comm)?;
    let resolution = sfc::resolution(settings, points.global_count(), points.dims());

    // centroid of every block; empty blocks keep their id ordering by
    // sorting behind all occupied ones
    let all: Vec<usize> = (0..points.local_count()).collect();
    let centroids = kmeans::block_centroids(points, partition, num_blocks, &all, comm);

    let mut curve_positions = vec![f64::INFINITY; num_blocks];
    for (block, centroid) in centroids.iter().enumerate() {
        if !centroid[0].is_nan() {
            curve_positions[block] = sfc::hilbert_index(centroid, resolution, &min, &max)?;
        }
    }

    let order = (0..num_blocks)
        .sorted_by(|&a, &b| {
            curve_positions[a]
                .total_cmp(&curve_positions[b])
                .then(a.cmp(&b))
        })
        .collect_vec();

    let mut new_id = vec![0usize; num_blocks];
    for (rank, &block) in order.iter().enumerate() {
        new_id[block] = rank;
    }

    Ok(partition.iter().map(|&b| new_id[b]).collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::points_fixture_2d;
    use crate::metrics;
    use crate::parallel::SerialComm;

    #[test]
    fn test_dispatch_kmeans() {
        let mut points = points_fixture_2d::<f64>(500, 1);
        let mut tree = CommTree::<f64>::flat_homogeneous(4, 1).unwrap();
        tree.adapt_weights(&[500.0]).unwrap();
        let settings = Settings {
            num_blocks: 4,
            ..Settings::default()
        };
        let comm = SerialComm;

        let (partition, _) = partition_points(&mut points, &tree, &settings, &comm).unwrap();
        assert_eq!(partition.len(), points.local_count());
        assert!(partition.iter().all(|&b| b < 4));
    }

    #[test]
    fn test_dispatch_multisection() {
        let mut points = points_fixture_2d::<f64>(400, 2);
        let tree = CommTree::<f64>::flat_homogeneous(4, 1).unwrap();
        let settings = Settings {
            num_blocks: 4,
            initial_partition: InitialPartition::Multisection,
            ..Settings::default()
        };
        let comm = SerialComm;

        let (partition, _) = partition_points(&mut points, &tree, &settings, &comm).unwrap();
        let imbalance = metrics::imbalance_uniform(&partition, 4, &vec![1.0; 400], &comm);
        assert!(imbalance < 0.2, "multisection imbalance {imbalance}");
    }

    #[test]
    fn test_dispatch_sfc_requires_k_equals_p() {
        let mut points = points_fixture_2d::<f64>(100, 3);
        let tree = CommTree::<f64>::flat_homogeneous(4, 1).unwrap();
        let settings = Settings {
            num_blocks: 4,
            initial_partition: InitialPartition::Sfc,
            ..Settings::default()
        };
        assert!(partition_points(&mut points, &tree, &settings, &SerialComm).is_err());
    }

    #[test]
    fn test_sfc_single_rank() {
        let mut points = points_fixture_2d::<f64>(100, 3);
        let tree = CommTree::<f64>::flat_homogeneous(1, 1).unwrap();
        let settings = Settings {
            num_blocks: 1,
            initial_partition: InitialPartition::Sfc,
            ..Settings::default()
        };
        let (partition, _) =
            partition_points(&mut points, &tree, &settings, &SerialComm).unwrap();
        assert!(partition.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_renumbering_is_a_bijection() {
        let mut points = points_fixture_2d::<f64>(600, 8);
        let mut tree = CommTree::<f64>::flat_homogeneous(4, 1).unwrap();
        tree.adapt_weights(&[600.0]).unwrap();
        let settings = Settings {
            num_blocks: 4,
            mapping_renumbering: true,
            ..Settings::default()
        };
        let comm = SerialComm;

        let (partition, _) = partition_points(&mut points, &tree, &settings, &comm).unwrap();
        let mut seen = vec![0usize; 4];
        for &b in &partition {
            seen[b] += 1;
        }
        assert!(seen.iter().all(|&c| c > 0));
    }
}
