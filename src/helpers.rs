//! Helper functions used in testing the partitioners: seeded random point
//! clouds and small structured grids with their adjacency.

use rand::prelude::*;

use crate::graph::DistributedGraph;
use crate::points::DistributedPoints;
use crate::types::Scalar;

/// Uniformly random points in the unit square, unit weights, reproducible
/// for a fixed seed.
pub fn points_fixture_2d<T: Scalar>(n_points: usize, seed: u64) -> DistributedPoints<T> {
    points_fixture(n_points, 2, seed)
}

/// Uniformly random points in the unit cube, unit weights, reproducible
/// for a fixed seed.
pub fn points_fixture_3d<T: Scalar>(n_points: usize, seed: u64) -> DistributedPoints<T> {
    points_fixture(n_points, 3, seed)
}

fn points_fixture<T: Scalar>(n_points: usize, dims: usize, seed: u64) -> DistributedPoints<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut coords = vec![Vec::with_capacity(n_points); dims];
    for _ in 0..n_points {
        for coord in coords.iter_mut() {
            coord.push(T::from(rng.gen_range(0.0..1.0)).unwrap());
        }
    }
    DistributedPoints::from_coordinates(coords).unwrap()
}

/// Structured 2-D grid: vertex `(x, y)` has global id `y * nx + x`,
/// coordinates `(x, y)`, unit vertex and edge weights, and the
/// 4-neighborhood adjacency.
pub fn grid_points_2d<T: Scalar>(nx: usize, ny: usize) -> (DistributedPoints<T>, DistributedGraph<T>) {
    let n = nx * ny;
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);

    let mut offsets = Vec::with_capacity(n + 1);
    let mut adjacency = Vec::new();
    offsets.push(0);

    for y in 0..ny {
        for x in 0..nx {
            xs.push(T::from(x).unwrap());
            ys.push(T::from(y).unwrap());

            if x > 0 {
                adjacency.push((y * nx + x - 1) as u64);
            }
            if x + 1 < nx {
                adjacency.push((y * nx + x + 1) as u64);
            }
            if y > 0 {
                adjacency.push(((y - 1) * nx + x) as u64);
            }
            if y + 1 < ny {
                adjacency.push(((y + 1) * nx + x) as u64);
            }
            offsets.push(adjacency.len());
        }
    }

    let points = DistributedPoints::from_coordinates(vec![xs, ys]).unwrap();
    let graph = DistributedGraph::new(
        offsets,
        adjacency,
        Vec::new(),
        (0..n as u64).collect(),
        n,
    )
    .unwrap();
    (points, graph)
}

/// Structured 3-D grid: vertex `(x, y, z)` has global id
/// `(z * ny + y) * nx + x` and the 6-neighborhood adjacency.
pub fn grid_points_3d<T: Scalar>(
    nx: usize,
    ny: usize,
    nz: usize,
) -> (DistributedPoints<T>, DistributedGraph<T>) {
    let n = nx * ny * nz;
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    let mut zs = Vec::with_capacity(n);

    let mut offsets = Vec::with_capacity(n + 1);
    let mut adjacency = Vec::new();
    offsets.push(0);

    let id = |x: usize, y: usize, z: usize| ((z * ny + y) * nx + x) as u64;

    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                xs.push(T::from(x).unwrap());
                ys.push(T::from(y).unwrap());
                zs.push(T::from(z).unwrap());

                if x > 0 {
                    adjacency.push(id(x - 1, y, z));
                }
                if x + 1 < nx {
                    adjacency.push(id(x + 1, y, z));
                }
                if y > 0 {
                    adjacency.push(id(x, y - 1, z));
                }
                if y + 1 < ny {
                    adjacency.push(id(x, y + 1, z));
                }
                if z > 0 {
                    adjacency.push(id(x, y, z - 1));
                }
                if z + 1 < nz {
                    adjacency.push(id(x, y, z + 1));
                }
                offsets.push(adjacency.len());
            }
        }
    }

    let points = DistributedPoints::from_coordinates(vec![xs, ys, zs]).unwrap();
    let graph = DistributedGraph::new(
        offsets,
        adjacency,
        Vec::new(),
        (0..n as u64).collect(),
        n,
    )
    .unwrap();
    (points, graph)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fixture_is_reproducible() {
        let a = points_fixture_2d::<f64>(50, 3);
        let b = points_fixture_2d::<f64>(50, 3);
        assert_eq!(a.coords(0), b.coords(0));
        assert_eq!(a.coords(1), b.coords(1));

        let c = points_fixture_2d::<f64>(50, 4);
        assert_ne!(a.coords(0), c.coords(0));
    }

    #[test]
    fn test_grid_adjacency() {
        let (points, graph) = grid_points_2d::<f64>(3, 3);
        assert_eq!(points.local_count(), 9);
        assert_eq!(graph.local_count(), 9);

        // corner has two neighbors, center has four
        assert_eq!(graph.row(0).count(), 2);
        assert_eq!(graph.row(4).count(), 4);

        let neighbors: Vec<u64> = graph.row(4).map(|(gid, _)| gid).collect();
        assert_eq!(neighbors, vec![3, 5, 1, 7]);
    }

    #[test]
    fn test_grid_3d_degree() {
        let (points, graph) = grid_points_3d::<f64>(3, 3, 3);
        assert_eq!(points.local_count(), 27);
        // the body-center vertex has six neighbors
        assert_eq!(graph.row(13).count(), 6);
    }
}
