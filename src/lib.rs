//! # Geopart
//!
//! Balanced geometric k-way partitioning of large distributed point sets,
//! designed for meshes and point clouds arising in scientific computing.
//!
//! The pipeline has three stages:
//! * a space-filling-curve (Hilbert) redistribution that sorts vertices
//!   along a locality-preserving 1-D order,
//! * a balanced geometric k-means with per-block influence weights,
//!   triangle-inequality bound pruning, progressive sampling and
//!   hierarchical recursion,
//! * a multisection partitioner that recursively cuts 1-D weighted
//!   projections of the point set into a tree of rectangles.
//!
//! All stages are generic over a [`parallel::Collectives`] implementation.
//! Single-process runs use [`parallel::SerialComm`]; multi-node runs use the
//! MPI-backed communicator behind the `mpi` cargo feature.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod cell;
pub mod comm_tree;
pub mod graph;
pub mod helpers;
pub mod kmeans;
pub mod metrics;
pub mod multisection;
pub mod parallel;
pub mod partitioner;
pub mod points;
pub mod sfc;
pub mod types;

// Public API
#[doc(inline)]
pub use cell::BoundingBox;
#[doc(inline)]
pub use comm_tree::{CommNode, CommTree};
#[doc(inline)]
pub use parallel::{Collectives, SerialComm};
#[doc(inline)]
pub use partitioner::partition_points;
#[doc(inline)]
pub use points::DistributedPoints;
#[doc(inline)]
pub use types::{ConvergenceState, Diagnostics, Error, InitialPartition, Result, Scalar, Settings};
