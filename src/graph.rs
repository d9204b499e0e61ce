//! Distributed CSR adjacency and the halo exchange of partition values.
//!
//! Rows are distributed identically to the coordinate arrays; columns are
//! globally addressable. The graph is only needed by the metrics and the
//! block-graph construction, never by the partitioners themselves.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use crate::parallel::Collectives;
use crate::types::{Error, Result, Scalar};

/// The local rows of a distributed sparse adjacency matrix.
///
/// Row `i` is the vertex with global id `row_global_ids[i]`; its neighbors
/// `adjacency[offsets[i]..offsets[i+1]]` are global ids that may live on
/// any rank. Edge weights default to one.
#[derive(Clone, Debug)]
pub struct DistributedGraph<T> {
    offsets: Vec<usize>,
    adjacency: Vec<u64>,
    edge_weights: Vec<T>,
    row_global_ids: Vec<u64>,
    global_count: usize,
}

impl<T: Scalar> DistributedGraph<T> {
    /// Create a graph from its local CSR fragment. Passing no edge weights
    /// gives every edge weight one.
    pub fn new(
        offsets: Vec<usize>,
        adjacency: Vec<u64>,
        edge_weights: Vec<T>,
        row_global_ids: Vec<u64>,
        global_count: usize,
    ) -> Result<Self> {
        if offsets.len() != row_global_ids.len() + 1 {
            return Err(Error::DimensionMismatch("csr offsets".into()));
        }
        if *offsets.last().unwrap_or(&0) != adjacency.len() {
            return Err(Error::DimensionMismatch("csr adjacency".into()));
        }
        let edge_weights = if edge_weights.is_empty() {
            vec![T::one(); adjacency.len()]
        } else {
            edge_weights
        };
        if edge_weights.len() != adjacency.len() {
            return Err(Error::DimensionMismatch("edge weights".into()));
        }
        Ok(Self {
            offsets,
            adjacency,
            edge_weights,
            row_global_ids,
            global_count,
        })
    }

    /// Number of local rows.
    pub fn local_count(&self) -> usize {
        self.row_global_ids.len()
    }

    /// Total number of vertices over all ranks.
    pub fn global_count(&self) -> usize {
        self.global_count
    }

    /// Global ids of the local rows.
    pub fn row_global_ids(&self) -> &[u64] {
        &self.row_global_ids
    }

    /// The neighbors of local row `i`, with their edge weights.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (u64, T)> + '_ {
        let range = self.offsets[i]..self.offsets[i + 1];
        self.adjacency[range.clone()]
            .iter()
            .copied()
            .zip(self.edge_weights[range].iter().copied())
    }

    /// Global ids referenced by local edges but owned elsewhere: the halo.
    pub fn halo_ids(&self) -> Vec<u64> {
        let local: HashSet<u64> = self.row_global_ids.iter().copied().collect();
        let mut halo: Vec<u64> = self
            .adjacency
            .iter()
            .copied()
            .filter(|gid| !local.contains(gid))
            .unique()
            .collect();
        halo.sort_unstable();
        halo
    }

    /// Fetch the partition value of every halo vertex.
    ///
    /// Every rank publishes which foreign ids it needs; owners answer with
    /// `(gid, block)` pairs. Returns a map from global id to block for all
    /// vertices referenced by local edges, local rows included.
    pub fn exchange_partition_halo<C: Collectives>(
        &self,
        partition: &[usize],
        comm: &C,
    ) -> Result<HashMap<u64, usize>> {
        if partition.len() != self.local_count() {
            return Err(Error::DimensionMismatch("partition vector".into()));
        }

        let mut block_of: HashMap<u64, usize> = self
            .row_global_ids
            .iter()
            .copied()
            .zip(partition.iter().copied())
            .collect();

        let wanted = self.halo_ids();
        let all_requests = comm.all_gather_varcount(&wanted);

        // answer the requests this rank can serve
        let mut reply_ids = Vec::new();
        let mut reply_blocks = Vec::new();
        for &gid in all_requests.iter().unique() {
            if let Some(&block) = block_of.get(&gid) {
                reply_ids.push(gid);
                reply_blocks.push(block as u64);
            }
        }

        let answered_ids = comm.all_gather_varcount(&reply_ids);
        let answered_blocks = comm.all_gather_varcount(&reply_blocks);

        let wanted_set: HashSet<u64> = wanted.into_iter().collect();
        for (gid, block) in answered_ids.into_iter().zip(answered_blocks) {
            if wanted_set.contains(&gid) {
                block_of.insert(gid, block as usize);
            }
        }

        // a dangling column id means the graph and partition disagree
        if block_of.len() < wanted_set.len() + self.local_count() {
            return Err(Error::InternalInvariant(
                "some halo vertices were not answered by any rank".into(),
            ));
        }
        Ok(block_of)
    }
}
