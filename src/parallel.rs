//! Collective communication layer.
//!
//! Every distributed algorithm in this crate is generic over
//! [`Collectives`], which names exactly the synchronization points of the
//! pipeline: elementwise reductions, all-gathers, the variable-count
//! all-to-all used by the redistribution, a broadcast, and a ring rotation
//! used to build the block graph in O(p) rounds. [`SerialComm`] implements
//! the trait for a single process and backs all unit tests; the MPI-backed
//! implementation lives behind the `mpi` cargo feature.

use std::ops::Add;

#[allow(unused_imports)]
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Scalar that can travel through the communicator.
#[cfg(not(feature = "mpi"))]
pub trait CommScalar: Copy + Default + PartialOrd + Add<Output = Self> + Send + Sync {}

#[cfg(not(feature = "mpi"))]
impl<T> CommScalar for T where T: Copy + Default + PartialOrd + Add<Output = Self> + Send + Sync {}

/// Scalar that can travel through the communicator.
#[cfg(feature = "mpi")]
pub trait CommScalar:
    Copy + Default + PartialOrd + Add<Output = Self> + Send + Sync + mpi::traits::Equivalence
{
}

#[cfg(feature = "mpi")]
impl<T> CommScalar for T where
    T: Copy + Default + PartialOrd + Add<Output = Self> + Send + Sync + mpi::traits::Equivalence
{
}

/// The collective operations the partitioning pipeline suspends on.
///
/// All collectives must be matched in identical order on every process.
pub trait Collectives {
    /// Number of processes in the communicator.
    fn size(&self) -> usize;

    /// Rank of this process, in `[0, size)`.
    fn rank(&self) -> usize;

    /// Elementwise sum-allreduce, in place.
    fn sum_into<T: CommScalar>(&self, buf: &mut [T]);

    /// Elementwise min-allreduce, in place.
    fn min_into<T: CommScalar>(&self, buf: &mut [T]);

    /// Elementwise max-allreduce, in place.
    fn max_into<T: CommScalar>(&self, buf: &mut [T]);

    /// Gather equally-sized contributions from all ranks on all ranks.
    /// `out` must have length `local.len() * size`.
    fn all_gather<T: CommScalar>(&self, local: &[T], out: &mut [T]);

    /// Gather differently-sized contributions from all ranks on all ranks,
    /// concatenated in rank order.
    fn all_gather_varcount<T: CommScalar>(&self, local: &[T]) -> Vec<T>;

    /// Exchange `items` between ranks. `send_counts[r]` consecutive items
    /// go to rank `r`; the received items arrive concatenated in rank
    /// order. `send_counts` must sum to `items.len()`.
    fn all_to_all_varcount<T: CommScalar>(&self, items: &[T], send_counts: &[usize]) -> Vec<T>;

    /// Broadcast `buf` from `root` to all ranks.
    fn broadcast<T: CommScalar>(&self, buf: &mut [T], root: usize);

    /// Pass `buf` to rank `(rank + 1) % size` and receive the buffer of
    /// rank `(rank - 1) % size` into it. The identity for a single process.
    fn rotate<T: CommScalar>(&self, buf: &mut [T]);

    /// Explicit synchronization barrier.
    fn barrier(&self);

    /// Sum a single value over all ranks.
    fn sum_scalar<T: CommScalar>(&self, value: T) -> T {
        let mut buf = [value];
        self.sum_into(&mut buf);
        buf[0]
    }

    /// Minimum of a single value over all ranks.
    fn min_scalar<T: CommScalar>(&self, value: T) -> T {
        let mut buf = [value];
        self.min_into(&mut buf);
        buf[0]
    }

    /// Maximum of a single value over all ranks.
    fn max_scalar<T: CommScalar>(&self, value: T) -> T {
        let mut buf = [value];
        self.max_into(&mut buf);
        buf[0]
    }

    /// True iff `flag` holds on every rank.
    fn all(&self, flag: bool) -> bool {
        self.min_scalar(if flag { 1u8 } else { 0u8 }) == 1
    }

    /// True iff `flag` holds on at least one rank.
    fn any(&self, flag: bool) -> bool {
        self.max_scalar(if flag { 1u8 } else { 0u8 }) == 1
    }
}

/// Trivial communicator for a single process.
///
/// Reductions and broadcasts are the identity, the all-to-all returns its
/// input. Used by unit tests and single-process runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Collectives for SerialComm {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn sum_into<T: CommScalar>(&self, _buf: &mut [T]) {}

    fn min_into<T: CommScalar>(&self, _buf: &mut [T]) {}

    fn max_into<T: CommScalar>(&self, _buf: &mut [T]) {}

    fn all_gather<T: CommScalar>(&self, local: &[T], out: &mut [T]) {
        assert_eq!(local.len(), out.len());
        out.copy_from_slice(local);
    }

    fn all_gather_varcount<T: CommScalar>(&self, local: &[T]) -> Vec<T> {
        local.to_vec()
    }

    fn all_to_all_varcount<T: CommScalar>(&self, items: &[T], send_counts: &[usize]) -> Vec<T> {
        assert_eq!(send_counts.iter().sum::<usize>(), items.len());
        items.to_vec()
    }

    fn broadcast<T: CommScalar>(&self, _buf: &mut [T], _root: usize) {}

    fn rotate<T: CommScalar>(&self, _buf: &mut [T]) {}

    fn barrier(&self) {}
}

#[cfg(feature = "mpi")]
mod mpi_comm {
    //! MPI-backed collectives, built on the `mpi` crate.

    use itertools::Itertools;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator, CommunicatorCollectives, Destination, Root, Source};
    use mpi::Count;

    use super::{Collectives, CommScalar};

    /// Collectives over an MPI communicator.
    pub struct MpiComm<'c> {
        comm: &'c SimpleCommunicator,
    }

    impl<'c> MpiComm<'c> {
        /// Wrap an MPI communicator.
        pub fn new(comm: &'c SimpleCommunicator) -> Self {
            Self { comm }
        }

        fn displacements(counts: &[Count]) -> Vec<Count> {
            counts
                .iter()
                .scan(0, |acc, &x| {
                    let tmp = *acc;
                    *acc += x;
                    Some(tmp)
                })
                .collect_vec()
        }
    }

    impl Collectives for MpiComm<'_> {
        fn size(&self) -> usize {
            self.comm.size() as usize
        }

        fn rank(&self) -> usize {
            self.comm.rank() as usize
        }

        fn sum_into<T: CommScalar>(&self, buf: &mut [T]) {
            let local = buf.to_vec();
            self.comm.all_reduce_into(
                &local[..],
                buf,
                mpi::collective::SystemOperation::sum(),
            );
        }

        fn min_into<T: CommScalar>(&self, buf: &mut [T]) {
            let local = buf.to_vec();
            self.comm.all_reduce_into(
                &local[..],
                buf,
                mpi::collective::SystemOperation::min(),
            );
        }

        fn max_into<T: CommScalar>(&self, buf: &mut [T]) {
            let local = buf.to_vec();
            self.comm.all_reduce_into(
                &local[..],
                buf,
                mpi::collective::SystemOperation::max(),
            );
        }

        fn all_gather<T: CommScalar>(&self, local: &[T], out: &mut [T]) {
            self.comm.all_gather_into(local, out);
        }

        fn all_gather_varcount<T: CommScalar>(&self, local: &[T]) -> Vec<T> {
            let size = self.size();
            let mut counts = vec![0 as Count; size];
            self.comm
                .all_gather_into(&[local.len() as Count], &mut counts[..]);

            let displs = Self::displacements(&counts);
            let total = counts.iter().sum::<Count>();

            let mut received = vec![T::default(); total as usize];
            let mut partition = PartitionMut::new(&mut received[..], counts, &displs[..]);
            self.comm.all_gather_varcount_into(local, &mut partition);
            received
        }

        fn all_to_all_varcount<T: CommScalar>(&self, items: &[T], send_counts: &[usize]) -> Vec<T> {
            let size = self.size();
            assert_eq!(send_counts.len(), size);

            let counts_snd = send_counts.iter().map(|&c| c as Count).collect_vec();
            let displs_snd = Self::displacements(&counts_snd);

            let mut counts_recv = vec![0 as Count; size];
            self.comm.all_to_all_into(&counts_snd, &mut counts_recv);
            let displs_recv = Self::displacements(&counts_recv);

            let total = counts_recv.iter().sum::<Count>();
            let mut received = vec![T::default(); total as usize];
            let mut partition_received =
                PartitionMut::new(&mut received[..], counts_recv, &displs_recv[..]);
            let partition_snd = Partition::new(items, counts_snd, &displs_snd[..]);
            self.comm
                .all_to_all_varcount_into(&partition_snd, &mut partition_received);
            received
        }

        fn broadcast<T: CommScalar>(&self, buf: &mut [T], root: usize) {
            self.comm
                .process_at_rank(root as mpi::Rank)
                .broadcast_into(buf);
        }

        fn rotate<T: CommScalar>(&self, buf: &mut [T]) {
            let size = self.comm.size();
            if size < 2 {
                return;
            }
            let rank = self.comm.rank();
            let next = (rank + 1) % size;
            let prev = (rank + size - 1) % size;

            let outgoing = buf.to_vec();
            mpi::request::scope(|scope| {
                let sreq = self
                    .comm
                    .process_at_rank(next)
                    .immediate_send(scope, &outgoing[..]);
                self.comm.process_at_rank(prev).receive_into(buf);
                sreq.wait();
            });
        }

        fn barrier(&self) {
            self.comm.barrier();
        }
    }
}
