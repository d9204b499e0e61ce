//! Space-filling-curve functionality: Hilbert indexing and the
//! redistribution of distributed point sets along the curve.

pub mod hilbert;
pub mod redistribute;

pub use hilbert::{hilbert_index, hilbert_indices, index_to_point, resolution};
pub use redistribute::{confirm_distribution, redistribute};
