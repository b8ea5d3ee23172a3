//! Deterministic randomness and per-tree row sampling.
//!
//! Every stochastic decision is drawn from a [`ChaCha8Rng`] seeded by
//! [`derive_seed`], so a forest is reproducible from its base seed no matter
//! how rayon schedules the chunks.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::row_state::{RowState, nid_to_oob};

/// Independent random streams drawn for each tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    /// Random uniform response placeholder.
    Response,
    /// In-bag / out-of-bag mask.
    Bagging,
    /// Per-tree column sampling, per-node column choice and shuffles.
    Columns,
}

impl Stream {
    fn salt(self) -> u64 {
        match self {
            Stream::Response => 0x5245_5350_4f4e_5345,
            Stream::Bagging => 0x4241_4747_494e_4721,
            Stream::Columns => 0x434f_4c55_4d4e_5321,
        }
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derive the seed for one tree and one row offset from the base seed.
///
/// Pure: equal inputs always give equal outputs, and neighbouring tree
/// indices or offsets give unrelated seeds.
#[must_use]
pub fn derive_seed(base: u64, tree_index: usize, row_offset: usize) -> u64 {
    splitmix64(splitmix64(splitmix64(base) ^ tree_index as u64) ^ row_offset as u64)
}

/// RNG for `stream` of tree `tree_index`, positioned at `row_offset`.
pub(crate) fn stream_rng(stream: Stream, base: u64, tree_index: usize, row_offset: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(derive_seed(base ^ stream.salt(), tree_index, row_offset))
}

/// Fill the response placeholder and bagging mask for one tree.
///
/// Each row receives a uniform `[0, 1)` response. A row is out of bag when
/// its bagging draw is `>= sample_rate`; its node id is then the out-of-bag
/// encoding of the root. Returns the number of in-bag rows.
#[instrument(skip_all, fields(tree = tree_index, sample_rate))]
pub(crate) fn sample_rows(
    state: &mut RowState,
    base_seed: u64,
    tree_index: usize,
    sample_rate: f64,
    chunk_rows: usize,
) -> usize {
    let in_bag: usize = state
        .nids
        .par_chunks_mut(chunk_rows)
        .zip(state.response.par_chunks_mut(chunk_rows))
        .enumerate()
        .map(|(chunk, (nids, response))| {
            let offset = chunk * chunk_rows;
            let mut response_rng = stream_rng(Stream::Response, base_seed, tree_index, offset);
            let mut bag_rng = stream_rng(Stream::Bagging, base_seed, tree_index, offset);
            let mut kept = 0;
            for (nid, y) in nids.iter_mut().zip(response.iter_mut()) {
                *y = response_rng.r#gen::<f64>();
                if bag_rng.r#gen::<f64>() < sample_rate {
                    *nid = 0;
                    kept += 1;
                } else {
                    *nid = nid_to_oob(0);
                }
            }
            kept
        })
        .sum();

    debug!(in_bag, out_of_bag = state.n_rows() - in_bag, "rows sampled");
    in_bag
}
