//! Random non-repeating sequence generation
//!
//! Produces the randomized target orders used by the flash plans and the
//! training protocols. Output is a concatenation of shuffled permutation
//! blocks over `[min..=max]`, so no value repeats within a block, and the
//! first value of each block is forced to differ from the last value of the
//! previous block so targets never fire back-to-back across block
//! boundaries. The final partial block is a prefix of one more full shuffle.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// How block-boundary collisions are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Re-draw the whole block until its head differs, bounded at
    /// [`MAX_REDRAWS`] attempts.
    Block,
    /// Manual Fisher-Yates shuffle; on collision swap the first two
    /// elements, which always resolves because block values are distinct.
    FisherYates,
}

/// Redraw bound for [`Algorithm::Block`]. Exceeding it keeps the colliding
/// draw and logs a warning rather than aborting mid-session.
pub const MAX_REDRAWS: usize = 100;

/// Generate `len` values in `[min..=max]` with the default block algorithm
/// and thread-local randomness.
pub fn generate(len: usize, min: i32, max: i32) -> EngineResult<Vec<i32>> {
    generate_with(&mut rand::thread_rng(), Algorithm::Block, len, min, max)
}

/// Generate `len` values in `[min..=max]` using the given algorithm and RNG.
pub fn generate_with<R: Rng + ?Sized>(
    rng: &mut R,
    algorithm: Algorithm,
    len: usize,
    min: i32,
    max: i32,
) -> EngineResult<Vec<i32>> {
    if max < min {
        return Err(EngineError::InvalidRange { min, max });
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    if min == max {
        return Ok(vec![min; len]);
    }

    let range: Vec<i32> = (min..=max).collect();
    let mut out = Vec::with_capacity(len);
    let mut prev_last: Option<i32> = None;

    while out.len() < len {
        let block = draw_block(rng, algorithm, &range, prev_last);
        let remaining = len - out.len();
        if remaining < block.len() {
            // Remainder block: an unshuffled-length prefix of one more full
            // shuffle.
            out.extend_from_slice(&block[..remaining]);
        } else {
            prev_last = block.last().copied();
            out.extend_from_slice(&block);
        }
    }

    Ok(out)
}

fn draw_block<R: Rng + ?Sized>(
    rng: &mut R,
    algorithm: Algorithm,
    range: &[i32],
    prev_last: Option<i32>,
) -> Vec<i32> {
    match algorithm {
        Algorithm::Block => {
            let mut block = range.to_vec();
            block.shuffle(rng);
            let mut attempts = 0;
            while prev_last == block.first().copied() {
                attempts += 1;
                if attempts > MAX_REDRAWS {
                    warn!(
                        attempts,
                        "block redraw bound exhausted, accepting boundary repeat"
                    );
                    break;
                }
                block.shuffle(rng);
            }
            block
        }
        Algorithm::FisherYates => {
            let mut block = range.to_vec();
            for i in (1..block.len()).rev() {
                let j = rng.gen_range(0..=i);
                block.swap(i, j);
            }
            if prev_last == block.first().copied() {
                block.swap(0, 1);
            }
            block
        }
    }
}
