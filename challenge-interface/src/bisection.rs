//! Canonical midpoints for narrowing a disputed range.

/// Errors from [`bisection_point`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BisectionError {
    /// The range has no height strictly between its endpoints.
    #[error("invalid bisection range: pre height {pre}, post height {post}")]
    InvalidRange {
        /// Lower end of the range.
        pre: u64,
        /// Upper end of the range.
        post: u64,
    },
}

/// Returns the height rivals must bisect `[pre, post]` at.
///
/// The midpoint keeps the bits `post - 1` shares with `pre` down to and including the
/// most significant bit where they differ, and clears everything below it. Two parties
/// bisecting the same range therefore always pick the same height, and repeated bisection
/// lands on power-of-two aligned boundaries that rival histories share.
///
/// Requires `post >= pre + 2`.
pub fn bisection_point(pre: u64, post: u64) -> Result<u64, BisectionError> {
    let invalid = BisectionError::InvalidRange { pre, post };
    let min_post = pre.checked_add(2).ok_or(invalid)?;
    if post < min_post {
        return Err(invalid);
    }
    if post == min_post {
        return Ok(pre + 1);
    }
    let last = post - 1;
    // `last > pre`, so the xor is non-zero and the highest differing bit is set in `last`.
    let diff_bit = 63 - (last ^ pre).leading_zeros();
    let below = (1u64 << diff_bit) - 1;
    Ok(last & !below)
}
