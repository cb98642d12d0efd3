//! The machine word: a signed integer held to the range [-999, 999].
//!
//! Every arithmetic result and every value crossing an I/O boundary passes
//! through [`clamp`]. Operands are always in range before an operation, and
//! exactly one arithmetic step happens before clamping, so intermediate
//! overflow cannot occur in `i32`.

pub type Word = i32;

/// The largest value a word can hold; the smallest is its negation.
pub const WORD_MAX: Word = 999;

/// Clamp a value between -999 and 999.
pub fn clamp(value: Word) -> Word {
    value.max(-WORD_MAX).min(WORD_MAX)
}

#[cfg(test)]
mod tests {
    use yare::parameterized;

    use super::*;

    #[parameterized(
        zero = { 0, 0 },
        in_range_positive = { 417, 417 },
        in_range_negative = { -417, -417 },
        upper_bound = { 999, 999 },
        lower_bound = { -999, -999 },
        above = { 1000, 999 },
        below = { -1000, -999 },
        far_above = { i32::MAX, 999 },
        far_below = { i32::MIN, -999 },
    )]
    fn clamp_projects_onto_word_range(value: Word, expected: Word) {
        assert_eq!(clamp(value), expected);
    }

    #[test]
    fn clamp_is_idempotent() {
        for value in [-2000, -999, -1, 0, 1, 999, 2000] {
            assert_eq!(clamp(clamp(value)), clamp(value));
        }
    }

    #[test]
    fn clamp_distributes_over_in_range_addition() {
        for x in [-999, -500, 0, 500, 999] {
            for y in [-999, -1, 0, 1, 999] {
                assert_eq!(clamp(x + y), clamp(clamp(x) + clamp(y)));
            }
        }
    }
}
