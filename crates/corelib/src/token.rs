//! Ring positions.
//!
//! A token is a point in the 64-bit hash space. The space wraps around, so
//! the successor of `u64::MAX` is `0`.

use std::fmt;

/// Position on the hash ring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Token(pub u64);

impl Token {
    /// Minimum token value (start of ring).
    pub const MIN: Token = Token(0);
    /// Maximum token value (end of ring).
    pub const MAX: Token = Token(u64::MAX);

    /// Raw hash value.
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Clockwise distance from `self` to `other` on the ring.
    pub fn distance_to(&self, other: &Self) -> Self {
        Token(other.0.wrapping_sub(self.0))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_forward() {
        assert_eq!(Token(100).distance_to(&Token(250)), Token(150));
    }

    #[test]
    fn test_distance_wraps() {
        // Going clockwise from MAX - 1 to 1 crosses zero: MAX, 0, 1.
        assert_eq!(Token(u64::MAX - 1).distance_to(&Token(1)), Token(3));
        assert_eq!(Token::MAX.distance_to(&Token::MIN), Token(1));
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(Token(255).to_string(), "00000000000000ff");
    }
}
