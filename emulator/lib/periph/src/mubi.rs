/*++

Licensed under the Apache-2.0 license.

File Name:

    mubi.rs

Abstract:

    File contains the multi-bit boolean encodings and the W1S/W1C/W0C
    register combinators.

--*/

pub const MB4_TRUE: u32 = 0x6;
pub const MB4_FALSE: u32 = 0x9;
pub const MB8_TRUE: u32 = 0x96;
pub const MB8_FALSE: u32 = 0x69;
pub const MB12_TRUE: u32 = 0x696;
pub const MB12_FALSE: u32 = 0x969;
pub const MB16_TRUE: u32 = 0x9696;
pub const MB16_FALSE: u32 = 0x6969;

/// Bit-parallel AND: on bits where `true_val` is 1 the operands are ANDed,
/// on the others they are ORed, so `true_val` behaves as logical 1.
const fn mubi_and(a: u32, b: u32, true_val: u32, mask: u32) -> u32 {
    ((a & b & true_val) | ((a | b) & !true_val)) & mask
}

/// Bit-parallel OR, dual of [`mubi_and`].
const fn mubi_or(a: u32, b: u32, true_val: u32, mask: u32) -> u32 {
    (((a | b) & true_val) | (a & b & !true_val)) & mask
}

macro_rules! mubi_width {
    ($bits:literal, $t:ident, $f:ident,
     $test_true:ident, $test_false:ident, $from_bool:ident,
     $and:ident, $or:ident, $and_hi:ident, $or_hi:ident, $and_lo:ident, $or_lo:ident) => {
        pub const fn $test_true(val: u32) -> bool {
            val == $t
        }

        pub const fn $test_false(val: u32) -> bool {
            val == $f
        }

        pub const fn $from_bool(val: bool) -> u32 {
            if val {
                $t
            } else {
                $f
            }
        }

        pub const fn $and(a: u32, b: u32, true_val: u32) -> u32 {
            mubi_and(a, b, true_val, (1 << $bits) - 1)
        }

        pub const fn $or(a: u32, b: u32, true_val: u32) -> u32 {
            mubi_or(a, b, true_val, (1 << $bits) - 1)
        }

        pub const fn $and_hi(a: u32, b: u32) -> u32 {
            $and(a, b, $t)
        }

        pub const fn $or_hi(a: u32, b: u32) -> u32 {
            $or(a, b, $t)
        }

        pub const fn $and_lo(a: u32, b: u32) -> u32 {
            $and(a, b, $f)
        }

        pub const fn $or_lo(a: u32, b: u32) -> u32 {
            $or(a, b, $f)
        }
    };
}

mubi_width!(4, MB4_TRUE, MB4_FALSE, mubi4_test_true_strict, mubi4_test_false_strict,
    mubi4_from_bool, mubi4_and, mubi4_or, mubi4_and_hi, mubi4_or_hi, mubi4_and_lo, mubi4_or_lo);
mubi_width!(8, MB8_TRUE, MB8_FALSE, mubi8_test_true_strict, mubi8_test_false_strict,
    mubi8_from_bool, mubi8_and, mubi8_or, mubi8_and_hi, mubi8_or_hi, mubi8_and_lo, mubi8_or_lo);
mubi_width!(12, MB12_TRUE, MB12_FALSE, mubi12_test_true_strict, mubi12_test_false_strict,
    mubi12_from_bool, mubi12_and, mubi12_or, mubi12_and_hi, mubi12_or_hi, mubi12_and_lo,
    mubi12_or_lo);
mubi_width!(16, MB16_TRUE, MB16_FALSE, mubi16_test_true_strict, mubi16_test_false_strict,
    mubi16_from_bool, mubi16_and, mubi16_or, mubi16_and_hi, mubi16_or_hi, mubi16_and_lo,
    mubi16_or_lo);

/// Write-one-to-set
#[inline]
pub const fn w1s(old: u32, val: u32) -> u32 {
    old | val
}

/// Write-one-to-clear
#[inline]
pub const fn w1c(old: u32, val: u32) -> u32 {
    old & !val
}

/// Write-zero-to-clear
#[inline]
pub const fn w0c(old: u32, val: u32) -> u32 {
    old & val
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodings_are_distant() {
        for (t, f, n) in [
            (MB4_TRUE, MB4_FALSE, 4),
            (MB8_TRUE, MB8_FALSE, 8),
            (MB12_TRUE, MB12_FALSE, 12),
            (MB16_TRUE, MB16_FALSE, 16),
        ] {
            assert!((t ^ f).count_ones() >= n / 2);
        }
    }

    #[test]
    fn test_and_or_hi() {
        assert_eq!(mubi4_and_hi(MB4_TRUE, MB4_TRUE), MB4_TRUE);
        assert_eq!(mubi4_and_hi(MB4_TRUE, MB4_FALSE), MB4_FALSE);
        assert_eq!(mubi4_and_hi(MB4_FALSE, MB4_FALSE), MB4_FALSE);
        assert_eq!(mubi4_or_hi(MB4_TRUE, MB4_FALSE), MB4_TRUE);
        assert_eq!(mubi4_or_hi(MB4_FALSE, MB4_FALSE), MB4_FALSE);
        assert_eq!(mubi8_and_hi(MB8_TRUE, MB8_TRUE), MB8_TRUE);
        assert_eq!(mubi8_or_hi(MB8_FALSE, MB8_TRUE), MB8_TRUE);
        assert_eq!(mubi16_and_hi(MB16_TRUE, MB16_FALSE), MB16_FALSE);
    }

    #[test]
    fn test_and_lo_treats_false_as_one() {
        assert_eq!(mubi4_and_lo(MB4_FALSE, MB4_FALSE), MB4_FALSE);
        assert_eq!(mubi4_and_lo(MB4_FALSE, MB4_TRUE), MB4_TRUE);
        assert_eq!(mubi12_or_lo(MB12_FALSE, MB12_TRUE), MB12_FALSE);
    }

    #[test]
    fn test_strict_checks() {
        assert!(mubi4_test_true_strict(MB4_TRUE));
        assert!(!mubi4_test_true_strict(0xf));
        assert!(!mubi4_test_false_strict(0x0));
        assert_eq!(mubi8_from_bool(true), MB8_TRUE);
        assert_eq!(mubi16_from_bool(false), MB16_FALSE);
    }

    #[test]
    fn test_combinators() {
        assert_eq!(w1s(0b0101, 0b0011), 0b0111);
        assert_eq!(w1c(0b0101, 0b0011), 0b0100);
        assert_eq!(w0c(0b0101, 0b0011), 0b0001);
    }
}
