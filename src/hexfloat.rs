// Copyright (c) 2026 Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Hexadecimal floating-point formatting for the policy wire protocol.
//!
//! Produces the same representation as C's `printf("%a", v)`: a lossless
//! round-trip form that `float.fromhex` on the policy side parses exactly,
//! with none of the rounding questions a decimal rendering would raise.

const FRAC_BITS: u32 = 52;
const FRAC_MASK: u64 = (1 << FRAC_BITS) - 1;
const EXP_MASK: u64 = 0x7ff;
const EXP_BIAS: i64 = 1023;

/// Formats `v` as a C `%a`-style hexadecimal float, e.g. `0x1.4p+1` for 2.5.
///
/// Normal values print with a `1.` significand, subnormals with `0.` and the
/// fixed minimum exponent, and trailing zero hex digits are trimmed.
pub fn format_hex(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v.is_sign_negative() { "-inf" } else { "inf" }.to_string();
    }

    let bits = v.to_bits();
    let sign = if bits >> 63 != 0 { "-" } else { "" };
    let biased_exp = ((bits >> FRAC_BITS) & EXP_MASK) as i64;
    let frac = bits & FRAC_MASK;

    if biased_exp == 0 && frac == 0 {
        return format!("{sign}0x0p+0");
    }

    // Subnormals keep a leading 0 digit and the minimum normal exponent,
    // matching glibc's rendering.
    let (lead, exp) = if biased_exp == 0 {
        ('0', -1022)
    } else {
        ('1', biased_exp - EXP_BIAS)
    };

    if frac == 0 {
        return format!("{sign}0x{lead}p{exp:+}");
    }

    let mut digits = format!("{frac:013x}");
    while digits.ends_with('0') {
        digits.pop();
    }
    format!("{sign}0x{lead}.{digits}p{exp:+}")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exact power of two, valid down to the smallest subnormal.
    fn pow2(e: i32) -> f64 {
        if e >= -1022 {
            f64::from_bits(((e as i64 + EXP_BIAS) as u64) << FRAC_BITS)
        } else {
            f64::from_bits(1u64 << (e + 1074))
        }
    }

    /// Inverse of format_hex, used to prove round-trips.
    fn parse_hex(s: &str) -> f64 {
        match s {
            "inf" => return f64::INFINITY,
            "-inf" => return f64::NEG_INFINITY,
            "nan" => return f64::NAN,
            _ => {}
        }

        let (sign, rest) = match s.strip_prefix('-') {
            Some(rest) => (-1.0, rest),
            None => (1.0, s),
        };
        let rest = rest.strip_prefix("0x").unwrap();
        let (mantissa, exp) = rest.split_once('p').unwrap();
        let exp: i32 = exp.parse().unwrap();

        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        let mut significand = u64::from_str_radix(int_part, 16).unwrap();
        for d in frac_part.chars() {
            significand = significand * 16 + d.to_digit(16).unwrap() as u64;
        }
        let scale = exp - 4 * frac_part.len() as i32;
        sign * significand as f64 * pow2(scale)
    }

    #[test]
    fn test_known_forms() {
        assert_eq!(format_hex(0.0), "0x0p+0");
        assert_eq!(format_hex(-0.0), "-0x0p+0");
        assert_eq!(format_hex(1.0), "0x1p+0");
        assert_eq!(format_hex(2.0), "0x1p+1");
        assert_eq!(format_hex(2.5), "0x1.4p+1");
        assert_eq!(format_hex(-2.5), "-0x1.4p+1");
        assert_eq!(format_hex(100.0), "0x1.9p+6");
        assert_eq!(format_hex(0.5), "0x1p-1");
        assert_eq!(format_hex(f64::MIN_POSITIVE), "0x1p-1022");
        // Smallest subnormal.
        assert_eq!(format_hex(5e-324), "0x0.0000000000001p-1022");
    }

    #[test]
    fn test_specials() {
        assert_eq!(format_hex(f64::INFINITY), "inf");
        assert_eq!(format_hex(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_hex(f64::NAN), "nan");
    }

    #[test]
    fn test_round_trip() {
        let cases = [
            0.0,
            1.0,
            -1.0,
            2.5,
            0.1,
            1.0 / 3.0,
            1234.5678,
            99.95,
            f64::MAX,
            f64::MIN_POSITIVE,
            5e-324,
            1e-310, // subnormal with a long fraction
        ];
        for v in cases {
            let formatted = format_hex(v);
            let back = parse_hex(&formatted);
            assert_eq!(back.to_bits(), v.to_bits(), "{v} -> {formatted} -> {back}");
        }
    }
}
