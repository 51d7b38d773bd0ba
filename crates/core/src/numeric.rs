use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};
use skiffql_common::{Error, Result};

/// Which fixed-point type a decimal belongs to. NUMERIC holds 38 total
/// digits with 9 fractional; BIGNUMERIC holds 76 with 38 fractional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecimalKind {
    Numeric,
    BigNumeric,
}

impl DecimalKind {
    pub fn scale(self) -> u32 {
        match self {
            DecimalKind::Numeric => 9,
            DecimalKind::BigNumeric => 38,
        }
    }

    pub fn max_digits(self) -> u32 {
        match self {
            DecimalKind::Numeric => 38,
            DecimalKind::BigNumeric => 76,
        }
    }

    pub fn integer_digits(self) -> u32 {
        self.max_digits() - self.scale()
    }

    pub fn name(self) -> &'static str {
        match self {
            DecimalKind::Numeric => "NUMERIC",
            DecimalKind::BigNumeric => "BIGNUMERIC",
        }
    }
}

/// Arbitrary-precision mantissa scaled to the kind's fractional digits.
/// `+ - *` are exact up to the digit cap; `/` rounds half-even back to
/// the kind's scale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FixedDecimal {
    kind: DecimalKind,
    mantissa: BigInt,
}

fn pow10(n: u32) -> BigInt {
    BigInt::from(10u8).pow(n)
}

/// n / d with ties rounded to the even quotient. `d` must be positive.
fn div_half_even(n: &BigInt, d: &BigInt) -> BigInt {
    let (q, r) = n.div_rem(d);
    if r.is_zero() {
        return q;
    }
    let away: BigInt = if n.is_negative() {
        &q - 1u8
    } else {
        &q + 1u8
    };
    let double = r.abs() * 2u8;
    match double.cmp(d) {
        Ordering::Greater => away,
        Ordering::Less => q,
        Ordering::Equal => {
            if q.is_odd() {
                away
            } else {
                q
            }
        }
    }
}

/// n / d with ties rounded away from zero. `d` must be positive.
fn div_half_away(n: &BigInt, d: &BigInt) -> BigInt {
    let (q, r) = n.div_rem(d);
    if r.abs() * 2u8 >= *d {
        if n.is_negative() { &q - 1u8 } else { &q + 1u8 }
    } else {
        q
    }
}

impl FixedDecimal {
    pub fn zero(kind: DecimalKind) -> Self {
        Self {
            kind,
            mantissa: BigInt::from(0u8),
        }
    }

    pub fn from_i64(kind: DecimalKind, v: i64) -> Self {
        Self {
            kind,
            mantissa: BigInt::from(v) * pow10(kind.scale()),
        }
    }

    pub fn from_f64(kind: DecimalKind, v: f64) -> Result<Self> {
        if !v.is_finite() {
            return Err(Error::type_coercion(format!(
                "{} cannot represent {}",
                kind.name(),
                v
            )));
        }
        Self::parse(kind, &format!("{:.*}", kind.scale() as usize, v))
    }

    pub fn from_mantissa(kind: DecimalKind, mantissa: BigInt) -> Self {
        Self { kind, mantissa }
    }

    pub fn kind(&self) -> DecimalKind {
        self.kind
    }

    pub fn mantissa(&self) -> &BigInt {
        &self.mantissa
    }

    /// Parses a decimal literal, optionally with an exponent, rounding
    /// half-even to the kind's scale.
    pub fn parse(kind: DecimalKind, input: &str) -> Result<Self> {
        let s = input.trim();
        let bad = || Error::type_coercion(format!("invalid {} literal {:?}", kind.name(), input));
        let (sign, rest) = match s.as_bytes().first() {
            Some(b'-') => (-1i8, &s[1..]),
            Some(b'+') => (1i8, &s[1..]),
            _ => (1i8, s),
        };
        let (mantissa_part, exp) = match rest.find(['e', 'E']) {
            Some(pos) => {
                let exp: i32 = rest[pos + 1..].parse().map_err(|_| bad())?;
                (&rest[..pos], exp)
            }
            None => (rest, 0),
        };
        let (int_part, frac_part) = match mantissa_part.find('.') {
            Some(pos) => (&mantissa_part[..pos], &mantissa_part[pos + 1..]),
            None => (mantissa_part, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }
        let digits: String = [int_part, frac_part].concat();
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let mut mantissa: BigInt = digits.parse().map_err(|_| bad())?;
        if sign < 0 {
            mantissa = -mantissa;
        }
        // digits currently carry frac_part.len() - exp fractional places
        let have = frac_part.len() as i64 - exp as i64;
        let want = kind.scale() as i64;
        if have < want {
            mantissa *= pow10((want - have) as u32);
        } else if have > want {
            mantissa = div_half_even(&mantissa, &pow10((have - want) as u32));
        }
        Self { kind, mantissa }.checked(input)
    }

    fn checked(self, context: &str) -> Result<Self> {
        if self.mantissa.abs() >= pow10(self.kind.max_digits()) {
            return Err(Error::overflow(format!(
                "{} out of range: {}",
                self.kind.name(),
                context
            )));
        }
        Ok(self)
    }

    fn expect_same_kind(&self, other: &Self) -> Result<()> {
        if self.kind != other.kind {
            return Err(Error::internal(format!(
                "mixed decimal kinds {} and {}",
                self.kind.name(),
                other.kind.name()
            )));
        }
        Ok(())
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        self.expect_same_kind(other)?;
        Self {
            kind: self.kind,
            mantissa: &self.mantissa + &other.mantissa,
        }
        .checked("addition")
    }

    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.expect_same_kind(other)?;
        Self {
            kind: self.kind,
            mantissa: &self.mantissa - &other.mantissa,
        }
        .checked("subtraction")
    }

    /// Exact product at double scale, rounded half-even back to the type
    /// scale, then range-checked.
    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.expect_same_kind(other)?;
        let product = &self.mantissa * &other.mantissa;
        Self {
            kind: self.kind,
            mantissa: div_half_even(&product, &pow10(self.kind.scale())),
        }
        .checked("multiplication")
    }

    pub fn div(&self, other: &Self, context: &str) -> Result<Self> {
        self.expect_same_kind(other)?;
        if other.mantissa.is_zero() {
            return Err(Error::division_by_zero(context));
        }
        let scaled = &self.mantissa * pow10(self.kind.scale());
        let mantissa = if other.mantissa.is_negative() {
            div_half_even(&-scaled, &other.mantissa.abs())
        } else {
            div_half_even(&scaled, &other.mantissa)
        };
        Self {
            kind: self.kind,
            mantissa,
        }
        .checked("division")
    }

    pub fn neg(&self) -> Self {
        Self {
            kind: self.kind,
            mantissa: -&self.mantissa,
        }
    }

    pub fn abs(&self) -> Self {
        Self {
            kind: self.kind,
            mantissa: self.mantissa.abs(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa.is_negative()
    }

    /// Rescale into the other kind; widening is exact, narrowing rounds
    /// half-even and range-checks.
    pub fn rescale(&self, kind: DecimalKind) -> Result<Self> {
        if kind == self.kind {
            return Ok(self.clone());
        }
        let diff = kind.scale() as i64 - self.kind.scale() as i64;
        let mantissa = if diff >= 0 {
            &self.mantissa * pow10(diff as u32)
        } else {
            div_half_even(&self.mantissa, &pow10((-diff) as u32))
        };
        Self { kind, mantissa }.checked("rescale")
    }

    pub fn to_f64(&self) -> f64 {
        self.to_canonical_string().parse().unwrap_or(f64::NAN)
    }

    /// Integer conversion rounds half away from zero, matching CAST to
    /// INT64.
    pub fn to_i64(&self, context: &str) -> Result<i64> {
        let rounded = div_half_away(&self.mantissa, &pow10(self.kind.scale()));
        rounded
            .to_i64()
            .ok_or_else(|| Error::overflow(format!("{}: INT64 out of range", context)))
    }

    /// Canonical display form: no padding, trailing fractional zeros
    /// trimmed.
    pub fn to_canonical_string(&self) -> String {
        let scale = pow10(self.kind.scale());
        let (int_part, frac_part) = self.mantissa.abs().div_rem(&scale);
        let sign = if self.mantissa.is_negative() { "-" } else { "" };
        let frac = format!("{:0width$}", frac_part, width = self.kind.scale() as usize);
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            format!("{}{}", sign, int_part)
        } else {
            format!("{}{}.{}", sign, int_part, frac)
        }
    }

    /// Fixed-width sign-and-complement form that compares
    /// lexicographically like the number: sign byte '1' for >= 0 with
    /// plain zero-padded digits, '0' for < 0 with nine's-complement
    /// digits.
    pub fn ordered_encoding(&self) -> String {
        let scale = pow10(self.kind.scale());
        let (int_part, frac_part) = self.mantissa.abs().div_rem(&scale);
        let int_width = self.kind.integer_digits() as usize;
        let frac_width = self.kind.scale() as usize;
        let digits = format!(
            "{:0int_width$}.{:0frac_width$}",
            int_part, frac_part,
        );
        if self.mantissa.is_negative() {
            let complemented: String = digits
                .chars()
                .map(|c| match c {
                    '0'..='9' => char::from(b'9' - (c as u8 - b'0')),
                    other => other,
                })
                .collect();
            format!("0{}", complemented)
        } else {
            format!("1{}", digits)
        }
    }

    pub fn from_ordered_encoding(kind: DecimalKind, s: &str) -> Result<Self> {
        let bad = || Error::type_coercion(format!("invalid {} encoding {:?}", kind.name(), s));
        let (sign, digits) = s.split_at_checked(1).ok_or_else(bad)?;
        let negative = match sign {
            "1" => false,
            "0" => true,
            _ => return Err(bad()),
        };
        let expected_len = (kind.max_digits() + 1) as usize;
        if digits.len() != expected_len {
            return Err(bad());
        }
        let restored: String = if negative {
            digits
                .chars()
                .map(|c| match c {
                    '0'..='9' => char::from(b'9' - (c as u8 - b'0')),
                    other => other,
                })
                .collect()
        } else {
            digits.to_string()
        };
        let mut value = Self::parse(kind, &restored)?;
        if negative {
            value = value.neg();
        }
        Ok(value)
    }
}

impl PartialOrd for FixedDecimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FixedDecimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.kind, other.kind) {
            (a, b) if a == b => self.mantissa.cmp(&other.mantissa),
            // Cross-kind comparison widens; rescale of a NUMERIC into
            // BIGNUMERIC cannot fail.
            (DecimalKind::Numeric, _) => self
                .rescale(DecimalKind::BigNumeric)
                .map(|w| w.mantissa.cmp(&other.mantissa))
                .unwrap_or(Ordering::Equal),
            (_, DecimalKind::Numeric) => other
                .rescale(DecimalKind::BigNumeric)
                .map(|w| self.mantissa.cmp(&w.mantissa))
                .unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> FixedDecimal {
        FixedDecimal::parse(DecimalKind::Numeric, s).unwrap()
    }

    #[test]
    fn exact_addition_and_multiplication() {
        let a = num("12345678901234567890.123456789");
        let b = num("0.000000001");
        assert_eq!(
            a.add(&b).unwrap().to_canonical_string(),
            "12345678901234567890.12345679"
        );
        let c = num("1.5");
        let d = num("2.5");
        assert_eq!(c.mul(&d).unwrap().to_canonical_string(), "3.75");
    }

    #[test]
    fn division_rounds_half_even() {
        let one = num("1");
        let three = num("3");
        assert_eq!(
            one.div(&three, "DIV").unwrap().to_canonical_string(),
            "0.333333333"
        );
        // 0.0000000025 rounds to the even 9th digit
        let a = num("0.000000005");
        let two = num("2");
        assert_eq!(
            a.div(&two, "DIV").unwrap().to_canonical_string(),
            "0.000000002"
        );
        let b = num("0.000000015");
        assert_eq!(
            b.div(&two, "DIV").unwrap().to_canonical_string(),
            "0.000000008"
        );
    }

    #[test]
    fn division_by_zero() {
        let one = num("1");
        let zero = num("0");
        assert!(matches!(
            one.div(&zero, "DIV"),
            Err(Error::DivisionByZero(_))
        ));
    }

    #[test]
    fn overflow_past_38_digits() {
        let big = num("99999999999999999999999999999.999999999");
        assert!(matches!(big.add(&num("1")), Err(Error::Overflow(_))));
        // A product whose exact value exceeds range but rounds back in
        // still overflows only if it stays out after rounding.
        assert!(matches!(big.mul(&num("2")), Err(Error::Overflow(_))));
    }

    #[test]
    fn negative_parsing_and_display() {
        assert_eq!(num("-1.750000000").to_canonical_string(), "-1.75");
        assert_eq!(num("-0.000000000").to_canonical_string(), "0");
    }

    #[test]
    fn ordered_encoding_sorts_like_numbers() {
        let values = ["-100.5", "-1", "-0.000000001", "0", "0.5", "1", "99.25"];
        let mut encoded: Vec<String> = values
            .iter()
            .map(|v| num(v).ordered_encoding())
            .collect();
        let sorted = encoded.clone();
        encoded.sort();
        assert_eq!(encoded, sorted);
        for v in values {
            let d = num(v);
            let back = FixedDecimal::from_ordered_encoding(
                DecimalKind::Numeric,
                &d.ordered_encoding(),
            )
            .unwrap();
            assert_eq!(back, d);
        }
    }

    #[test]
    fn bignumeric_holds_76_digits() {
        let wide = FixedDecimal::parse(
            DecimalKind::BigNumeric,
            "12345678901234567890123456789012345678.12345678901234567890123456789012345678",
        )
        .unwrap();
        assert_eq!(
            wide.add(&FixedDecimal::zero(DecimalKind::BigNumeric))
                .unwrap(),
            wide
        );
    }

    #[test]
    fn int64_conversion_rounds_half_away() {
        assert_eq!(num("2.5").to_i64("CAST").unwrap(), 3);
        assert_eq!(num("-2.5").to_i64("CAST").unwrap(), -3);
        assert_eq!(num("2.4").to_i64("CAST").unwrap(), 2);
    }
}
