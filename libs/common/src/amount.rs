use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[inline]
fn pow10(exp: usize) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// Ownership share expressed in fixed-point micro-percent.
///
/// `Percentage(100_000_000)` is `100.000000%`. Computed with integer
/// arithmetic only, so shares of a snapshot may not add up to exactly
/// `100.000000`; the remainder is never redistributed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Percentage(pub u128);

impl Percentage {
    pub const DECIMALS: usize = 6;
    pub const SCALE: u128 = 1_000_000;
    pub const ZERO: Percentage = Percentage(0);
    pub const HUNDRED: Percentage = Percentage(100 * Self::SCALE);

    /// `part * 100 * 10^6 / total`, truncated.
    pub fn of(part: U256, total: U256) -> Self {
        if total.is_zero() {
            return Self::ZERO;
        }
        let scaled = part.saturating_mul(U256::from(100 * Self::SCALE)) / total;
        Self(u128::try_from(scaled).unwrap_or(u128::MAX))
    }
}

impl core::fmt::Display for Percentage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let integral = self.0 / Self::SCALE;
        let fraction = self.0 % Self::SCALE;
        write!(
            f,
            "{}.{:0>width$}",
            integral,
            fraction,
            width = Self::DECIMALS
        )
    }
}

impl core::str::FromStr for Percentage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (integral, fraction) = s.split_once('.').unwrap_or((s, ""));
        if fraction.len() > Self::DECIMALS {
            return Err(format!("too many decimal digits in '{}'", s));
        }
        let integral: u128 = integral
            .parse()
            .map_err(|e| format!("invalid percentage '{}': {}", s, e))?;
        let padded = format!("{:0<width$}", fraction, width = Self::DECIMALS);
        let fraction: u128 = padded
            .parse()
            .map_err(|e| format!("invalid percentage '{}': {}", s, e))?;
        integral
            .checked_mul(Self::SCALE)
            .and_then(|v| v.checked_add(fraction))
            .map(Self)
            .ok_or_else(|| format!("percentage '{}' out of range", s))
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Percentage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw on-chain token quantity paired with the token's decimals, for display.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TokenAmount {
    pub raw: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }
}

impl core::fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let max_scale_len = self.decimals as usize;
        if max_scale_len == 0 {
            return write!(f, "{}", self.raw);
        }

        let scale = pow10(max_scale_len);
        let integral = self.raw / scale;
        let fraction = self.raw % scale;

        let frac_str = format!(
            "{:0>max_scale_len$}",
            fraction.to_string(),
            max_scale_len = max_scale_len
        );

        let final_frac_str = match f.precision() {
            Some(p) => &frac_str[0..p.min(max_scale_len)],
            None => {
                let trimmed = frac_str.trim_end_matches('0');
                if trimmed.is_empty() {
                    "0"
                } else {
                    trimmed
                }
            }
        };

        if final_frac_str.is_empty() {
            write!(f, "{}", integral)
        } else {
            write!(f, "{}.{}", integral, final_frac_str)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_percentage_sole_holder_is_exactly_hundred() {
        let supply = U256::from(7_000u64);
        let pct = Percentage::of(supply, supply);
        assert_eq!(pct, Percentage::HUNDRED);
        assert_eq!(pct.to_string(), "100.000000");
    }

    #[test]
    fn test_percentage_truncates() {
        let pct = Percentage::of(U256::from(1u64), U256::from(3u64));
        assert_eq!(pct.to_string(), "33.333333");

        let pct = Percentage::of(U256::from(4_200u64), U256::from(7_000u64));
        assert_eq!(pct.to_string(), "60.000000");
    }

    #[test]
    fn test_percentage_thirds_do_not_sum_to_hundred() {
        let total = U256::from(3u64);
        let sum: u128 = (0..3)
            .map(|_| Percentage::of(U256::from(1u64), total).0)
            .sum();
        assert_eq!(Percentage(sum).to_string(), "99.999999");
    }

    #[test]
    fn test_percentage_zero_supply() {
        assert_eq!(Percentage::of(U256::from(5u64), U256::ZERO), Percentage::ZERO);
        assert_eq!(Percentage::ZERO.to_string(), "0.000000");
    }

    #[test]
    fn test_percentage_parse_and_serde() {
        let pct: Percentage = "40.5".parse().unwrap();
        assert_eq!(pct, Percentage(40_500_000));
        assert!("1.1234567".parse::<Percentage>().is_err());

        let json = serde_json::to_string(&pct).unwrap();
        assert_eq!(json, "\"40.500000\"");
        let back: Percentage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pct);
    }

    #[test]
    fn test_token_amount_display() {
        let one_and_half = TokenAmount::new(U256::from(1_500_000_000_000_000_000u128), 18);
        assert_eq!(one_and_half.to_string(), "1.5");
        assert_eq!(format!("{:.2}", one_and_half), "1.50");

        let whole = TokenAmount::new(U256::from(4_200u64), 0);
        assert_eq!(whole.to_string(), "4200");

        let dust = TokenAmount::new(U256::from(1u64), 6);
        assert_eq!(dust.to_string(), "0.000001");
    }
}
