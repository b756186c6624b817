//! Facilitator fee computation.
//!
//! Pure integer math over [`U256`]: the fee is floored at `FEE_BPS` basis
//! points and the remainder goes to the merchant, so `fee + net == amount`
//! holds exactly for every input.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// Facilitator fee in basis points (1%).
pub const FEE_BPS: u64 = 100;

const BPS_DENOMINATOR: u64 = 10_000;

/// A single amount expressed in both human and base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAmount {
    pub human: String,
    pub base: String,
    pub symbol: String,
}

/// Gross/fee/net decomposition attached to every verify and settle response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub amount: MoneyAmount,
    pub fee: MoneyAmount,
    pub net: MoneyAmount,
}

/// Split `amount` base units into `(fee, net)` at [`FEE_BPS`].
pub fn fee_parts(amount: U256) -> (U256, U256) {
    let fee = amount * U256::from(FEE_BPS) / U256::from(BPS_DENOMINATOR);
    (fee, amount - fee)
}

/// Build the full breakdown for a gross amount.
pub fn split(amount: U256, decimals: u8, symbol: &str) -> FeeBreakdown {
    let (fee, net) = fee_parts(amount);
    FeeBreakdown {
        amount: money(amount, decimals, symbol),
        fee: money(fee, decimals, symbol),
        net: money(net, decimals, symbol),
    }
}

fn money(base: U256, decimals: u8, symbol: &str) -> MoneyAmount {
    MoneyAmount {
        human: format_units(base, decimals),
        base: base.to_string(),
        symbol: symbol.to_string(),
    }
}

/// Format base units as a decimal string with trailing zeros trimmed.
pub fn format_units(value: U256, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let whole = value / scale;
    let frac = value % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    format!("{whole}.{frac}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_one_usdc() {
        let b = split(U256::from(1_000_000u64), 6, "USDC");
        assert_eq!(b.amount.human, "1");
        assert_eq!(b.fee.human, "0.01");
        assert_eq!(b.net.human, "0.99");
        assert_eq!(b.fee.base, "10000");
        assert_eq!(b.net.base, "990000");
    }

    #[test]
    fn test_fee_plus_net_equals_amount() {
        for raw in [0u64, 1, 99, 100, 10_001, 1_000_000, u64::MAX] {
            let amount = U256::from(raw);
            let (fee, net) = fee_parts(amount);
            assert_eq!(fee + net, amount);
            assert_eq!(fee, amount * U256::from(100u64) / U256::from(10_000u64));
        }
    }

    #[test]
    fn test_fee_floors() {
        // 99 base units at 1% floors to 0
        let (fee, net) = fee_parts(U256::from(99u64));
        assert_eq!(fee, U256::ZERO);
        assert_eq!(net, U256::from(99u64));
    }

    #[test]
    fn test_format_units_trims_trailing_zeros() {
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(1_000_000u64), 6), "1");
        assert_eq!(format_units(U256::from(123u64), 6), "0.000123");
        assert_eq!(format_units(U256::ZERO, 6), "0");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
    }

    #[test]
    fn test_format_units_eighteen_decimals() {
        let one = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(format_units(one, 18), "1");
        assert_eq!(format_units(one / U256::from(4u64), 18), "0.25");
    }
}
