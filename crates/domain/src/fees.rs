use crate::token::TokenAmount;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Denominator for fee ratios: 10_000 = 100%.
pub const FEE_RATIO_DENOMINATOR: u32 = 10_000;

/// Applies a fee ratio to an amount, rounding down.
#[must_use]
pub fn apply_ratio(amount: TokenAmount, ratio: u32) -> TokenAmount {
    let scaled = amount.0.saturating_mul(U256::from(ratio));
    TokenAmount(scaled / U256::from(FEE_RATIO_DENOMINATOR))
}

/// One tier of the license schedule: holders of at least `min_licenses`
/// licenses forward `fraction` (in ratio units) of the performance fee
/// ratio to the protocol as the service fee ratio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LicenseTier {
    pub min_licenses: u32,
    pub fraction: u32,
}

/// License-tier lookup table deriving the service fee ratio from the
/// performance fee ratio.
///
/// The service fee is carved out of the performance fee: the curator
/// receives the performance fee net of the service fee, so the fraction is
/// capped at 50% to keep the curator's share at least as large as the
/// protocol's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseSchedule {
    tiers: Vec<LicenseTier>,
}

/// Largest fraction a tier may forward to the protocol.
pub const MAX_SERVICE_FRACTION: u32 = FEE_RATIO_DENOMINATOR / 2;

impl LicenseSchedule {
    /// Builds a schedule from tiers, sorted by descending `min_licenses`.
    /// Fractions above [`MAX_SERVICE_FRACTION`] are clamped.
    #[must_use]
    pub fn new(mut tiers: Vec<LicenseTier>) -> Self {
        for tier in &mut tiers {
            tier.fraction = tier.fraction.min(MAX_SERVICE_FRACTION);
        }
        tiers.sort_by(|a, b| b.min_licenses.cmp(&a.min_licenses));
        Self { tiers }
    }

    /// The service fee ratio owed by a curator holding `licenses` licenses,
    /// given their performance fee ratio. Zero when no tier matches.
    #[must_use]
    pub fn service_fee_ratio(&self, licenses: u32, performance_fee_ratio: u32) -> u32 {
        let fraction = self
            .tiers
            .iter()
            .find(|tier| licenses >= tier.min_licenses)
            .map(|tier| tier.fraction)
            .unwrap_or(0);
        ((performance_fee_ratio as u64 * fraction as u64) / FEE_RATIO_DENOMINATOR as u64) as u32
    }
}

impl Default for LicenseSchedule {
    fn default() -> Self {
        Self::new(vec![
            LicenseTier {
                min_licenses: 10,
                fraction: 1_000, // 10% of the performance ratio
            },
            LicenseTier {
                min_licenses: 5,
                fraction: 1_500,
            },
            LicenseTier {
                min_licenses: 1,
                fraction: 2_000,
            },
        ])
    }
}
