use vault_domain::errors::{EngineError, EngineResult};
use vault_domain::fees::{FEE_RATIO_DENOMINATOR, LicenseSchedule};
use vault_domain::token::TokenId;

/// Static configuration of the engine.
///
/// The base asset pays operator execution fees; the bridge asset anchors
/// the canonical two-hop swap routing. Exactly one bridge asset is
/// configured network-wide, and a pool between every position token and
/// the bridge is a deployment precondition.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Token operator execution fees are paid in.
    pub base_asset: TokenId,
    /// Intermediate token for canonical swap routing.
    pub bridge_asset: TokenId,
    /// Performance fee ratio charged on profit (10_000 = 100%).
    pub performance_fee_ratio: u32,
    /// License count of the curator, input to the service-fee lookup.
    pub licenses: u32,
    /// License-tier table deriving the service fee ratio.
    pub license_schedule: LicenseSchedule,
}

impl EngineConfig {
    #[must_use]
    pub fn new(base_asset: TokenId, bridge_asset: TokenId) -> Self {
        Self {
            base_asset,
            bridge_asset,
            performance_fee_ratio: 1_000, // 10%
            licenses: 1,
            license_schedule: LicenseSchedule::default(),
        }
    }

    #[must_use]
    pub fn with_performance_fee_ratio(mut self, ratio: u32) -> Self {
        self.performance_fee_ratio = ratio;
        self
    }

    #[must_use]
    pub fn with_licenses(mut self, licenses: u32) -> Self {
        self.licenses = licenses;
        self
    }

    #[must_use]
    pub fn with_license_schedule(mut self, schedule: LicenseSchedule) -> Self {
        self.license_schedule = schedule;
        self
    }

    /// Service fee ratio for the configured license count.
    #[must_use]
    pub fn service_fee_ratio(&self) -> u32 {
        self.license_schedule
            .service_fee_ratio(self.licenses, self.performance_fee_ratio)
    }

    /// Rejects configurations with a performance ratio above 100%.
    pub fn validate(&self) -> EngineResult<()> {
        if self.performance_fee_ratio > FEE_RATIO_DENOMINATOR {
            return Err(EngineError::FeeRatioOutOfRange(self.performance_fee_ratio));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_ratio_from_licenses() {
        let config = EngineConfig::new(TokenId::new("USDC"), TokenId::new("WETH"));
        // Default: 10% performance ratio, 1 license -> 20% of it.
        assert_eq!(config.service_fee_ratio(), 200);

        let config = config.with_licenses(10);
        assert_eq!(config.service_fee_ratio(), 100);
    }

    #[test]
    fn test_validate_rejects_excessive_ratio() {
        let config = EngineConfig::new(TokenId::new("USDC"), TokenId::new("WETH"))
            .with_performance_fee_ratio(10_001);
        assert!(config.validate().is_err());
    }
}
