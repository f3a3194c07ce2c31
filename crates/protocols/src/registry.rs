use std::collections::HashSet;
use vault_domain::errors::AmmError;
use vault_domain::token::{AccountId, TokenAmount, TokenId};

use rust_decimal::Decimal;

/// Capability check for rebalance operators.
///
/// Whitelist management itself lives outside this core; the engine only
/// consumes the check.
pub trait OperatorRegistry: Send + Sync {
    fn is_authorized(&self, operator: &AccountId) -> bool;
}

/// Fixed operator set, sufficient for tests and single-tenant deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticOperatorSet {
    operators: HashSet<AccountId>,
}

impl StaticOperatorSet {
    #[must_use]
    pub fn new(operators: impl IntoIterator<Item = AccountId>) -> Self {
        Self {
            operators: operators.into_iter().collect(),
        }
    }
}

impl OperatorRegistry for StaticOperatorSet {
    fn is_authorized(&self, operator: &AccountId) -> bool {
        self.operators.contains(operator)
    }
}

/// Values token amounts in the reference unit (e.g. USD-equivalent).
pub trait ReferencePricer: Send + Sync {
    /// Reference-unit price of one raw unit of the token.
    fn reference_price(&self, token: &TokenId) -> Result<Decimal, AmmError>;

    /// Reference-unit value of an amount.
    fn reference_value(&self, token: &TokenId, amount: TokenAmount) -> Result<Decimal, AmmError> {
        let price = self.reference_price(token)?;
        let amount = amount
            .to_decimal()
            .ok_or(AmmError::Arithmetic("reference_value"))?;
        Ok(price * amount)
    }
}
