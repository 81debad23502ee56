//! Wallet read-model.
//!
//! Derived, never stored: a fold over the accepted transactions of the
//! active chain.

use serde::{Deserialize, Serialize};

use crate::chain::LedgerState;
use crate::types::{Address, Amount};

/// Point-in-time view of an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletView {
    pub address: Address,
    pub liquid_balance: Amount,
    pub staked_balance: Amount,
    pub is_validator: bool,
}

impl WalletView {
    /// Derive the view for `address` at the given chain height.
    pub fn derive(state: &LedgerState, address: &str, height: u64) -> Self {
        let account = state.balance(address);
        Self {
            address: address.to_string(),
            liquid_balance: account.liquid,
            staked_balance: account.staked,
            is_validator: state.authorities.at(height).contains(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::build_genesis;
    use crate::chain::Chain;
    use crate::types::{GENESIS_SUPPLY, TREASURY_ADDRESS};
    use lib_crypto::NodeKeypair;

    #[test]
    fn test_treasury_view_after_genesis() {
        let kp = NodeKeypair::generate().unwrap();
        let chain = Chain::new(build_genesis(&kp.node_id()), 10, 256).unwrap();
        let view = WalletView::derive(chain.state(), TREASURY_ADDRESS, chain.height());
        assert_eq!(view.liquid_balance, GENESIS_SUPPLY);
        assert_eq!(view.staked_balance, 0);
        assert!(!view.is_validator);

        let validator_view = WalletView::derive(chain.state(), &kp.node_id(), chain.height());
        assert!(validator_view.is_validator);
        assert_eq!(validator_view.liquid_balance, 0);
    }

    #[test]
    fn test_unknown_address_is_zeroed() {
        let kp = NodeKeypair::generate().unwrap();
        let chain = Chain::new(build_genesis(&kp.node_id()), 10, 256).unwrap();
        let view = WalletView::derive(chain.state(), "nobody", chain.height());
        assert_eq!(view.liquid_balance, 0);
        assert_eq!(view.staked_balance, 0);
    }
}
