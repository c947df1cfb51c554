use std::collections::HashMap;

use libexo_core::types::{Address, U256};

use crate::{gateway::GatewayState, helper::HelperState, vault::VaultState};

/// Which variant of a challenge contract to model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardMode {
    /// The contract as deployed in the challenge.
    #[default]
    Vulnerable,
    /// The same contract with the flaw fixed.
    Hardened,
}

#[derive(Debug, Clone)]
pub enum Contract {
    Gateway(GatewayState),
    Vault(VaultState),
    Helper(HelperState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContractKind {
    Gateway,
    Vault,
    Helper,
}

impl Contract {
    pub(crate) fn kind(&self) -> ContractKind {
        match self {
            Contract::Gateway(_) => ContractKind::Gateway,
            Contract::Vault(_) => ContractKind::Vault,
            Contract::Helper(_) => ContractKind::Helper,
        }
    }
}

/// Account and contract state. Cloned wholesale to give call frames revert
/// semantics.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub balances: HashMap<Address, U256>,
    pub nonces: HashMap<Address, u64>,
    pub contracts: HashMap<Address, Contract>,
    pub timestamp: u64,
}

impl World {
    pub fn balance(&self, address: Address) -> U256 {
        self.balances.get(&address).copied().unwrap_or_default()
    }

    pub fn nonce(&self, address: Address) -> u64 {
        self.nonces.get(&address).copied().unwrap_or_default()
    }

    pub fn credit(&mut self, address: Address, amount: U256) {
        let b = self.balances.entry(address).or_default();
        *b = b.saturating_add(amount);
    }

    /// `false` when `address` cannot cover `amount`; nothing is debited then.
    pub fn debit(&mut self, address: Address, amount: U256) -> bool {
        let b = self.balances.entry(address).or_default();
        match b.checked_sub(amount) {
            Some(rest) => {
                *b = rest;
                true
            }
            None => false,
        }
    }

    pub fn bump_nonce(&mut self, address: Address) {
        *self.nonces.entry(address).or_default() += 1;
    }

    pub fn gateway(&self, at: Address) -> Option<&GatewayState> {
        match self.contracts.get(&at) {
            Some(Contract::Gateway(s)) => Some(s),
            _ => None,
        }
    }

    pub fn vault(&self, at: Address) -> Option<&VaultState> {
        match self.contracts.get(&at) {
            Some(Contract::Vault(s)) => Some(s),
            _ => None,
        }
    }

    pub fn vault_mut(&mut self, at: Address) -> Option<&mut VaultState> {
        match self.contracts.get_mut(&at) {
            Some(Contract::Vault(s)) => Some(s),
            _ => None,
        }
    }

    pub fn gateway_mut(&mut self, at: Address) -> Option<&mut GatewayState> {
        match self.contracts.get_mut(&at) {
            Some(Contract::Gateway(s)) => Some(s),
            _ => None,
        }
    }

    pub fn helper(&self, at: Address) -> Option<&HelperState> {
        match self.contracts.get(&at) {
            Some(Contract::Helper(s)) => Some(s),
            _ => None,
        }
    }

    pub fn helper_mut(&mut self, at: Address) -> Option<&mut HelperState> {
        match self.contracts.get_mut(&at) {
            Some(Contract::Helper(s)) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use libexo_core::types::{Address, U256};

    use super::World;

    #[test]
    fn test_debit_never_underflows() {
        let mut w = World::default();
        let a = Address::repeat_byte(1);
        w.credit(a, U256::from(10));
        assert!(!w.debit(a, U256::from(11)));
        assert_eq!(w.balance(a), U256::from(10));
        assert!(w.debit(a, U256::from(10)));
        assert_eq!(w.balance(a), U256::ZERO);
    }
}
