use std::{cell::RefCell, collections::HashMap, time::Duration};

use ethers::{
    types::{transaction::eip2718::TypedTransaction, NameOrAddress},
    utils::rlp::Rlp,
};
use libexo_core::{
    blockchain::{
        client::ChainClient,
        transaction::{CallRequest, Receipt},
    },
    error::ExoError,
    types::{
        keccak256, Address, BlockNumber, Bytes, ChainId, TxHash, GWEI, U256,
    },
};
use libexo_utils::log::{debug, trace};

use crate::{
    exec::{Exec, Revert},
    gateway::GatewayState,
    helper::HELPER_CODE,
    vault::VaultState,
    world::{Contract, GuardMode, World},
};

pub const TX_BASE_GAS: u64 = 21_000;
pub const CREATE_BASE_GAS: u64 = 53_000;
pub const CREATE_CODE_GAS: u64 = 200_000;
pub const CALLDATA_BYTE_GAS: u64 = 16;
pub const FRAME_GAS: u64 = 25_000;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const BLOCK_TIME_SECS: u64 = 12;

/// Deployer of the challenge contracts.
const SYSTEM_DEPLOYER: Address = Address::new([0xde; 20]);

/// A decoded and sender-recovered transaction.
#[derive(Debug, Clone)]
struct IncomingTx {
    hash: TxHash,
    from: Address,
    to: Option<Address>,
    nonce: u64,
    gas_limit: u64,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    chain_id: ChainId,
    value: U256,
    input: Bytes,
}

#[derive(Debug, Clone)]
struct PooledTx {
    tx: IncomingTx,
    /// Receipt waits this transaction still sits out before it is mined.
    polls_left: u32,
}

#[derive(Debug)]
struct Inner {
    world: World,
    chain_id: ChainId,
    base_fee: u128,
    block_number: BlockNumber,
    pool: Vec<PooledTx>,
    receipts: HashMap<TxHash, Receipt>,
    submissions: Vec<TxHash>,
    hold_next: Option<u32>,
    drop_next: bool,
}

/// [`ChainClient`] over an in-memory chain.
///
/// Submitted transactions are mined immediately, one per block, unless a
/// hold or drop has been armed for the next submission.
#[derive(Debug)]
pub struct MemoryChain {
    inner: RefCell<Inner>,
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new(31337)
    }
}

impl MemoryChain {
    pub fn new(chain_id: ChainId) -> Self {
        let world = World {
            timestamp: GENESIS_TIMESTAMP,
            ..Default::default()
        };
        Self {
            inner: RefCell::new(Inner {
                world,
                chain_id,
                base_fee: GWEI,
                block_number: 0,
                pool: Vec::new(),
                receipts: HashMap::new(),
                submissions: Vec::new(),
                hold_next: None,
                drop_next: false,
            }),
        }
    }

    /// Init code prefix the chain recognizes as the helper contract.
    pub fn helper_bytecode() -> Bytes {
        Bytes::from_static(HELPER_CODE)
    }

    pub fn fund(&self, who: Address, amount: U256) {
        self.inner.borrow_mut().world.credit(who, amount);
    }

    pub fn set_base_fee(&self, base_fee: u128) {
        self.inner.borrow_mut().base_fee = base_fee;
    }

    pub fn deploy_gateway(&self, owner: Address, mode: GuardMode) -> Address {
        let mut inner = self.inner.borrow_mut();
        let address = inner.next_system_address();
        let seed = keccak256(address.as_slice());
        inner.world.contracts.insert(
            address,
            Contract::Gateway(GatewayState::new(owner, mode, seed)),
        );
        address
    }

    pub fn deploy_vault(&self, initial_balance: U256, mode: GuardMode) -> Address {
        let mut inner = self.inner.borrow_mut();
        let address = inner.next_system_address();
        inner.world.contracts.insert(
            address,
            Contract::Vault(VaultState::new(initial_balance, mode)),
        );
        inner.world.credit(address, initial_balance);
        address
    }

    /// Make every `withdraw` on `vault` revert.
    pub fn freeze_withdrawals(&self, vault: Address, frozen: bool) {
        if let Some(v) = self.inner.borrow_mut().world.vault_mut(vault) {
            v.withdrawals_frozen = frozen;
        }
    }

    /// Let `emergencyOverride` on `gateway` pass its checks and change
    /// nothing.
    pub fn ignore_overrides(&self, gateway: Address, ignored: bool) {
        if let Some(g) = self.inner.borrow_mut().world.gateway_mut(gateway) {
            g.overrides_ignored = ignored;
        }
    }

    /// Make the `deposits(address)` view of `vault` revert.
    pub fn break_deposits_view(&self, vault: Address, broken: bool) {
        if let Some(v) = self.inner.borrow_mut().world.vault_mut(vault) {
            v.deposits_view_broken = broken;
        }
    }

    /// Keep the next accepted transaction pending for `polls` receipt waits.
    /// It is mined when the last of those waits times out.
    pub fn hold_next_submission(&self, polls: u32) {
        self.inner.borrow_mut().hold_next = Some(polls);
    }

    /// Accept the next transaction, then forget it as if evicted from the
    /// mempool.
    pub fn drop_next_submission(&self) {
        self.inner.borrow_mut().drop_next = true;
    }

    pub fn mine_pending(&self) {
        let mut inner = self.inner.borrow_mut();
        for p in inner.pool.iter_mut() {
            p.polls_left = 0;
        }
        inner.mine_ready();
    }

    /// Hashes of every accepted submission, in order.
    pub fn submissions(&self) -> Vec<TxHash> {
        self.inner.borrow().submissions.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.borrow().pool.len()
    }

    pub fn block_number(&self) -> BlockNumber {
        self.inner.borrow().block_number
    }

    /// Read access to the full state, for assertions.
    pub fn inspect<R>(&self, f: impl FnOnce(&World) -> R) -> R {
        f(&self.inner.borrow().world)
    }
}

impl Inner {
    fn next_system_address(&mut self) -> Address {
        let nonce = self.world.nonce(SYSTEM_DEPLOYER);
        self.world.bump_nonce(SYSTEM_DEPLOYER);
        SYSTEM_DEPLOYER.create(nonce)
    }

    fn pending_of(&self, sender: Address) -> u64 {
        self.pool.iter().filter(|p| p.tx.from == sender).count() as u64
    }

    fn effective_gas_price(&self, tx: &IncomingTx) -> u128 {
        tx.max_fee_per_gas
            .min(self.base_fee.saturating_add(tx.max_priority_fee_per_gas))
    }

    fn validate(&self, tx: &IncomingTx) -> Result<(), ExoError> {
        if tx.chain_id != self.chain_id {
            return Err(ExoError::Rpc(format!(
                "invalid chain id {}, expected {}",
                tx.chain_id, self.chain_id
            )));
        }
        if self.receipts.contains_key(&tx.hash)
            || self.pool.iter().any(|p| p.tx.hash == tx.hash)
        {
            return Err(ExoError::Rpc("already known".to_string()));
        }
        let confirmed = self.world.nonce(tx.from);
        let next = confirmed + self.pending_of(tx.from);
        if tx.nonce < confirmed {
            return Err(ExoError::Rpc(format!(
                "nonce too low: next nonce {}, tx nonce {}",
                confirmed, tx.nonce
            )));
        }
        if tx.nonce < next {
            return Err(ExoError::Rpc(
                "replacement transaction underpriced".to_string(),
            ));
        }
        if tx.nonce > next {
            return Err(ExoError::Rpc(format!(
                "nonce too high: next nonce {}, tx nonce {}",
                next, tx.nonce
            )));
        }
        if tx.max_fee_per_gas < self.base_fee {
            return Err(ExoError::Rpc(format!(
                "max fee per gas less than block base fee: {} < {}",
                tx.max_fee_per_gas, self.base_fee
            )));
        }
        let upfront = U256::from(tx.gas_limit)
            .saturating_mul(U256::from(tx.max_fee_per_gas))
            .saturating_add(tx.value);
        if self.world.balance(tx.from) < upfront {
            return Err(ExoError::Rpc(
                "insufficient funds for gas * price + value".to_string(),
            ));
        }
        Ok(())
    }

    /// Execute on `world` without charging anything. Returns the created
    /// address, if any, and the gas the execution costs.
    fn execute(
        world: &mut World,
        from: Address,
        to: Option<Address>,
        nonce: u64,
        value: U256,
        input: &Bytes,
    ) -> (Result<Option<Address>, Revert>, u64) {
        let mut exec = Exec::new(world, from);
        let (res, base) = match to {
            Some(to) => (
                exec.call(from, to, value, input.clone()).map(|_| None),
                TX_BASE_GAS,
            ),
            None => (
                exec.create(from, nonce, value, input).map(Some),
                CREATE_BASE_GAS + CREATE_CODE_GAS,
            ),
        };
        let gas = base
            + CALLDATA_BYTE_GAS * input.len() as u64
            + FRAME_GAS * exec.frames();
        (res, gas)
    }

    fn mine(&mut self, tx: IncomingTx) -> Receipt {
        self.block_number += 1;
        self.world.timestamp += BLOCK_TIME_SECS;

        let mut world = self.world.clone();
        let (res, gas) =
            Self::execute(&mut world, tx.from, tx.to, tx.nonce, tx.value, &tx.input);
        let (success, contract_address, gas_used) = match res {
            Ok(_) if gas > tx.gas_limit => {
                debug!(tx = %tx.hash, gas, limit = tx.gas_limit, "out of gas");
                (false, None, tx.gas_limit)
            }
            Ok(created) => {
                self.world = world;
                (true, created, gas)
            }
            Err(reason) => {
                debug!(tx = %tx.hash, %reason, "transaction reverted");
                (false, None, gas.min(tx.gas_limit))
            }
        };
        let fee = U256::from(gas_used)
            .saturating_mul(U256::from(self.effective_gas_price(&tx)));
        let payable = fee.min(self.world.balance(tx.from));
        self.world.debit(tx.from, payable);
        self.world.bump_nonce(tx.from);

        let receipt = Receipt {
            tx_hash: tx.hash,
            success,
            contract_address,
            block_number: Some(self.block_number),
            gas_used,
        };
        trace!(?receipt, "mined");
        self.receipts.insert(tx.hash, receipt.clone());
        receipt
    }

    /// Mine pool transactions whose hold has expired, in nonce order and
    /// without gaps.
    fn mine_ready(&mut self) {
        loop {
            let ready = self.pool.iter().position(|p| {
                p.polls_left == 0 && p.tx.nonce == self.world.nonce(p.tx.from)
            });
            let Some(idx) = ready else {
                break;
            };
            let pooled = self.pool.remove(idx);
            self.mine(pooled.tx);
        }
    }
}

fn decode_raw(raw: &Bytes) -> Result<IncomingTx, ExoError> {
    let (typed, sig) = TypedTransaction::decode_signed(&Rlp::new(raw))
        .map_err(|e| ExoError::Rpc(format!("malformed transaction: {}", e)))?;
    let TypedTransaction::Eip1559(req) = &typed else {
        return Err(ExoError::Rpc("unsupported transaction type".to_string()));
    };
    let from = sig
        .recover(typed.sighash())
        .map_err(|e| ExoError::Rpc(format!("invalid signature: {}", e)))?;
    let to = match &req.to {
        Some(NameOrAddress::Address(a)) => Some(Address::from_slice(a.as_bytes())),
        Some(NameOrAddress::Name(n)) => {
            return Err(ExoError::Rpc(format!("unresolved recipient {}", n)))
        }
        None => None,
    };
    let mut value = [0u8; 32];
    req.value.unwrap_or_default().to_big_endian(&mut value);
    Ok(IncomingTx {
        hash: keccak256(raw),
        from: Address::from_slice(from.as_bytes()),
        to,
        nonce: req.nonce.unwrap_or_default().as_u64(),
        gas_limit: req.gas.unwrap_or_default().as_u64(),
        max_fee_per_gas: req.max_fee_per_gas.unwrap_or_default().as_u128(),
        max_priority_fee_per_gas: req
            .max_priority_fee_per_gas
            .unwrap_or_default()
            .as_u128(),
        chain_id: req.chain_id.unwrap_or_default().as_u64(),
        value: U256::from_be_bytes(value),
        input: Bytes::from(req.data.clone().unwrap_or_default().to_vec()),
    })
}

impl ChainClient for MemoryChain {
    fn chain_id(&self) -> Result<u64, ExoError> {
        Ok(self.inner.borrow().chain_id)
    }

    fn base_fee(&self) -> Result<u128, ExoError> {
        Ok(self.inner.borrow().base_fee)
    }

    fn balance(&self, address: Address) -> Result<U256, ExoError> {
        Ok(self.inner.borrow().world.balance(address))
    }

    fn nonce(&self, address: Address) -> Result<u64, ExoError> {
        Ok(self.inner.borrow().world.nonce(address))
    }

    fn pending_nonce(&self, address: Address) -> Result<u64, ExoError> {
        let inner = self.inner.borrow();
        Ok(inner.world.nonce(address) + inner.pending_of(address))
    }

    fn estimate_gas(
        &self,
        from: Address,
        request: &CallRequest,
    ) -> Result<u64, ExoError> {
        let inner = self.inner.borrow();
        let mut world = inner.world.clone();
        let nonce = world.nonce(from);
        let (res, gas) = Inner::execute(
            &mut world,
            from,
            request.to,
            nonce,
            request.value,
            &request.data,
        );
        res.map(|_| gas).map_err(|r| {
            ExoError::Estimation(format!("execution reverted: {}", r))
        })
    }

    fn call(
        &self,
        from: Option<Address>,
        to: Address,
        data: Bytes,
    ) -> Result<Bytes, ExoError> {
        let mut world = self.inner.borrow().world.clone();
        let caller = from.unwrap_or_default();
        Exec::new(&mut world, caller)
            .call(caller, to, U256::ZERO, data)
            .map_err(|r| ExoError::Call(format!("execution reverted: {}", r)))
    }

    fn submit(&self, raw: Bytes) -> Result<TxHash, ExoError> {
        let tx = decode_raw(&raw)?;
        let mut inner = self.inner.borrow_mut();
        inner.validate(&tx)?;
        let hash = tx.hash;
        inner.submissions.push(hash);
        debug!(tx = %hash, nonce = tx.nonce, "transaction accepted");

        if std::mem::take(&mut inner.drop_next) {
            debug!(tx = %hash, "transaction dropped from pool");
            return Ok(hash);
        }
        let polls_left = inner.hold_next.take().unwrap_or(0);
        inner.pool.push(PooledTx { tx, polls_left });
        inner.mine_ready();
        Ok(hash)
    }

    fn receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ExoError> {
        Ok(self.inner.borrow().receipts.get(&hash).cloned())
    }

    fn is_known(&self, hash: TxHash) -> Result<bool, ExoError> {
        let inner = self.inner.borrow();
        Ok(inner.receipts.contains_key(&hash)
            || inner.pool.iter().any(|p| p.tx.hash == hash))
    }

    fn wait_for_receipt(
        &self,
        hash: TxHash,
        timeout: Duration,
    ) -> Result<Receipt, ExoError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(r) = inner.receipts.get(&hash) {
            return Ok(r.clone());
        }
        // the wait elapses; a held transaction may land right after
        if let Some(p) = inner.pool.iter_mut().find(|p| p.tx.hash == hash) {
            p.polls_left = p.polls_left.saturating_sub(1);
        }
        inner.mine_ready();
        Err(ExoError::Timeout {
            hash,
            waited: timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use libexo_core::{
        blockchain::{client::ChainClient, transaction::CallRequest},
        error::ExoError,
        types::{Address, Bytes, ETHER, U256},
    };
    use libexo_periphery::{
        gateway::GatewayProxy, helper::HelperProxy, vault::VaultProxy,
    };
    use libexo_wallet::{
        account::Account, builder::TransactionBuilder, fee::FeePolicy,
    };

    use super::MemoryChain;
    use crate::world::GuardMode;

    const KEY: &str =
        "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const WAIT: Duration = Duration::from_secs(1);

    fn setup() -> (MemoryChain, Address) {
        let chain = MemoryChain::default();
        let operator = Account::from_secret(KEY).unwrap().address();
        chain.fund(operator, U256::from(10 * ETHER));
        (chain, operator)
    }

    fn builder(chain: &MemoryChain) -> TransactionBuilder<&MemoryChain> {
        TransactionBuilder::new(
            chain,
            Account::from_secret(KEY).unwrap(),
            FeePolicy::default(),
        )
        .unwrap()
    }

    fn transfer() -> CallRequest {
        CallRequest::call(Address::repeat_byte(0x42), Bytes::new())
            .with_value(U256::from(1_000u64))
    }

    #[test]
    fn test_transfer_is_mined_and_charged() {
        let (chain, operator) = setup();
        let b = builder(&chain);
        let signed = b.send(&transfer()).unwrap();
        let receipt = chain.wait_for_receipt(signed.hash, WAIT).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.gas_used, 21_000 + 25_000);
        assert_eq!(chain.nonce(operator).unwrap(), 1);
        let spent = U256::from(10 * ETHER) - chain.balance(operator).unwrap();
        assert!(spent > U256::from(1_000u64));
        assert_eq!(
            chain.balance(Address::repeat_byte(0x42)).unwrap(),
            U256::from(1_000u64)
        );
    }

    #[test]
    fn test_confirmed_nonce_cannot_be_reused() {
        let (chain, _) = setup();
        let b = builder(&chain);
        let first = b.build(&transfer()).unwrap();
        b.submit(&first).unwrap();

        let replay = b.submit(&first);
        assert!(matches!(replay, Err(ExoError::Rpc(m)) if m == "already known"));

        let mut stale = first.tx.clone();
        stale.value = U256::from(1u64);
        let stale = b.account().sign(&stale).unwrap();
        let err = chain.submit(stale.raw).unwrap_err();
        assert!(err.to_string().contains("nonce too low"));
    }

    #[test]
    fn test_wrong_chain_id_rejected() {
        let (chain, _) = setup();
        let b = TransactionBuilder::with_chain_id(
            &chain,
            Account::from_secret(KEY).unwrap(),
            1,
            FeePolicy::default(),
        );
        assert!(matches!(b.send(&transfer()), Err(ExoError::Rpc(_))));
    }

    #[test]
    fn test_held_transaction_lands_after_timeout() {
        let (chain, operator) = setup();
        chain.hold_next_submission(1);
        let signed = builder(&chain).send(&transfer()).unwrap();
        assert_eq!(chain.pending_count(), 1);
        assert!(chain.is_known(signed.hash).unwrap());
        assert_eq!(chain.nonce(operator).unwrap(), 0);

        let err = chain.wait_for_receipt(signed.hash, WAIT).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(chain.nonce(operator).unwrap(), 1);
        assert!(chain.receipt(signed.hash).unwrap().is_some());
    }

    #[test]
    fn test_dropped_transaction_is_forgotten() {
        let (chain, operator) = setup();
        chain.drop_next_submission();
        let signed = builder(&chain).send(&transfer()).unwrap();
        assert!(chain.wait_for_receipt(signed.hash, WAIT).is_err());
        assert!(!chain.is_known(signed.hash).unwrap());
        assert_eq!(chain.nonce(operator).unwrap(), 0);
        assert_eq!(chain.submissions().len(), 1);
    }

    #[test]
    fn test_over_cap_deposit_fails_estimation() {
        let (chain, _) = setup();
        let vault = chain.deploy_vault(U256::from(ETHER), GuardMode::Vulnerable);
        let b = builder(&chain);
        let over = VaultProxy::new(vault)
            .deposit(U256::from(ETHER / 10 + 1))
            .unwrap();
        let err = b.send(&over).unwrap_err();
        assert!(matches!(&err, ExoError::Estimation(m) if m.contains("Exceeds individual cap")));
        assert!(chain.submissions().is_empty());
    }

    #[test]
    fn test_helper_deployment_address() {
        let (chain, operator) = setup();
        let vault = chain.deploy_vault(U256::from(ETHER), GuardMode::Vulnerable);
        let req = HelperProxy::deploy(
            &MemoryChain::helper_bytecode(),
            vault,
            U256::from(ETHER / 5),
        )
        .unwrap();
        let signed = builder(&chain).send(&req).unwrap();
        let receipt = chain.wait_for_receipt(signed.hash, WAIT).unwrap();
        let expected = operator.create(0);
        assert_eq!(receipt.contract_address, Some(expected));
        assert_eq!(chain.balance(expected).unwrap(), U256::from(ETHER / 5));
        let helper = HelperProxy::at(expected);
        assert_eq!(helper.owner(&chain).unwrap(), operator);
        assert_eq!(helper.vault(&chain).unwrap(), vault);
    }

    #[test]
    fn test_read_revert_is_call_error() {
        let (chain, _) = setup();
        let vault = chain.deploy_vault(U256::from(ETHER), GuardMode::Vulnerable);
        chain.break_deposits_view(vault, true);
        let err = VaultProxy::new(vault)
            .deposits(&chain, Address::ZERO)
            .unwrap_err();
        assert!(matches!(err, ExoError::Call(_)));
    }

    #[test]
    fn test_pending_nonce_blocks_next_build() {
        let (chain, operator) = setup();
        let gateway = chain.deploy_gateway(Address::repeat_byte(0x0a), GuardMode::Vulnerable);
        chain.hold_next_submission(10);
        let b = builder(&chain);
        let request = GatewayProxy::new(gateway).request_authorization().unwrap();
        let first = b.send(&request).unwrap();
        assert_eq!(first.nonce(), 0);
        assert_eq!(chain.nonce(operator).unwrap(), 0);
        assert_eq!(chain.pending_nonce(operator).unwrap(), 1);

        let err = b.build(&transfer()).unwrap_err();
        assert!(matches!(&err, ExoError::Custom(m) if m.contains("pending")));
        assert_eq!(chain.submissions(), vec![first.hash]);

        chain.mine_pending();
        assert_eq!(chain.pending_nonce(operator).unwrap(), 1);
        let next = b.build(&transfer()).unwrap();
        assert_eq!(next.nonce(), 1);
    }
}
