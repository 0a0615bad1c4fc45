//! Fully-wired core for the integration suite.

use std::sync::{Arc, Once};

use primitive_types::U256;
use serde_json::json;
use uuid::Uuid;

use custody_audit::AuditService;
use custody_chain::MockChain;
use custody_mpc::permit::PermitService;
use custody_mpc::{DkgCompletion, MpcCoordinator, MpcSettings, SimulatedSignerNode};
use custody_orchestrator::{CreateTxRequest, DepositAdmin, Orchestrator, WalletRegistry};
use custody_policy::{AddressBookService, GroupService, PolicyEngine, PolicySetService};
use custody_screener::{HashRiskOracle, ScreenerConfig, ScreeningService};
use custody_store::{DepositStore, MemoryStore};
use shared_types::{
    AddressKind, AuditEventType, CoreConfig, Deposit, EthAddress, RuleDecision, TxRequest,
    Wallet, WalletType,
};

/// Well-known development key; its address anchors the LOCAL_KEY wallet.
pub const DEV_SIGNER_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DEV_SIGNER_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

pub const PERMIT_KEY: &str = "integration-permit-key-0123456789abcdef";

pub const MILLI_ETH: u64 = 1_000_000_000_000_000;
pub const ONE_ETH: u128 = 1_000_000_000_000_000_000;

static TRACING: Once = Once::new();

/// Install a test subscriber once per process (respects `RUST_LOG`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub type TestOrchestrator =
    Orchestrator<MemoryStore, MockChain, HashRiskOracle, SimulatedSignerNode>;

/// One assembled core plus the seeded retail fixtures.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub audit: Arc<AuditService<MemoryStore>>,
    pub chain: Arc<MockChain>,
    pub node: Arc<SimulatedSignerNode>,
    pub permits: Arc<PermitService<MemoryStore>>,
    pub coordinator: Arc<MpcCoordinator<MemoryStore, SimulatedSignerNode>>,
    pub orchestrator: Arc<TestOrchestrator>,
    pub wallets: WalletRegistry<MemoryStore>,
    pub deposits: DepositAdmin<MemoryStore>,
    pub config: CoreConfig,

    pub alice: Uuid,
    pub bob: Uuid,
    pub admin: Uuid,
    pub retail_group: Uuid,
    pub allowlisted: EthAddress,
    pub denylisted: EthAddress,
}

impl Harness {
    /// Build the core and seed the retail group:
    ///
    /// | rule | priority | conditions | decision | controls |
    /// |------|----------|------------|----------|----------|
    /// | RET-03 | 1 | denylist | BLOCK | - |
    /// | RET-01 | 10 | ≤ 0.001 ETH, allowlist | ALLOW | none |
    /// | RET-02 | 20 | > 0.001 ETH, allowlist | ALLOW | KYT + 1 approval |
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build with configuration tweaks applied before any service wiring
    /// (local screening lists, retry budgets, ...).
    pub async fn with_config(tweak: impl FnOnce(&mut CoreConfig)) -> Self {
        init_tracing();

        let mut config = CoreConfig::default();
        config.permit_signing_key = PERMIT_KEY.to_string();
        config.local_signer_private_key = Some(DEV_SIGNER_KEY.to_string());
        config.chain_id = 31_337;
        config.confirmation_blocks = 3;
        config.broadcast_max_attempts = 3;
        config.screener_remote_enabled = false;
        tweak(&mut config);
        config.validate().expect("harness config must be valid");

        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditService::new(store.clone()));
        let chain = Arc::new(MockChain::new());
        let node = Arc::new(SimulatedSignerNode::new(PERMIT_KEY.as_bytes()));
        let oracle = Arc::new(HashRiskOracle::new());

        let permits = Arc::new(PermitService::new(
            store.clone(),
            audit.clone(),
            config.permit_signing_key.as_bytes(),
            config.permit_ttl_seconds,
        ));
        let coordinator = Arc::new(MpcCoordinator::new(
            store.clone(),
            audit.clone(),
            permits.clone(),
            node.clone(),
            MpcSettings::from_core(&config),
        ));
        let screening = Arc::new(ScreeningService::new(
            store.clone(),
            audit.clone(),
            oracle,
            ScreenerConfig::from_core(&config),
        ));
        let engine = PolicyEngine::new(store.clone(), audit.clone());
        let orchestrator = Arc::new(
            Orchestrator::new(
                store.clone(),
                audit.clone(),
                engine,
                screening,
                chain.clone(),
                permits.clone(),
                coordinator.clone(),
                config.clone(),
            )
            .expect("orchestrator wiring"),
        );

        let wallets = WalletRegistry::new(store.clone(), audit.clone());
        let deposits = DepositAdmin::new(store.clone(), audit.clone());

        // Seed users, group, address book, and the retail policy.
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let admin = Uuid::new_v4();

        let groups = GroupService::new(store.clone());
        let address_book = AddressBookService::new(store.clone(), audit.clone());
        let policies = PolicySetService::new(store.clone(), audit.clone());

        let retail = groups.create_group("Retail", true).await.unwrap();
        groups.add_member(retail.id, alice).await.unwrap();
        groups.add_member(retail.id, bob).await.unwrap();

        let allowlisted =
            EthAddress::parse("0xbb00000000000000000000000000000000000001").unwrap();
        let denylisted =
            EthAddress::parse("0xdead00000000000000000000000000000000dead").unwrap();
        address_book
            .add_address(retail.id, allowlisted.clone(), AddressKind::Allow, Some("exchange hot wallet"), Some(admin), "seed")
            .await
            .unwrap();
        address_book
            .add_address(retail.id, denylisted.clone(), AddressKind::Deny, Some("sanctioned"), Some(admin), "seed")
            .await
            .unwrap();

        let set = policies
            .create_policy_set("Retail Policy", Some("tiered retail controls"), Some(admin), "seed")
            .await
            .unwrap();
        policies
            .add_rule(set.id, "RET-03", &json!({"address_in": "denylist"}), RuleDecision::Block, 1, false, false, 0, Some("Denylisted recipient"), Some(admin), "seed")
            .await
            .unwrap();
        policies
            .add_rule(set.id, "RET-01", &json!({"amount_lte": "0.001", "address_in": "allowlist"}), RuleDecision::Allow, 10, false, false, 0, Some("Micropayment fast path"), Some(admin), "seed")
            .await
            .unwrap();
        policies
            .add_rule(set.id, "RET-02", &json!({"amount_gt": "0.001", "address_in": "allowlist"}), RuleDecision::Allow, 20, true, true, 1, Some("Large transfer"), Some(admin), "seed")
            .await
            .unwrap();
        policies
            .assign_to_group(retail.id, set.id, Some(admin), "seed")
            .await
            .unwrap();

        Self {
            store,
            audit,
            chain,
            node,
            permits,
            coordinator,
            orchestrator,
            wallets,
            deposits,
            config,
            alice,
            bob,
            admin,
            retail_group: retail.id,
            allowlisted,
            denylisted,
        }
    }

    /// A LOCAL_KEY wallet bound to the dev signer.
    pub async fn local_wallet(&self) -> Wallet {
        self.wallets
            .create_local_wallet(
                WalletType::Ops,
                EthAddress::parse(DEV_SIGNER_ADDRESS).unwrap(),
                Some(self.admin),
                "seed",
            )
            .await
            .unwrap()
    }

    /// An activated MPC wallet: create, run DKG against the simulated
    /// node, finalize.
    pub async fn mpc_wallet(&self) -> (Wallet, DkgCompletion) {
        let wallet = self
            .wallets
            .create_mpc_wallet(WalletType::Retail, 2, 3, Some(self.admin), "seed")
            .await
            .unwrap();

        let started = self
            .coordinator
            .start_dkg(wallet.id, 2, 3, Some(self.admin), "seed")
            .await
            .unwrap();
        let mut completion = None;
        for round in 1..=3 {
            let result = self
                .coordinator
                .dkg_round(started.session_id, round, Vec::new(), "seed")
                .await
                .unwrap();
            if result.is_final {
                completion = result.completion;
            }
        }
        let completion = completion.expect("dkg finalizes in three rounds");
        let wallet = self
            .wallets
            .finalize_keygen(wallet.id, &completion)
            .await
            .unwrap();
        (wallet, completion)
    }

    /// Credit a deposit so the wallet has withdrawable balance.
    pub async fn fund_wallet(&self, wallet_id: Uuid, amount_wei: U256) {
        let deposit = Deposit::detected(
            wallet_id,
            format!("0xfund{}", Uuid::new_v4().simple()),
            EthAddress::parse("0xaa00000000000000000000000000000000000011").unwrap(),
            amount_wei,
            self.chain.head().await,
        );
        let deposit_id = deposit.id;
        assert!(self.store.insert_deposit_if_new(deposit).await.unwrap());
        self.deposits
            .credit(deposit_id, self.admin, "seed")
            .await
            .unwrap();
    }

    /// Submit a transfer as `creator`.
    pub async fn submit(
        &self,
        wallet_id: Uuid,
        creator: Uuid,
        to: &EthAddress,
        amount_wei: U256,
        idempotency_key: Option<&str>,
    ) -> shared_types::CoreResult<TxRequest> {
        self.orchestrator
            .create(
                CreateTxRequest {
                    wallet_id,
                    to_address: to.clone(),
                    asset: "ETH".to_string(),
                    amount_wei,
                    data: None,
                },
                creator,
                &format!("test-{}", Uuid::new_v4()),
                idempotency_key.map(str::to_string),
            )
            .await
    }

    /// Drive an MPC request from SIGN_PENDING through rounds and finalize.
    pub async fn complete_mpc_signing(&self, tx_id: Uuid, user: Uuid) -> TxRequest {
        let tx = self.store_tx(tx_id).await;
        let fields = custody_chain::build_tx_fields(
            &tx.to_address,
            &tx.asset,
            tx.amount_wei,
            tx.data.as_deref(),
            tx.nonce.unwrap(),
            tx.gas_price.unwrap(),
            tx.gas_limit.unwrap(),
            self.config.chain_id,
        )
        .unwrap();
        let digest = shared_crypto::signing_digest(&fields);

        let started = self
            .orchestrator
            .begin_mpc_signing(tx_id, digest, user, "mpc-sign")
            .await
            .unwrap();

        let mut signature = None;
        for round in 1..=2 {
            let result = self
                .coordinator
                .signing_round(started.session_id, round, Vec::new(), "mpc-sign")
                .await
                .unwrap();
            if result.is_final {
                signature = result.signature;
            }
        }
        self.orchestrator
            .mpc_finalize(tx_id, signature.expect("signature"), "mpc-sign")
            .await
            .unwrap()
    }

    /// Advance the chain past the confirmation threshold and re-check.
    pub async fn confirm_to_finality(&self, tx_id: Uuid) -> TxRequest {
        self.chain.advance_blocks(self.config.confirmation_blocks).await;
        self.orchestrator
            .check_confirmation(tx_id, "confirm")
            .await
            .unwrap()
    }

    pub async fn store_tx(&self, tx_id: Uuid) -> TxRequest {
        self.orchestrator.tx_request(tx_id).await.unwrap().unwrap()
    }

    /// The `old -> new` pairs of every status change of a request, in
    /// audit order.
    pub async fn trajectory(&self, tx_id: Uuid) -> Vec<(String, String)> {
        self.audit
            .events_for_entity("TX_REQUEST", &tx_id.to_string())
            .await
            .unwrap()
            .iter()
            .filter(|e| e.event_type == AuditEventType::TxStatusChanged)
            .filter_map(|e| {
                let payload = e.payload.as_ref()?;
                Some((
                    payload.get("old_status")?.as_str()?.to_string(),
                    payload.get("new_status")?.as_str()?.to_string(),
                ))
            })
            .collect()
    }
}
