use crate::execution::ExecutionError;
use crate::models::order::OrderIntent;
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, Eip712Domain, SolStruct};
use rand::Rng;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// Type name and field order must match the exchange's on-chain type hash.
sol! {
    #[derive(Debug)]
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

/// CTF Exchange on Polygon mainnet.
const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
const DOMAIN_NAME: &str = "Polymarket CTF Exchange";
const DOMAIN_VERSION: &str = "1";

const PROXY_WALLET_FACTORY: &str = "0xaB45c5A4B0c941a2F231C04C3f49182e1A254052";
const PROXY_INIT_CODE_HASH: [u8; 32] = [
    0xd2, 0x1d, 0xf8, 0xdc, 0x65, 0x88, 0x0a, 0x86, 0x06, 0xf0, 0x9f, 0xe0, 0xce, 0x3d, 0xf9, 0xb8,
    0x86, 0x92, 0x87, 0xab, 0x0b, 0x05, 0x8b, 0xe0, 0x5a, 0xa9, 0xe8, 0xaf, 0x63, 0x30, 0xa0, 0x0b,
];

/// USDC and outcome shares both use 6 decimals on chain.
const MICRO: u64 = 1_000_000;

/// Order body as the CLOB expects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: u64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: String,
    pub signature_type: u8,
    pub signature: String,
}

/// Signs limit BUY orders against the CTF Exchange EIP-712 domain.
pub struct OrderBuilder {
    chain_id: u64,
    signer: PrivateKeySigner,
    /// Wallet holding the funds; the signer itself for EOA accounts.
    funder: Address,
    signature_type: u8,
}

/// Maker and taker amounts of a limit BUY, in micro-units: USDC paid
/// (rounded up to 4 decimals) and shares received (2 decimals).
pub fn buy_amounts(intent: &OrderIntent) -> Option<(u64, u64)> {
    let micro = Decimal::from(MICRO);
    let usdc = intent
        .notional()
        .round_dp_with_strategy(4, RoundingStrategy::AwayFromZero);
    let shares = intent.size.round_dp_with_strategy(2, RoundingStrategy::ToZero);
    Some(((usdc * micro).to_u64()?, (shares * micro).to_u64()?))
}

/// Polymarket proxy wallet owned by `owner` (CREATE2 from the factory).
pub fn proxy_wallet(owner: Address) -> Address {
    let factory = PROXY_WALLET_FACTORY.parse::<Address>().unwrap_or(Address::ZERO);
    let salt = keccak256(owner.as_slice());

    let mut input = Vec::with_capacity(85);
    input.push(0xff);
    input.extend_from_slice(factory.as_slice());
    input.extend_from_slice(salt.as_slice());
    input.extend_from_slice(B256::from(PROXY_INIT_CODE_HASH).as_slice());
    Address::from_slice(&keccak256(&input)[12..])
}

impl OrderBuilder {
    pub fn new(
        chain_id: u64,
        signer: PrivateKeySigner,
        funder_address: Option<&str>,
        signature_type: u8,
    ) -> Self {
        let eoa = signer.address();
        let explicit = funder_address.and_then(|f| f.parse::<Address>().ok());

        let funder = if signature_type == 1 {
            let derived = proxy_wallet(eoa);
            if let Some(explicit) = explicit.filter(|e| *e != derived) {
                warn!("Funder mismatch: configured={explicit:?} derived={derived:?}, using derived");
            }
            info!("Proxy wallet: {derived:?}");
            derived
        } else {
            explicit.unwrap_or(eoa)
        };

        Self {
            chain_id,
            signer,
            funder,
            signature_type,
        }
    }

    pub fn funder(&self) -> Address {
        self.funder
    }

    pub async fn build(&self, intent: &OrderIntent) -> Result<SignedOrder, ExecutionError> {
        let (maker_amount, taker_amount) = buy_amounts(intent)
            .ok_or_else(|| ExecutionError::InvalidOrder(format!("amounts overflow: {intent:?}")))?;
        let token_id = parse_token_id(&intent.token_id)?;

        // Salt must stay within the JSON-safe integer range.
        let salt: u64 = rand::thread_rng().gen::<u64>() & ((1u64 << 53) - 1);

        let order = Order {
            salt: U256::from(salt),
            maker: self.funder,
            signer: self.signer.address(),
            taker: Address::ZERO,
            tokenId: token_id,
            makerAmount: U256::from(maker_amount),
            takerAmount: U256::from(taker_amount),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            feeRateBps: U256::ZERO,
            side: 0,
            signatureType: self.signature_type,
        };

        let domain = Eip712Domain {
            name: Some(DOMAIN_NAME.into()),
            version: Some(DOMAIN_VERSION.into()),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: Some(CTF_EXCHANGE.parse::<Address>().unwrap_or(Address::ZERO)),
            salt: None,
        };

        let digest = order.eip712_signing_hash(&domain);
        let signature = self.signer.sign_hash(&digest).await?;

        debug!(
            "Signed BUY token={} maker_amt={maker_amount} taker_amt={taker_amount}",
            intent.token_id
        );

        Ok(SignedOrder {
            salt,
            maker: format!("{:?}", self.funder),
            signer: format!("{:?}", self.signer.address()),
            taker: format!("{:?}", Address::ZERO),
            token_id: intent.token_id.clone(),
            maker_amount: maker_amount.to_string(),
            taker_amount: taker_amount.to_string(),
            expiration: "0".into(),
            nonce: "0".into(),
            fee_rate_bps: "0".into(),
            side: "BUY".into(),
            signature_type: self.signature_type,
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        })
    }
}

/// Token ids are decimal strings; `0x` ids are accepted as hex.
fn parse_token_id(raw: &str) -> Result<U256, ExecutionError> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(raw, 10),
    };
    parsed.map_err(|_| ExecutionError::InvalidOrder(format!("bad token id: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Side;

    #[test]
    fn test_buy_amounts_in_micro_units() {
        let intent = OrderIntent::maker_buy("1", Side::Up, 0.70, 10.0).unwrap();
        // 14.28 shares at 0.70 = 9.996 USDC
        assert_eq!(buy_amounts(&intent), Some((9_996_000, 14_280_000)));
    }

    #[test]
    fn test_token_id_parsing() {
        assert_eq!(parse_token_id("255").unwrap(), U256::from(255));
        assert_eq!(parse_token_id("0xff").unwrap(), U256::from(255));
        assert!(parse_token_id("up-token").is_err());
    }

    #[test]
    fn test_eoa_funds_itself() {
        let signer = PrivateKeySigner::random();
        let eoa = signer.address();
        let builder = OrderBuilder::new(137, signer, None, 0);
        assert_eq!(builder.funder(), eoa);
    }

    #[test]
    fn test_proxy_wallet_is_derived() {
        let signer = PrivateKeySigner::random();
        let eoa = signer.address();
        let builder = OrderBuilder::new(137, signer, Some("0x0000000000000000000000000000000000000001"), 1);
        assert_eq!(builder.funder(), proxy_wallet(eoa));
        assert_ne!(builder.funder(), eoa);
    }

    #[tokio::test]
    async fn test_build_signs_post_only_buy() {
        let builder = OrderBuilder::new(137, PrivateKeySigner::random(), None, 0);
        let intent = OrderIntent::maker_buy("12345", Side::Down, 0.62, 10.0).unwrap();
        let signed = builder.build(&intent).await.unwrap();
        assert_eq!(signed.side, "BUY");
        assert_eq!(signed.token_id, "12345");
        assert_eq!(signed.signature.len(), 2 + 130);
        assert!(signed.salt < (1u64 << 53));
    }
}
