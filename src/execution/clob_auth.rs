use crate::execution::ExecutionError;
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;

const AUTH_DOMAIN_NAME: &str = "ClobAuthDomain";
const AUTH_DOMAIN_VERSION: &str = "1";
const AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

/// CLOB request authentication.
///
/// **L1**: an EIP-712 `ClobAuth` signature, used only to create or derive
/// an API key.
///
/// **L2**: HMAC-SHA256 over `timestamp + METHOD + path + body` with the API
/// secret, sent on every trading request.
pub struct ClobAuth {
    signer: PrivateKeySigner,
    chain_id: u64,
    creds: Option<ApiCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    #[serde(alias = "apiKey")]
    pub api_key: String,
    #[serde(alias = "secret")]
    pub api_secret: String,
    #[serde(alias = "passphrase")]
    pub api_passphrase: String,
}

/// `POLY_*` headers for one request.
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub address: String,
    pub signature: String,
    pub timestamp: String,
    pub nonce: Option<String>,
    pub api_key: Option<String>,
    pub passphrase: Option<String>,
}

impl ClobAuth {
    pub fn new(signer: PrivateKeySigner, chain_id: u64) -> Self {
        Self {
            signer,
            chain_id,
            creds: None,
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn set_credentials(&mut self, creds: ApiCredentials) {
        self.creds = Some(creds);
    }

    /// API key, sent as the order `owner`.
    pub fn api_key(&self) -> Option<&str> {
        self.creds.as_ref().map(|c| c.api_key.as_str())
    }

    pub async fn l1_headers(&self) -> Result<AuthHeaders, ExecutionError> {
        let timestamp = Utc::now().timestamp().to_string();
        let digest = self.clob_auth_digest(&timestamp, 0);

        let sig = self.signer.sign_hash(&digest).await?;
        let mut bytes = sig.as_bytes();
        // L1 expects Ethereum-style v (27/28).
        if bytes[64] < 27 {
            bytes[64] += 27;
        }

        Ok(AuthHeaders {
            address: format!("{:?}", self.address()),
            signature: format!("0x{}", hex::encode(bytes)),
            timestamp,
            nonce: Some("0".into()),
            api_key: None,
            passphrase: None,
        })
    }

    pub fn l2_headers(&self, method: &str, path: &str, body: &str) -> Result<AuthHeaders, ExecutionError> {
        let creds = self
            .creds
            .as_ref()
            .ok_or_else(|| ExecutionError::Auth("API credentials not set".into()))?;
        let timestamp = Utc::now().timestamp().to_string();
        let signature = l2_signature(&creds.api_secret, &timestamp, method, path, body)?;

        Ok(AuthHeaders {
            address: format!("{:?}", self.address()),
            signature,
            timestamp,
            nonce: None,
            api_key: Some(creds.api_key.clone()),
            passphrase: Some(creds.api_passphrase.clone()),
        })
    }

    /// Create an API key, or derive the existing one if creation is refused.
    pub async fn derive_api_key(
        &mut self,
        http: &reqwest::Client,
        clob_host: &str,
    ) -> Result<ApiCredentials, ExecutionError> {
        let headers = self.l1_headers().await?;
        let created = headers
            .apply(http.post(format!("{clob_host}/auth/api-key")))
            .send()
            .await?;
        if created.status().is_success() {
            if let Ok(creds) = created.json::<ApiCredentials>().await {
                if !creds.api_key.is_empty() {
                    info!("API key created for {:?}", self.address());
                    self.creds = Some(creds.clone());
                    return Ok(creds);
                }
            }
        }

        let headers = self.l1_headers().await?;
        let resp = headers
            .apply(http.get(format!("{clob_host}/auth/derive-api-key")))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecutionError::Auth(format!("derive-api-key HTTP {status}: {body}")));
        }

        let creds: ApiCredentials = resp.json().await?;
        info!("API key derived for {:?}", self.address());
        self.creds = Some(creds.clone());
        Ok(creds)
    }

    /// EIP-712 digest of
    /// `ClobAuth(address address,string timestamp,uint256 nonce,string message)`.
    fn clob_auth_digest(&self, timestamp: &str, nonce: u64) -> B256 {
        let type_hash =
            keccak256("ClobAuth(address address,string timestamp,uint256 nonce,string message)");

        let mut data = Vec::with_capacity(5 * 32);
        data.extend_from_slice(type_hash.as_slice());
        data.extend_from_slice(&address_word(self.address()));
        data.extend_from_slice(keccak256(timestamp.as_bytes()).as_slice());
        data.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());
        data.extend_from_slice(keccak256(AUTH_MESSAGE.as_bytes()).as_slice());
        let struct_hash = keccak256(&data);

        let mut domain = Vec::with_capacity(4 * 32);
        domain.extend_from_slice(
            keccak256("EIP712Domain(string name,string version,uint256 chainId)").as_slice(),
        );
        domain.extend_from_slice(keccak256(AUTH_DOMAIN_NAME.as_bytes()).as_slice());
        domain.extend_from_slice(keccak256(AUTH_DOMAIN_VERSION.as_bytes()).as_slice());
        domain.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        let domain_separator = keccak256(&domain);

        let mut digest = Vec::with_capacity(66);
        digest.extend_from_slice(&[0x19, 0x01]);
        digest.extend_from_slice(domain_separator.as_slice());
        digest.extend_from_slice(struct_hash.as_slice());
        keccak256(&digest)
    }
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// URL-safe base64 HMAC-SHA256, keyed by the URL-safe base64 secret. The
/// query string is not part of the signed path.
pub fn l2_signature(
    secret_b64: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, ExecutionError> {
    let engine = base64::engine::general_purpose::URL_SAFE;
    let secret = engine
        .decode(secret_b64)
        .map_err(|e| ExecutionError::Auth(format!("bad API secret: {e}")))?;

    let path = path.split('?').next().unwrap_or(path);
    let payload = format!("{timestamp}{}{path}{body}", method.to_uppercase());

    let mut mac = Hmac::<Sha256>::new_from_slice(&secret)
        .map_err(|e| ExecutionError::Auth(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(engine.encode(mac.finalize().into_bytes()))
}

impl AuthHeaders {
    pub fn apply(self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut req = req
            .header("POLY_ADDRESS", self.address)
            .header("POLY_SIGNATURE", self.signature)
            .header("POLY_TIMESTAMP", self.timestamp);
        if let Some(nonce) = self.nonce {
            req = req.header("POLY_NONCE", nonce);
        }
        if let Some(key) = self.api_key {
            req = req.header("POLY_API_KEY", key);
        }
        if let Some(pass) = self.passphrase {
            req = req.header("POLY_PASSPHRASE", pass);
        }
        req
    }
}
