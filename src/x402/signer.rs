// Payment Signer
//
// Builds an EIP-3009 `TransferWithAuthorization` for the first acceptable
// requirement and signs its EIP-712 digest with a secp256k1 key.

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use sha3::{Digest, Keccak256};

use super::error::{X402Error, X402Result};
use super::types::{
    AssetExtra, Authorization, ExactEvmPayload, Network, PaymentPayload, PaymentRequirements,
    SCHEME_EXACT, X402_VERSION,
};

const EIP712_DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const TRANSFER_WITH_AUTHORIZATION_TYPE: &[u8] = b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)";

/// Backdate `validAfter` to tolerate clock skew between client and chain.
const VALID_AFTER_SKEW_SECONDS: u64 = 600;

/// Signs x402 payments on behalf of an EVM account.
pub struct EvmSigner {
    key: SigningKey,
    address: [u8; 20],
}

impl EvmSigner {
    /// Load a signer from a 32-byte hex private key (with or without `0x`).
    pub fn from_hex(private_key: &str) -> X402Result<Self> {
        let bytes = hex::decode(strip_0x(private_key.trim()))
            .map_err(|e| X402Error::InvalidKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(X402Error::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(&bytes).map_err(|e| X402Error::InvalidKey(e.to_string()))?;

        let encoded = key.verifying_key().to_encoded_point(false);
        // skip the 0x04 uncompressed prefix
        let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);

        Ok(Self { key, address })
    }

    /// Lowercase 0x-prefixed account address.
    pub fn address(&self) -> String {
        format!("0x{}", hex::encode(self.address))
    }

    /// Build and sign a payment satisfying `requirements`.
    pub fn sign_payment(&self, requirements: &PaymentRequirements, now: u64) -> X402Result<PaymentPayload> {
        if requirements.scheme != SCHEME_EXACT {
            return Err(X402Error::UnsupportedScheme {
                scheme: requirements.scheme.clone(),
            });
        }
        let network: Network = requirements.network.parse()?;
        let domain = requirements
            .extra
            .clone()
            .unwrap_or_else(|| network.usdc_domain());

        let authorization = Authorization {
            from: self.address(),
            to: requirements.pay_to.clone(),
            value: requirements.max_amount_required.clone(),
            valid_after: now.saturating_sub(VALID_AFTER_SKEW_SECONDS).to_string(),
            valid_before: now.saturating_add(requirements.max_timeout_seconds).to_string(),
            nonce: format!("0x{}", hex::encode(rand::random::<[u8; 32]>())),
        };

        let digest = authorization_digest(&authorization, &domain, network.chain_id(), &requirements.asset)?;
        let signature = self.sign_digest(&digest)?;

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            scheme: SCHEME_EXACT.to_string(),
            network: network.as_str().to_string(),
            payload: ExactEvmPayload {
                signature,
                authorization,
            },
        })
    }

    /// 65-byte `r || s || v` signature with `v` in {27, 28}.
    fn sign_digest(&self, digest: &[u8; 32]) -> X402Result<String> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|e| X402Error::Signing(e.to_string()))?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(27 + recovery_id.to_byte());
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

/// Pick the first requirement this client knows how to pay.
pub fn select_requirement(accepts: &[PaymentRequirements]) -> Option<&PaymentRequirements> {
    accepts
        .iter()
        .find(|req| req.scheme == SCHEME_EXACT && req.network.parse::<Network>().is_ok())
}

/// EIP-712 digest of a `TransferWithAuthorization` message.
pub fn authorization_digest(
    authorization: &Authorization,
    domain: &AssetExtra,
    chain_id: u64,
    verifying_contract: &str,
) -> X402Result<[u8; 32]> {
    let mut domain_encoded = Vec::with_capacity(32 * 5);
    domain_encoded.extend_from_slice(&keccak(EIP712_DOMAIN_TYPE));
    domain_encoded.extend_from_slice(&keccak(domain.name.as_bytes()));
    domain_encoded.extend_from_slice(&keccak(domain.version.as_bytes()));
    domain_encoded.extend_from_slice(&encode_uint(&chain_id.to_string())?);
    domain_encoded.extend_from_slice(&encode_address(verifying_contract)?);
    let domain_separator = keccak(&domain_encoded);

    let mut struct_encoded = Vec::with_capacity(32 * 7);
    struct_encoded.extend_from_slice(&keccak(TRANSFER_WITH_AUTHORIZATION_TYPE));
    struct_encoded.extend_from_slice(&encode_address(&authorization.from)?);
    struct_encoded.extend_from_slice(&encode_address(&authorization.to)?);
    struct_encoded.extend_from_slice(&encode_uint(&authorization.value)?);
    struct_encoded.extend_from_slice(&encode_uint(&authorization.valid_after)?);
    struct_encoded.extend_from_slice(&encode_uint(&authorization.valid_before)?);
    struct_encoded.extend_from_slice(&encode_bytes32(&authorization.nonce)?);
    let struct_hash = keccak(&struct_encoded);

    let mut message = Vec::with_capacity(2 + 64);
    message.extend_from_slice(&[0x19, 0x01]);
    message.extend_from_slice(&domain_separator);
    message.extend_from_slice(&struct_hash);
    Ok(keccak(&message))
}

fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

fn encode_address(address: &str) -> X402Result<[u8; 32]> {
    let bytes = hex::decode(strip_0x(address)).map_err(|e| X402Error::MalformedPayload {
        reason: format!("invalid address '{}': {}", address, e),
    })?;
    if bytes.len() != 20 {
        return Err(X402Error::MalformedPayload {
            reason: format!("invalid address '{}': expected 20 bytes", address),
        });
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

fn encode_uint(value: &str) -> X402Result<[u8; 32]> {
    let parsed: u128 = value.parse().map_err(|_| X402Error::MalformedPayload {
        reason: format!("invalid integer '{}'", value),
    })?;
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&parsed.to_be_bytes());
    Ok(word)
}

fn encode_bytes32(value: &str) -> X402Result<[u8; 32]> {
    let bytes = hex::decode(strip_0x(value)).map_err(|e| X402Error::MalformedPayload {
        reason: format!("invalid bytes32 '{}': {}", value, e),
    })?;
    bytes.try_into().map_err(|_| X402Error::MalformedPayload {
        reason: format!("invalid bytes32 '{}': expected 32 bytes", value),
    })
}
