// x402 Types
//
// Protocol types for the EVM `exact` scheme (USDC via EIP-3009).

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::error::{X402Error, X402Result};

/// x402 protocol version.
pub const X402_VERSION: u32 = 1;

/// Payment proof sent by the client.
pub const HEADER_PAYMENT: &str = "X-PAYMENT";

/// Settlement receipt returned by the server.
pub const HEADER_PAYMENT_RESPONSE: &str = "X-PAYMENT-RESPONSE";

pub const SCHEME_EXACT: &str = "exact";

/// Seconds a signed authorization stays valid.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 300;

/// USDC has six decimals on every supported network.
pub const USDC_DECIMALS: u32 = 6;

/// Settlement networks the agent can charge on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    #[default]
    Base,
    BaseSepolia,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::BaseSepolia => "base-sepolia",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Base => 8453,
            Self::BaseSepolia => 84532,
        }
    }

    /// USDC token contract, which is also the EIP-712 verifying contract.
    pub fn usdc_address(&self) -> &'static str {
        match self {
            Self::Base => "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            Self::BaseSepolia => "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        }
    }

    /// EIP-712 domain (name, version) of the USDC contract.
    pub fn usdc_domain(&self) -> AssetExtra {
        let name = match self {
            Self::Base => "USD Coin",
            Self::BaseSepolia => "USDC",
        };
        AssetExtra {
            name: name.to_string(),
            version: "2".to_string(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "base-sepolia" => Ok(Self::BaseSepolia),
            other => Err(X402Error::UnsupportedNetwork {
                network: other.to_string(),
            }),
        }
    }
}

/// EIP-712 domain details of the payment asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetExtra {
    pub name: String,
    pub version: String,
}

/// One accepted way to pay for a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Amount in the asset's atomic units.
    pub max_amount_required: String,
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<AssetExtra>,
}

impl PaymentRequirements {
    /// Requirements for the `exact` scheme paying USDC on `network`.
    pub fn exact_usdc(
        network: Network,
        amount_atomic: u64,
        pay_to: &str,
        resource: &str,
        description: &str,
    ) -> Self {
        Self {
            scheme: SCHEME_EXACT.to_string(),
            network: network.as_str().to_string(),
            max_amount_required: amount_atomic.to_string(),
            resource: resource.to_string(),
            description: description.to_string(),
            mime_type: "application/json".to_string(),
            pay_to: pay_to.to_string(),
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            asset: network.usdc_address().to_string(),
            output_schema: None,
            extra: Some(network.usdc_domain()),
        }
    }

    pub fn amount(&self) -> X402Result<u64> {
        self.max_amount_required
            .parse()
            .map_err(|_| X402Error::MalformedPayload {
                reason: format!("invalid maxAmountRequired '{}'", self.max_amount_required),
            })
    }
}

/// Body of a 402 Payment Required response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u32,
    #[serde(default)]
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
}

/// Decoded `X-PAYMENT` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ExactEvmPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactEvmPayload {
    /// 65-byte `r || s || v` signature, 0x-prefixed hex.
    pub signature: String,
    pub authorization: Authorization,
}

/// EIP-3009 `TransferWithAuthorization` message. Integers are decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    /// 32 random bytes, 0x-prefixed hex.
    pub nonce: String,
}

impl PaymentPayload {
    pub fn from_header(header_value: &str) -> X402Result<Self> {
        decode_header(header_value)
    }

    pub fn to_header(&self) -> X402Result<String> {
        encode_header(self)
    }
}

/// Body sent to the facilitator's `/verify` and `/settle` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    pub x402_version: u32,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Facilitator settlement result; also the `X-PAYMENT-RESPONSE` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, alias = "txHash", skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl SettleResponse {
    pub fn to_header(&self) -> X402Result<String> {
        encode_header(self)
    }

    pub fn from_header(header_value: &str) -> X402Result<Self> {
        decode_header(header_value)
    }
}

fn encode_header<T: Serialize>(value: &T) -> X402Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| X402Error::MalformedPayload {
        reason: format!("JSON encode error: {}", e),
    })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

fn decode_header<T: serde::de::DeserializeOwned>(header_value: &str) -> X402Result<T> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(header_value.trim())
        .map_err(|e| X402Error::MalformedPayload {
            reason: format!("base64 decode error: {}", e),
        })?;
    serde_json::from_slice(&decoded).map_err(|e| X402Error::MalformedPayload {
        reason: format!("JSON parse error: {}", e),
    })
}

/// Convert a decimal USD price such as `"0.03"` or `"$1.5"` into atomic units.
pub fn parse_price(price: &str, decimals: u32) -> X402Result<u64> {
    let invalid = |reason: &str| X402Error::InvalidPrice {
        price: price.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = price.trim().trim_start_matches('$');
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("empty"));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if fraction.len() > decimals as usize {
        return Err(invalid("too many decimal places"));
    }

    let scale = 10u64.pow(decimals);
    let whole_units: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid("out of range"))?
    };
    let fraction_units: u64 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse().map_err(|_| invalid("out of range"))?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(|| invalid("out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("0.03", USDC_DECIMALS).unwrap(), 30_000);
        assert_eq!(parse_price("$1.5", USDC_DECIMALS).unwrap(), 1_500_000);
        assert_eq!(parse_price("2", USDC_DECIMALS).unwrap(), 2_000_000);
        assert_eq!(parse_price(".000001", USDC_DECIMALS).unwrap(), 1);
    }

    #[test]
    fn test_parse_price_rejects_bad_input() {
        assert!(parse_price("", USDC_DECIMALS).is_err());
        assert!(parse_price("abc", USDC_DECIMALS).is_err());
        assert!(parse_price("-1", USDC_DECIMALS).is_err());
        assert!(parse_price("0.0000001", USDC_DECIMALS).is_err());
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("base".parse::<Network>().unwrap(), Network::Base);
        assert_eq!(" Base-Sepolia ".parse::<Network>().unwrap(), Network::BaseSepolia);
        assert!(matches!(
            "hedera:testnet".parse::<Network>(),
            Err(X402Error::UnsupportedNetwork { .. })
        ));
        assert_eq!(Network::BaseSepolia.chain_id(), 84532);
    }

    #[test]
    fn test_requirements_serialize_camel_case() {
        let req = PaymentRequirements::exact_usdc(
            Network::Base,
            30_000,
            "0xb308ed39d67D0d4BAe5BC2FAEF60c66BBb6AE429",
            "http://localhost:8787/entrypoints/brainstorm/invoke",
            "Strictly Vibe Coding",
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["maxAmountRequired"], "30000");
        assert_eq!(json["payTo"], "0xb308ed39d67D0d4BAe5BC2FAEF60c66BBb6AE429");
        assert_eq!(json["asset"], Network::Base.usdc_address());
        assert_eq!(json["extra"]["name"], "USD Coin");
        assert!(json.get("outputSchema").is_none());
    }

    #[test]
    fn test_settle_response_accepts_legacy_field_names() {
        let parsed: SettleResponse =
            serde_json::from_str(r#"{"success":false,"error":"nonce used","txHash":"0xabc"}"#)
                .unwrap();
        assert_eq!(parsed.error_reason.as_deref(), Some("nonce used"));
        assert_eq!(parsed.transaction.as_deref(), Some("0xabc"));
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        assert!(matches!(
            PaymentPayload::from_header("%%%not-base64%%%"),
            Err(X402Error::MalformedPayload { .. })
        ));
    }
}
