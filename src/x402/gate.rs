// Payment Gate
//
// Server-side gate for priced entrypoints. Owns the 402 challenge and the
// local sanity checks on an incoming `X-PAYMENT`; signature validity and
// fund availability are the facilitator's call.

use chrono::Utc;
use tracing::info;

use super::error::{X402Error, X402Result};
use super::facilitator::FacilitatorClient;
use super::types::{
    parse_price, Network, PaymentPayload, PaymentRequired, PaymentRequirements, SettleResponse,
    SCHEME_EXACT, USDC_DECIMALS, X402_VERSION,
};

/// Payment settings for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentsConfig {
    pub facilitator_url: String,
    pub pay_to: String,
    pub network: Network,
}

/// A payment that passed facilitator verification and awaits settlement.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub payload: PaymentPayload,
    pub requirements: PaymentRequirements,
    pub payer: Option<String>,
}

pub struct PaymentGate {
    config: PaymentsConfig,
    facilitator: FacilitatorClient,
}

impl PaymentGate {
    pub fn new(config: PaymentsConfig) -> X402Result<Self> {
        let facilitator = FacilitatorClient::new(&config.facilitator_url)?;
        Ok(Self { config, facilitator })
    }

    pub fn config(&self) -> &PaymentsConfig {
        &self.config
    }

    /// Requirements a client must meet to pay `price` (decimal USD) for `resource`.
    pub fn requirements(
        &self,
        resource: &str,
        description: &str,
        price: &str,
    ) -> X402Result<PaymentRequirements> {
        let amount = parse_price(price, USDC_DECIMALS)?;
        Ok(PaymentRequirements::exact_usdc(
            self.config.network,
            amount,
            &self.config.pay_to,
            resource,
            description,
        ))
    }

    /// 402 body for a request that arrived without an acceptable payment.
    pub fn payment_required(
        &self,
        requirements: PaymentRequirements,
        error: &X402Error,
    ) -> PaymentRequired {
        PaymentRequired {
            x402_version: X402_VERSION,
            error: error.to_string(),
            accepts: vec![requirements],
        }
    }

    /// Decode, sanity-check and verify an `X-PAYMENT` header.
    pub async fn verify(
        &self,
        header: Option<&str>,
        requirements: &PaymentRequirements,
    ) -> X402Result<VerifiedPayment> {
        let header = header
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(X402Error::PaymentMissing)?;

        let payload = PaymentPayload::from_header(header)?;
        validate_payload(&payload, requirements, Utc::now().timestamp().max(0) as u64)?;

        let verdict = self.facilitator.verify(&payload, requirements).await?;
        if !verdict.is_valid {
            return Err(X402Error::VerificationFailed {
                reason: verdict
                    .invalid_reason
                    .unwrap_or_else(|| "unknown verification failure".to_string()),
            });
        }

        Ok(VerifiedPayment {
            payload,
            requirements: requirements.clone(),
            payer: verdict.payer,
        })
    }

    /// Settle a verified payment; an unsuccessful settlement is an error.
    pub async fn settle(&self, payment: &VerifiedPayment) -> X402Result<SettleResponse> {
        let settled = self
            .facilitator
            .settle(&payment.payload, &payment.requirements)
            .await?;

        if !settled.success {
            return Err(X402Error::SettlementFailed {
                reason: settled
                    .error_reason
                    .clone()
                    .unwrap_or_else(|| "unknown settlement failure".to_string()),
            });
        }

        info!(
            payer = ?payment.payer,
            amount = %payment.requirements.max_amount_required,
            network = %payment.requirements.network,
            "x402 payment processed"
        );
        Ok(settled)
    }
}

/// Local checks before bothering the facilitator.
fn validate_payload(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
    now: u64,
) -> X402Result<()> {
    if payload.scheme != SCHEME_EXACT {
        return Err(X402Error::UnsupportedScheme {
            scheme: payload.scheme.clone(),
        });
    }

    if payload.network != requirements.network {
        return Err(X402Error::UnsupportedNetwork {
            network: payload.network.clone(),
        });
    }

    let authorization = &payload.payload.authorization;
    if !authorization.to.eq_ignore_ascii_case(&requirements.pay_to) {
        return Err(X402Error::WrongRecipient {
            expected: requirements.pay_to.clone(),
            actual: authorization.to.clone(),
        });
    }

    let malformed = |field: &str| X402Error::MalformedPayload {
        reason: format!("authorization.{} is not an integer", field),
    };
    let received: u64 = authorization.value.parse().map_err(|_| malformed("value"))?;
    let required = requirements.amount()?;
    if received < required {
        return Err(X402Error::InsufficientPayment { required, received });
    }

    let valid_before: u64 = authorization
        .valid_before
        .parse()
        .map_err(|_| malformed("validBefore"))?;
    if valid_before <= now {
        return Err(X402Error::PaymentExpired {
            expired_at: valid_before,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x402::types::{Authorization, ExactEvmPayload};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAY_TO: &str = "0xb308ed39d67D0d4BAe5BC2FAEF60c66BBb6AE429";

    fn gate(facilitator_url: &str) -> PaymentGate {
        PaymentGate::new(PaymentsConfig {
            facilitator_url: facilitator_url.to_string(),
            pay_to: PAY_TO.to_string(),
            network: Network::Base,
        })
        .unwrap()
    }

    fn payload(to: &str, value: &str, valid_before: &str) -> PaymentPayload {
        PaymentPayload {
            x402_version: X402_VERSION,
            scheme: SCHEME_EXACT.to_string(),
            network: "base".to_string(),
            payload: ExactEvmPayload {
                signature: "0x00".to_string(),
                authorization: Authorization {
                    from: "0x1111111111111111111111111111111111111111".to_string(),
                    to: to.to_string(),
                    value: value.to_string(),
                    valid_after: "0".to_string(),
                    valid_before: valid_before.to_string(),
                    nonce: format!("0x{}", "ab".repeat(32)),
                },
            },
        }
    }

    #[test]
    fn test_requirements_use_atomic_price() {
        let gate = gate("http://127.0.0.1:1");
        let req = gate.requirements("http://agent/invoke", "desc", "0.03").unwrap();
        assert_eq!(req.max_amount_required, "30000");
        assert_eq!(req.pay_to, PAY_TO);
        assert_eq!(req.network, "base");
    }

    #[test]
    fn test_validate_payload_checks() {
        let gate = gate("http://127.0.0.1:1");
        let req = gate.requirements("r", "d", "0.03").unwrap();

        let recipient_lowercase = PAY_TO.to_lowercase();
        assert!(validate_payload(&payload(&recipient_lowercase, "30000", "2000"), &req, 1000).is_ok());

        assert!(matches!(
            validate_payload(&payload(PAY_TO, "100", "2000"), &req, 1000),
            Err(X402Error::InsufficientPayment { required: 30000, received: 100 })
        ));
        assert!(matches!(
            validate_payload(
                &payload("0x9999999999999999999999999999999999999999", "30000", "2000"),
                &req,
                1000
            ),
            Err(X402Error::WrongRecipient { .. })
        ));
        assert!(matches!(
            validate_payload(&payload(PAY_TO, "30000", "999"), &req, 1000),
            Err(X402Error::PaymentExpired { expired_at: 999 })
        ));

        let mut wrong_scheme = payload(PAY_TO, "30000", "2000");
        wrong_scheme.scheme = "upto".to_string();
        assert!(matches!(
            validate_payload(&wrong_scheme, &req, 1000),
            Err(X402Error::UnsupportedScheme { .. })
        ));

        let mut wrong_network = payload(PAY_TO, "30000", "2000");
        wrong_network.network = "base-sepolia".to_string();
        assert!(matches!(
            validate_payload(&wrong_network, &req, 1000),
            Err(X402Error::UnsupportedNetwork { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_without_header_requires_payment() {
        let gate = gate("http://127.0.0.1:1");
        let req = gate.requirements("r", "d", "0.03").unwrap();
        assert!(matches!(
            gate.verify(None, &req).await,
            Err(X402Error::PaymentMissing)
        ));
        assert!(matches!(
            gate.verify(Some("  "), &req).await,
            Err(X402Error::PaymentMissing)
        ));
    }

    #[tokio::test]
    async fn test_verify_rejected_by_facilitator() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "isValid": false,
                "invalidReason": "insufficient_funds"
            })))
            .mount(&server)
            .await;

        let gate = gate(&server.uri());
        let req = gate.requirements("r", "d", "0.03").unwrap();
        let header = payload(PAY_TO, "30000", "99999999999").to_header().unwrap();

        match gate.verify(Some(&header), &req).await {
            Err(X402Error::VerificationFailed { reason }) => assert_eq!(reason, "insufficient_funds"),
            other => panic!("unexpected result: {:?}", other.map(|p| p.payer)),
        }
    }

    #[tokio::test]
    async fn test_settle_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "isValid": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "errorReason": "nonce_already_used"
            })))
            .mount(&server)
            .await;

        let gate = gate(&server.uri());
        let req = gate.requirements("r", "d", "0.03").unwrap();
        let header = payload(PAY_TO, "30000", "99999999999").to_header().unwrap();
        let verified = gate.verify(Some(&header), &req).await.unwrap();

        assert!(matches!(
            gate.settle(&verified).await,
            Err(X402Error::SettlementFailed { .. })
        ));
    }
}
