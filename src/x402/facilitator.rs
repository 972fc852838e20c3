// Facilitator Client
//
// Talks to an x402 facilitator's `/verify` and `/settle` endpoints.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use super::error::{X402Error, X402Result};
use super::types::{
    FacilitatorRequest, PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse,
    X402_VERSION,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct FacilitatorClient {
    client: Client,
    base_url: String,
}

impl FacilitatorClient {
    pub fn new(facilitator_url: &str) -> X402Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| X402Error::FacilitatorNetwork(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: facilitator_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the facilitator whether `payload` satisfies `requirements`.
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> X402Result<VerifyResponse> {
        let url = format!("{}/verify", self.base_url);
        debug!(url = %url, "Verifying payment with facilitator");

        let response = self
            .client
            .post(&url)
            .json(&Self::request(payload, requirements))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(X402Error::VerificationFailed {
                reason: format!("facilitator returned {}: {}", status, body),
            });
        }

        let verify_response: VerifyResponse =
            response.json().await.map_err(|e| X402Error::VerificationFailed {
                reason: format!("failed to parse verify response: {}", e),
            })?;

        if verify_response.is_valid {
            debug!(payer = ?verify_response.payer, "Payment verified");
        } else {
            warn!(reason = ?verify_response.invalid_reason, "Payment rejected by facilitator");
        }

        Ok(verify_response)
    }

    /// Submit a verified payment for on-chain settlement.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> X402Result<SettleResponse> {
        let url = format!("{}/settle", self.base_url);
        debug!(url = %url, "Settling payment with facilitator");

        let response = self
            .client
            .post(&url)
            .json(&Self::request(payload, requirements))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(X402Error::SettlementFailed {
                reason: format!("facilitator returned {}: {}", status, body),
            });
        }

        let settle_response: SettleResponse =
            response.json().await.map_err(|e| X402Error::SettlementFailed {
                reason: format!("failed to parse settle response: {}", e),
            })?;

        if settle_response.success {
            info!(
                transaction = ?settle_response.transaction,
                network = ?settle_response.network,
                "Payment settled"
            );
        } else {
            warn!(error = ?settle_response.error_reason, "Payment settlement failed");
        }

        Ok(settle_response)
    }

    fn request(payload: &PaymentPayload, requirements: &PaymentRequirements) -> FacilitatorRequest {
        FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_payload: payload.clone(),
            payment_requirements: requirements.clone(),
        }
    }
}
