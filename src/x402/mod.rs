// x402 Payments
//
// HTTP 402 payment flow for priced entrypoints:
// 1. Client calls a priced entrypoint without payment -> 402 + requirements
// 2. Client signs an EIP-3009 USDC authorization and retries with X-PAYMENT
// 3. Gate checks the payload locally, then asks the facilitator to verify
// 4. Handler runs; on success the facilitator settles on-chain
// 5. Settlement receipt returned in X-PAYMENT-RESPONSE

pub mod error;
pub mod facilitator;
pub mod gate;
pub mod signer;
pub mod types;

pub use error::{X402Error, X402Result};
pub use facilitator::FacilitatorClient;
pub use gate::{PaymentGate, PaymentsConfig, VerifiedPayment};
pub use signer::{select_requirement, EvmSigner};
pub use types::{
    parse_price, Network, PaymentPayload, PaymentRequired, PaymentRequirements, SettleResponse,
    HEADER_PAYMENT, HEADER_PAYMENT_RESPONSE, USDC_DECIMALS, X402_VERSION,
};
