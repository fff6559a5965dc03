use async_trait::async_trait;
use mentor_core::config::StripeConfig;
use mentor_core::{MentorError, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing;

use crate::{
    Balance, HoldRequest, IntentStatus, PaymentHold, PaymentProvider, Payout, ProviderRefund,
    RefundRequest,
};

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    id: String,
    amount: i64,
    currency: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Stripe REST client for Connect destination charges.
pub struct StripeClient {
    client: reqwest::Client,
    secret_key: Option<String>,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> anyhow::Result<Self> {
        if config.secret_key.is_none() {
            tracing::warn!("Stripe secret key not configured; payment calls will fail");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        idempotency_key: Option<&str>,
        connected_account: Option<&str>,
    ) -> Result<T> {
        let secret_key = self
            .secret_key
            .as_deref()
            .ok_or_else(|| MentorError::ProviderUnavailable("Payment provider is not configured".to_string()))?;

        let url = format!("{}{}", self.api_base, path);
        let mut request = self.client.request(method.clone(), &url).bearer_auth(secret_key);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(account) = connected_account {
            request = request.header("Stripe-Account", account);
        }
        if method != Method::GET && !params.is_empty() {
            request = request.form(params);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!("Stripe request to {} failed: {}", path, e);
            MentorError::ProviderUnavailable("Payment provider request failed".to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                tracing::error!("Failed to parse Stripe response from {}: {}", path, e);
                MentorError::PaymentProcessing("Unexpected response from payment provider".to_string())
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_error_response(status, &body, path))
    }

    async fn intent_call(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<IntentStatus> {
        let intent: PaymentIntentResponse = self.send(method, path, params, idempotency_key, None).await?;
        Ok(IntentStatus::parse(&intent.status))
    }
}

fn map_error_response(status: StatusCode, body: &str, path: &str) -> MentorError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = detail
        .as_ref()
        .and_then(|d| d.error.message.clone())
        .unwrap_or_else(|| format!("Payment provider returned status {}", status.as_u16()));
    let code = detail.and_then(|d| d.error.code).unwrap_or_default();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!("Stripe {} unavailable ({}): {}", path, status, message);
        MentorError::ProviderUnavailable(message)
    } else {
        tracing::warn!("Stripe {} rejected request ({} {}): {}", path, status, code, message);
        MentorError::PaymentProcessing(message)
    }
}

fn hold_params(request: &HoldRequest) -> Vec<(&'static str, String)> {
    vec![
        ("amount", request.amount_minor.to_string()),
        ("currency", request.currency.clone()),
        ("capture_method", "manual".to_string()),
        ("application_fee_amount", request.fee_minor.to_string()),
        ("transfer_data[destination]", request.destination_account.clone()),
        ("metadata[booking_id]", request.booking_id.to_string()),
        ("automatic_payment_methods[enabled]", "true".to_string()),
        ("automatic_payment_methods[allow_redirects]", "never".to_string()),
    ]
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_payment_hold(&self, request: &HoldRequest) -> Result<PaymentHold> {
        let intent: PaymentIntentResponse = self
            .send(
                Method::POST,
                "/v1/payment_intents",
                &hold_params(request),
                Some(&request.idempotency_key),
                None,
            )
            .await?;

        tracing::info!(
            "Created payment hold {} for booking {} ({} minor units)",
            intent.id,
            request.booking_id,
            request.amount_minor
        );

        Ok(PaymentHold {
            status: IntentStatus::parse(&intent.status),
            id: intent.id,
            client_secret: intent.client_secret,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentStatus> {
        self.intent_call(Method::GET, &format!("/v1/payment_intents/{}", intent_id), &[], None)
            .await
    }

    async fn attach_and_confirm(&self, intent_id: &str, payment_method: &str) -> Result<IntentStatus> {
        self.intent_call(
            Method::POST,
            &format!("/v1/payment_intents/{}/confirm", intent_id),
            &[("payment_method", payment_method.to_string())],
            None,
        )
        .await
    }

    async fn capture(&self, intent_id: &str, idempotency_key: &str) -> Result<IntentStatus> {
        self.intent_call(
            Method::POST,
            &format!("/v1/payment_intents/{}/capture", intent_id),
            &[],
            Some(idempotency_key),
        )
        .await
    }

    async fn cancel_intent(&self, intent_id: &str, idempotency_key: &str) -> Result<IntentStatus> {
        self.intent_call(
            Method::POST,
            &format!("/v1/payment_intents/{}/cancel", intent_id),
            &[("cancellation_reason", "requested_by_customer".to_string())],
            Some(idempotency_key),
        )
        .await
    }

    async fn refund(&self, request: &RefundRequest) -> Result<ProviderRefund> {
        let params = vec![
            ("payment_intent", request.payment_ref.clone()),
            ("reverse_transfer", request.reverse_transfer.to_string()),
            ("refund_application_fee", request.refund_fee.to_string()),
        ];
        let refund: RefundResponse = self
            .send(Method::POST, "/v1/refunds", &params, Some(&request.idempotency_key), None)
            .await?;

        Ok(ProviderRefund {
            id: refund.id,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    async fn payout(
        &self,
        account: &str,
        amount_minor: i64,
        currency: &str,
        idempotency_key: &str,
    ) -> Result<Payout> {
        let params = vec![
            ("amount", amount_minor.to_string()),
            ("currency", currency.to_string()),
        ];
        let payout: PayoutResponse = self
            .send(Method::POST, "/v1/payouts", &params, Some(idempotency_key), Some(account))
            .await?;

        Ok(Payout {
            id: payout.id,
            amount_minor: payout.amount,
            currency: payout.currency,
            status: payout.status,
        })
    }

    async fn get_balance(&self, account: &str) -> Result<Balance> {
        self.send(Method::GET, "/v1/balance", &[], None, Some(account)).await
    }
}
