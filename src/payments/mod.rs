//! Payment gateway adapter.
//!
//! Checkout only ever needs three operations against the external
//! processor: resolve a customer by email, create a payment intent, and
//! update an intent's amount. Capture, 3-D Secure, and webhooks happen
//! out-of-band between the shopper's browser and the gateway.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;

/// Metadata attached to every intent for reconciliation.
#[derive(Debug, Clone)]
pub struct IntentMetadata {
    pub order_id: Uuid,
    pub item_count: i32,
    pub shipping_method: String,
}

impl IntentMetadata {
    fn as_form_fields(&self) -> Vec<(String, String)> {
        vec![
            ("metadata[order_id]".into(), self.order_id.to_string()),
            ("metadata[item_count]".into(), self.item_count.to_string()),
            (
                "metadata[shipping_method]".into(),
                self.shipping_method.clone(),
            ),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct GatewayCustomer {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount_minor: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("gateway returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("amount {0} cannot be represented in minor units")]
    InvalidAmount(Decimal),
}

impl From<GatewayError> for crate::errors::ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Api { .. } => crate::errors::ServiceError::PaymentFailed(err.to_string()),
            _ => crate::errors::ServiceError::ExternalServiceError(err.to_string()),
        }
    }
}

/// Converts a decimal amount to the gateway's minor units (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or(GatewayError::InvalidAmount(amount))
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Finds the gateway customer for an email, creating one if absent.
    async fn get_or_create_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError>;

    /// Creates a payment intent and returns its id + client secret.
    async fn create_payment_intent(
        &self,
        amount: Decimal,
        currency: &str,
        customer: Option<String>,
        metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Updates an existing intent's amount (shipping changes before
    /// payment completes).
    async fn update_payment_intent(
        &self,
        intent_id: &str,
        amount: Decimal,
        metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError>;
}

// ---------------------------------------------------------------------
// HTTP implementation (Stripe-style form-encoded API)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiCustomer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<ApiCustomer>,
}

#[derive(Debug, Deserialize)]
struct ApiIntent {
    id: String,
    client_secret: Option<String>,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
        } else {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| "unknown gateway error".to_string());
            Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn get_or_create_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError> {
        let listing: CustomerList = Self::check(
            self.http
                .get(format!("{}/v1/customers", self.base_url))
                .bearer_auth(&self.secret_key)
                .query(&[("email", email), ("limit", "1")])
                .send()
                .await?,
        )
        .await?;

        if let Some(existing) = listing.data.into_iter().next() {
            return Ok(GatewayCustomer { id: existing.id });
        }

        let created: ApiCustomer = Self::check(
            self.http
                .post(format!("{}/v1/customers", self.base_url))
                .bearer_auth(&self.secret_key)
                .form(&[("email", email)])
                .send()
                .await?,
        )
        .await?;

        info!(customer_id = %created.id, "Created gateway customer");
        Ok(GatewayCustomer { id: created.id })
    }

    #[instrument(skip(self, metadata))]
    async fn create_payment_intent(
        &self,
        amount: Decimal,
        currency: &str,
        customer: Option<String>,
        metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError> {
        let amount_minor = to_minor_units(amount)?;

        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), amount_minor.to_string()),
            ("currency".into(), currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
        ];
        if let Some(customer_id) = customer {
            form.push(("customer".into(), customer_id));
        }
        form.extend(metadata.as_form_fields());

        let intent: ApiIntent = Self::check(
            self.http
                .post(format!("{}/v1/payment_intents", self.base_url))
                .bearer_auth(&self.secret_key)
                .form(&form)
                .send()
                .await?,
        )
        .await?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::InvalidResponse("payment intent missing client_secret".into())
        })?;

        info!(intent_id = %intent.id, amount_minor, "Created payment intent");
        Ok(PaymentIntent {
            id: intent.id,
            client_secret,
            amount_minor: intent.amount,
        })
    }

    #[instrument(skip(self, metadata))]
    async fn update_payment_intent(
        &self,
        intent_id: &str,
        amount: Decimal,
        metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError> {
        let amount_minor = to_minor_units(amount)?;

        let mut form: Vec<(String, String)> =
            vec![("amount".into(), amount_minor.to_string())];
        form.extend(metadata.as_form_fields());

        let intent: ApiIntent = Self::check(
            self.http
                .post(format!("{}/v1/payment_intents/{}", self.base_url, intent_id))
                .bearer_auth(&self.secret_key)
                .form(&form)
                .send()
                .await?,
        )
        .await?;

        info!(intent_id = %intent.id, amount_minor, "Updated payment intent amount");
        Ok(PaymentIntent {
            id: intent.id,
            client_secret: intent.client_secret.unwrap_or_default(),
            amount_minor: intent.amount,
        })
    }
}

// ---------------------------------------------------------------------
// Sandbox implementation
// ---------------------------------------------------------------------

/// Gateway used in development and tests when no secret key is
/// configured. Intents are fabricated locally and always succeed.
#[derive(Debug, Default)]
pub struct SandboxGateway;

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn get_or_create_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError> {
        warn!(email, "Sandbox gateway in use; no real customer created");
        Ok(GatewayCustomer {
            id: format!("cus_sandbox_{}", Uuid::new_v4().simple()),
        })
    }

    async fn create_payment_intent(
        &self,
        amount: Decimal,
        _currency: &str,
        _customer: Option<String>,
        _metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError> {
        let id = format!("pi_sandbox_{}", Uuid::new_v4().simple());
        Ok(PaymentIntent {
            client_secret: format!("{}_secret_{}", id, Uuid::new_v4().simple()),
            amount_minor: to_minor_units(amount)?,
            id,
        })
    }

    async fn update_payment_intent(
        &self,
        intent_id: &str,
        amount: Decimal,
        _metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError> {
        Ok(PaymentIntent {
            id: intent_id.to_string(),
            client_secret: String::new(),
            amount_minor: to_minor_units(amount)?,
        })
    }
}
