// services/mpesa_service.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::{AppConfig, Environment};
use crate::dtos::payment_dtos::CommandId;
use crate::errors::{AppError, Result};

// Tokens are treated as expired this long before the provider says they are.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(deserialize_with = "number_or_string")]
    pub expires_in: u64,
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// C2B Structs
#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
}

// B2C Structs
#[derive(Debug, Serialize)]
pub struct B2CRequest {
    #[serde(rename = "InitiatorName")]
    pub initiator_name: String,
    #[serde(rename = "SecurityCredential")]
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    // Daraja's spelling
    #[serde(rename = "Occassion")]
    pub occasion: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct B2CResponse {
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransactionStatusRequest {
    #[serde(rename = "Initiator")]
    pub initiator: String,
    #[serde(rename = "SecurityCredential")]
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "IdentifierType")]
    pub identifier_type: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "Occasion")]
    pub occasion: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: AccessToken,
    valid_until: DateTime<Utc>,
}

pub struct StkPush<'a> {
    pub phone_number: &'a str,
    pub amount: f64,
    pub account_reference: &'a str,
    pub transaction_desc: &'a str,
}

pub struct B2CPayment<'a> {
    pub phone_number: &'a str,
    pub amount: f64,
    pub command_id: CommandId,
    pub remarks: &'a str,
    pub occasion: &'a str,
}

/// Client for the Daraja API. Every call names the environment it targets.
#[derive(Clone)]
pub struct MpesaService {
    config: Arc<AppConfig>,
    client: Client,
    cached_tokens: Arc<RwLock<HashMap<Environment, CachedToken>>>,
}

pub fn generate_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    base64.encode(format!("{}{}{}", short_code, passkey, timestamp))
}

pub fn basic_auth(consumer_key: &str, consumer_secret: &str) -> String {
    format!("Basic {}", base64.encode(format!("{}:{}", consumer_key, consumer_secret)))
}

/// The provider expects whole shillings.
fn whole_amount(amount: f64) -> u64 {
    amount.round().max(0.0) as u64
}

fn response_code(body: &Value) -> Option<String> {
    match body.get("ResponseCode")? {
        Value::String(code) => Some(code.trim().to_string()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}

/// `errorMessage`, then `ResponseDescription`, then a generic message.
fn rejection_message(body: &Value, status: StatusCode) -> String {
    body.get("errorMessage")
        .and_then(Value::as_str)
        .or_else(|| body.get("ResponseDescription").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("M-Pesa rejected the request (HTTP {})", status.as_u16()))
}

impl MpesaService {
    pub fn new(config: Arc<AppConfig>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(MpesaService {
            config,
            client,
            cached_tokens: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn provider_timestamp(&self) -> Result<String> {
        let offset = self.config.provider_offset()?;
        Ok(Utc::now().with_timezone(&offset).format("%Y%m%d%H%M%S").to_string())
    }

    pub async fn get_access_token(&self, environment: Environment) -> Result<AccessToken> {
        let credentials = self.config.credentials(environment)?;

        if self.config.cache_tokens {
            let cached = self.cached_tokens.read().await;
            if let Some(entry) = cached.get(&environment) {
                if entry.valid_until > Utc::now() {
                    info!("Using cached {} access token", environment);
                    return Ok(entry.token.clone());
                }
            }
        }

        info!("Requesting new {} access token", environment);
        let auth_url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url(environment)
        );

        let response = self
            .client
            .get(&auth_url)
            .header(
                header::AUTHORIZATION,
                basic_auth(&credentials.consumer_key, &credentials.consumer_secret),
            )
            .send()
            .await
            .map_err(|e| {
                error!("Token request failed: {}", e);
                AppError::UpstreamAuth { status: None, body: e.to_string() }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::UpstreamAuth { status: Some(status.as_u16()), body: e.to_string() })?;

        if !status.is_success() {
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::UpstreamAuth { status: Some(status.as_u16()), body });
        }

        let token: AccessToken = serde_json::from_str(&body).map_err(|e| {
            error!("Unreadable token response: {}", e);
            AppError::UpstreamAuth { status: Some(status.as_u16()), body: body.clone() }
        })?;

        if self.config.cache_tokens {
            let ttl = token.expires_in as i64 - TOKEN_EXPIRY_MARGIN_SECS;
            if ttl > 0 {
                let mut cached = self.cached_tokens.write().await;
                cached.insert(
                    environment,
                    CachedToken {
                        token: token.clone(),
                        valid_until: Utc::now() + chrono::Duration::seconds(ttl),
                    },
                );
            }
        }

        info!("Access token obtained for {}", environment);
        Ok(token)
    }

    /// Posts a signed request and returns the body when the provider accepted it.
    async fn submit<T: Serialize>(&self, environment: Environment, path: &str, request: &T) -> Result<Value> {
        let token = self.get_access_token(environment).await?;
        let url = format!("{}{}", self.config.base_url(environment), path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token.access_token)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("{} request failed: {}", path, e);
                AppError::upstream_payment(format!("M-Pesa request failed: {}", e))
            })?;

        let status = response.status();
        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if response_code(&body).as_deref() != Some("0") {
            let message = rejection_message(&body, status);
            warn!("{} rejected: {} - {}", path, status, message);
            return Err(AppError::UpstreamPayment(message));
        }

        Ok(body)
    }

    // C2B: Customer to Business
    pub async fn stk_push(&self, environment: Environment, push: StkPush<'_>) -> Result<StkPushResponse> {
        info!("C2B: STK push for {} - KSh {}", push.phone_number, push.amount);

        let credentials = self.config.credentials(environment)?;
        let short_code = credentials.short_code()?;
        let passkey = credentials.passkey()?;
        let timestamp = self.provider_timestamp()?;

        let stk_request = StkPushRequest {
            business_short_code: short_code.to_string(),
            password: generate_password(short_code, passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: whole_amount(push.amount),
            party_a: push.phone_number.to_string(),
            party_b: short_code.to_string(),
            phone_number: push.phone_number.to_string(),
            callback_url: self.config.callback_url("/callback"),
            account_reference: push.account_reference.to_string(),
            transaction_desc: push.transaction_desc.to_string(),
        };

        let body = self
            .submit(environment, "/mpesa/stkpush/v1/processrequest", &stk_request)
            .await?;
        let stk_response: StkPushResponse = serde_json::from_value(body)
            .map_err(|e| AppError::upstream_payment(format!("Unexpected STK push response: {}", e)))?;

        info!("C2B initiated: {}", stk_response.checkout_request_id);
        Ok(stk_response)
    }

    // B2C: Business to Customer
    pub async fn b2c_payment(&self, environment: Environment, payment: B2CPayment<'_>) -> Result<B2CResponse> {
        info!("B2C: Sending to {} - KSh {}", payment.phone_number, payment.amount);

        let credentials = self.config.credentials(environment)?;
        let b2c_request = B2CRequest {
            initiator_name: credentials.initiator_name()?.to_string(),
            security_credential: credentials.security_credential()?.to_string(),
            command_id: payment.command_id.as_str().to_string(),
            amount: whole_amount(payment.amount),
            party_a: credentials.short_code()?.to_string(),
            party_b: payment.phone_number.to_string(),
            remarks: payment.remarks.to_string(),
            queue_timeout_url: self.config.callback_url("/callback/timeout"),
            result_url: self.config.callback_url("/callback"),
            occasion: payment.occasion.to_string(),
        };

        let body = self
            .submit(environment, "/mpesa/b2c/v1/paymentrequest", &b2c_request)
            .await?;
        let b2c_response: B2CResponse = serde_json::from_value(body)
            .map_err(|e| AppError::upstream_payment(format!("Unexpected B2C response: {}", e)))?;

        info!("B2C initiated: {}", b2c_response.conversation_id);
        Ok(b2c_response)
    }

    pub async fn transaction_status(&self, environment: Environment, transaction_id: &str) -> Result<Value> {
        info!("Status query for {}", transaction_id);

        let credentials = self.config.credentials(environment)?;
        let status_request = TransactionStatusRequest {
            initiator: credentials.initiator_name()?.to_string(),
            security_credential: credentials.security_credential()?.to_string(),
            command_id: "TransactionStatusQuery".to_string(),
            transaction_id: transaction_id.to_string(),
            party_a: credentials.short_code()?.to_string(),
            identifier_type: "4".to_string(),
            result_url: self.config.callback_url("/callback/status"),
            queue_timeout_url: self.config.callback_url("/callback/timeout"),
            remarks: "Transaction status query".to_string(),
            occasion: String::new(),
        };

        self.submit(environment, "/mpesa/transactionstatus/v1/query", &status_request)
            .await
    }
}
