// src/payments.rs
use crate::engine::UsageEngine;
use crate::error::{Error, Result};
use crate::models::{MobileNetwork, Payment, PaymentStatus, Plan};
use crate::subscription::{DEFAULT_PLAN_DAYS, UpgradeTerms};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

/// What the provider hands back when a collection request is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub transaction_id: String,
    pub provider_reference: String,
}

#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    async fn request_payment(
        &self,
        network: MobileNetwork,
        phone_number: &str,
        amount_cents: i64,
    ) -> Result<GatewayReceipt>;

    async fn check_status(&self, transaction_id: &str) -> Result<PaymentStatus>;
}

/// Stand-in provider: accepts every request and settles it on the first check.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedGateway;

impl MobileNetwork {
    fn prefix(self) -> &'static str {
        match self {
            MobileNetwork::Mtn => "MTN",
            MobileNetwork::Airtel => "AIRTEL",
        }
    }

    fn accepted_prefixes(self) -> &'static [&'static str] {
        match self {
            MobileNetwork::Mtn => &["2567", "077"],
            MobileNetwork::Airtel => &["2567", "075", "070"],
        }
    }
}

#[async_trait]
impl MobileMoneyGateway for SimulatedGateway {
    async fn request_payment(
        &self,
        network: MobileNetwork,
        phone_number: &str,
        amount_cents: i64,
    ) -> Result<GatewayReceipt> {
        let reference: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(8)
            .collect::<String>()
            .to_uppercase();
        let prefix = network.prefix();
        tracing::info!(
            network = prefix,
            amount_cents,
            "Simulated collection request for {}",
            phone_number
        );
        Ok(GatewayReceipt {
            transaction_id: format!("{prefix}_{reference}"),
            provider_reference: format!("{prefix}REF{reference}"),
        })
    }

    async fn check_status(&self, _transaction_id: &str) -> Result<PaymentStatus> {
        Ok(PaymentStatus::Completed)
    }
}

/// Only the digits of `number` are considered.
pub fn validate_phone_number(number: &str, network: MobileNetwork) -> bool {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 10 && digits.len() != 12 {
        return false;
    }
    network
        .accepted_prefixes()
        .iter()
        .any(|prefix| digits.starts_with(prefix))
}

pub async fn initiate_payment(
    engine: &UsageEngine,
    gateway: &dyn MobileMoneyGateway,
    principal: Uuid,
    plan: Plan,
    network: MobileNetwork,
    phone_number: &str,
) -> Result<Payment> {
    let amount_cents = plan
        .price_cents()
        .ok_or_else(|| Error::BadRequest("the free plan cannot be purchased".into()))?;
    if !validate_phone_number(phone_number, network) {
        return Err(Error::BadRequest(format!(
            "invalid {} phone number",
            network.prefix()
        )));
    }
    engine
        .store()
        .get_user(principal)
        .await?
        .ok_or_else(|| Error::not_found("user", principal))?;

    let receipt = gateway
        .request_payment(network, phone_number, amount_cents)
        .await?;
    let payment = Payment {
        id: Uuid::new_v4(),
        user_id: principal,
        plan,
        amount_cents,
        network,
        phone_number: phone_number.to_string(),
        transaction_id: receipt.transaction_id,
        provider_reference: receipt.provider_reference,
        status: PaymentStatus::Pending,
        created_at: Utc::now(),
        completed_at: None,
    };
    engine.store().create_payment(&payment).await?;
    tracing::info!(
        user_id = %principal,
        transaction_id = %payment.transaction_id,
        amount_cents,
        "Payment initiated"
    );
    Ok(payment)
}

/// Polls the gateway for a pending payment and settles it.
///
/// Completion and the upgrade commit together, so a failed settlement leaves
/// the payment pending for the next check.
pub async fn check_payment_status(
    engine: &UsageEngine,
    gateway: &dyn MobileMoneyGateway,
    principal: Uuid,
    transaction_id: &str,
) -> Result<Payment> {
    let store = engine.store();
    let payment = match store.get_payment(transaction_id).await? {
        Some(p) if p.user_id == principal => p,
        _ => return Err(Error::not_found("payment", transaction_id)),
    };
    if payment.status != PaymentStatus::Pending {
        return Ok(payment);
    }

    match gateway.check_status(transaction_id).await? {
        PaymentStatus::Pending => return Ok(payment),
        PaymentStatus::Completed => {
            let now = Utc::now();
            let terms = UpgradeTerms::new(payment.plan, DEFAULT_PLAN_DAYS, now)?;
            if let Some(sub) = store
                .complete_payment_and_upgrade(transaction_id, now, &terms)
                .await?
            {
                tracing::info!(
                    user_id = %principal,
                    %transaction_id,
                    plan = sub.plan.display_name(),
                    "Payment completed"
                );
            }
        }
        PaymentStatus::Failed => {
            if store.fail_payment(transaction_id).await? {
                tracing::warn!(user_id = %principal, %transaction_id, "Payment failed");
            }
        }
    }

    store
        .get_payment(transaction_id)
        .await?
        .ok_or_else(|| Error::not_found("payment", transaction_id))
}
