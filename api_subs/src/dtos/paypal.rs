use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub transaction_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CaptureOrderRequest {
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub transaction_id: Uuid,
    pub order_id: String,
    pub approve_url: String,
}

// PayPal REST payloads

#[derive(Debug, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
}

#[derive(Debug, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub purchase_units: Vec<PurchaseUnit>,
}

impl Order {
    /// Where the buyer approves the payment.
    pub fn approve_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.as_str())
    }

    /// Ids of the captures recorded on the order.
    pub fn capture_ids(&self) -> Vec<&str> {
        self.purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|payments| payments.captures.iter())
            .filter(|capture| capture.status == "COMPLETED")
            .map(|capture| capture.id.as_str())
            .collect()
    }

    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }

    /// The transaction id sent as `custom_id` when the order was created.
    pub fn custom_id(&self) -> Option<&str> {
        self.purchase_units.iter().find_map(|unit| {
            unit.custom_id.as_deref().or_else(|| {
                unit.payments
                    .as_ref()
                    .and_then(|p| p.captures.iter().find_map(|c| c.custom_id.as_deref()))
            })
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PurchaseUnit {
    pub custom_id: Option<String>,
    pub payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
pub struct Payments {
    #[serde(default)]
    pub captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
pub struct Capture {
    pub id: String,
    pub status: String,
    pub custom_id: Option<String>,
}
