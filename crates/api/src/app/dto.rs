use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use stockledger_core::{ProductId, UserId};
use stockledger_infra::OrderLine;
use stockledger_inventory::{
    InventoryItem, MovementLineRequest, MovementReference, MovementRequest, MovementSubType,
    MovementType, NewItem, ProductMeta, TrackingType,
};

#[derive(Debug, Deserialize)]
pub struct RegisterItemRequest {
    pub sku: String,
    /// Generated when omitted.
    #[serde(default)]
    pub product_id: Option<Uuid>,
    /// Display name recorded in the product catalog.
    #[serde(default)]
    pub name: Option<String>,
    pub min_quantity: u64,
    pub max_quantity: u64,
    #[serde(default)]
    pub tracking_type: Option<TrackingType>,
    pub cost_price: i64,
    pub selling_price: i64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl RegisterItemRequest {
    pub fn into_parts(self) -> (NewItem, Option<ProductMeta>) {
        let product_id = self
            .product_id
            .map(ProductId::from_uuid)
            .unwrap_or_default();
        let meta = self.name.map(|name| ProductMeta {
            name,
            sku: self.sku.clone(),
        });
        let new = NewItem {
            sku: self.sku,
            product_id,
            min_quantity: self.min_quantity,
            max_quantity: self.max_quantity,
            tracking_type: self.tracking_type.unwrap_or(TrackingType::None),
            cost_price: self.cost_price,
            selling_price: self.selling_price,
            category: self.category,
            location: self.location,
        };
        (new, meta)
    }
}

#[derive(Debug, Deserialize)]
pub struct ThresholdsRequest {
    pub min_quantity: u64,
    pub max_quantity: u64,
}

/// Movement request body; the creator comes from the actor header.
#[derive(Debug, Deserialize)]
pub struct MovementBody {
    pub movement_type: MovementType,
    pub sub_type: MovementSubType,
    pub lines: Vec<MovementLineRequest>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub reference: Option<MovementReference>,
    #[serde(default)]
    pub discount_amount: i64,
    #[serde(default)]
    pub allow_negative: bool,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub submit: bool,
}

impl MovementBody {
    pub fn into_request(self, created_by: UserId) -> MovementRequest {
        MovementRequest {
            movement_type: self.movement_type,
            sub_type: self.sub_type,
            lines: self.lines,
            created_by,
            order_id: self.order_id,
            reference: self.reference,
            discount_amount: self.discount_amount,
            allow_negative: self.allow_negative,
            note: self.note,
            submit: self.submit,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveAlertRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReserveOrderRequest {
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanExpiringQuery {
    /// Defaults to the server's current date.
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationsQuery {
    /// Only envelopes with a greater sequence number.
    #[serde(default)]
    pub after: Option<u64>,
}

/// Item as stored, plus what is sellable today.
pub fn item_to_json(item: &InventoryItem, today: NaiveDate) -> serde_json::Value {
    let mut value = serde_json::to_value(item).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "sellable_quantity".to_string(),
            serde_json::json!(item.sellable_quantity(today)),
        );
    }
    value
}
