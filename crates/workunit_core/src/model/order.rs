//! Order entity.

use crate::db::record::{ColumnDef, EntityDescriptor, Model, Record, RecordId, ValidationError};
use crate::db::store::{StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub static ORDERS: EntityDescriptor = EntityDescriptor {
    table: "orders",
    columns: &[
        ColumnDef::new("customer_id", "INTEGER NOT NULL REFERENCES customers(id)"),
        ColumnDef::new("amount", "REAL NOT NULL"),
        ColumnDef::new("status", "TEXT NOT NULL"),
        ColumnDef::new("created_at", "INTEGER NOT NULL DEFAULT 0"),
    ],
    indexes: &["customer_id"],
    relations: &[],
};

/// Fulfilment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Paid,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Paid => "PAID",
            Self::Shipped => "SHIPPED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(Self::New),
            "PAID" => Some(Self::Paid),
            "SHIPPED" => Some(Self::Shipped),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// An order placed by one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<RecordId>,
    pub customer_id: RecordId,
    pub amount: f64,
    pub status: OrderStatus,
    /// Epoch milliseconds, set on first write.
    pub created_at: i64,
}

impl Order {
    pub fn new(customer_id: RecordId, amount: f64) -> Self {
        Self {
            id: None,
            customer_id,
            amount,
            status: OrderStatus::New,
            created_at: 0,
        }
    }
}

impl Record for Order {
    fn descriptor(&self) -> &'static EntityDescriptor {
        &ORDERS
    }

    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.customer_id),
            Value::Real(self.amount),
            Value::Text(self.status.as_str().to_string()),
            Value::Integer(self.created_at),
        ]
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(ValidationError::new(
                "orders",
                "amount",
                format!("must be a non-negative number, got {}", self.amount),
            ));
        }
        Ok(())
    }

    fn touch(&mut self, now_ms: i64) {
        if self.created_at == 0 {
            self.created_at = now_ms;
        }
    }
}

impl Model for Order {
    fn entity() -> &'static EntityDescriptor {
        &ORDERS
    }

    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        let status_text: String = row.get("status")?;
        let status = OrderStatus::parse(&status_text).ok_or_else(|| {
            StoreError::InvalidData(format!("invalid order status `{status_text}` in orders.status"))
        })?;

        Ok(Self {
            id: Some(row.get("id")?),
            customer_id: row.get("customer_id")?,
            amount: row.get("amount")?,
            status,
            created_at: row.get("created_at")?,
        })
    }
}
