//! Customer entity.
//!
//! # Invariants
//! - `name` is non-blank and at most 200 characters.
//! - `email` is unique across customers and at most 255 characters.
//! - `orders` is only populated by preloading the `orders` relation.

use super::order::Order;
use crate::db::record::{
    ColumnDef, EntityDescriptor, Model, Record, RecordId, RelationLoader, ValidationError,
};
use crate::db::store::{StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub static CUSTOMERS: EntityDescriptor = EntityDescriptor {
    table: "customers",
    columns: &[
        ColumnDef::new("name", "TEXT NOT NULL"),
        ColumnDef::new("email", "TEXT NOT NULL UNIQUE"),
        ColumnDef::new("created_at", "INTEGER NOT NULL DEFAULT 0"),
        ColumnDef::new("updated_at", "INTEGER NOT NULL DEFAULT 0"),
    ],
    indexes: &[],
    relations: &[ORDERS_RELATION],
};

/// Relation name for a customer's orders.
pub const ORDERS_RELATION: &str = "orders";

const MAX_NAME_CHARS: usize = 200;
const MAX_EMAIL_CHARS: usize = 255;

/// A customer with one-to-many orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Option<RecordId>,
    pub name: String,
    pub email: String,
    /// Epoch milliseconds, set on first write.
    pub created_at: i64,
    /// Epoch milliseconds, refreshed on every write.
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<Order>,
}

impl Customer {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: email.into(),
            created_at: 0,
            updated_at: 0,
            orders: Vec::new(),
        }
    }
}

impl Record for Customer {
    fn descriptor(&self) -> &'static EntityDescriptor {
        &CUSTOMERS
    }

    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            Value::Text(self.email.clone()),
            Value::Integer(self.created_at),
            Value::Integer(self.updated_at),
        ]
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("customers", "name", "must not be blank"));
        }
        if self.name.chars().count() > MAX_NAME_CHARS {
            return Err(ValidationError::new(
                "customers",
                "name",
                format!("must be at most {MAX_NAME_CHARS} characters"),
            ));
        }
        if self.email.chars().count() > MAX_EMAIL_CHARS {
            return Err(ValidationError::new(
                "customers",
                "email",
                format!("must be at most {MAX_EMAIL_CHARS} characters"),
            ));
        }
        Ok(())
    }

    fn touch(&mut self, now_ms: i64) {
        if self.created_at == 0 {
            self.created_at = now_ms;
        }
        self.updated_at = now_ms;
    }
}

impl Model for Customer {
    fn entity() -> &'static EntityDescriptor {
        &CUSTOMERS
    }

    fn from_row(row: &Row<'_>) -> StoreResult<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            name: row.get("name")?,
            email: row.get("email")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            orders: Vec::new(),
        })
    }

    fn preload(&mut self, relation: &str, loader: &RelationLoader<'_>) -> StoreResult<()> {
        match (relation, self.id) {
            (ORDERS_RELATION, Some(id)) => {
                self.orders = loader.children::<Order>("customer_id", id)?;
                Ok(())
            }
            (ORDERS_RELATION, None) => Err(StoreError::MissingId { table: "customers" }),
            _ => Err(StoreError::UnknownRelation {
                table: "customers",
                relation: relation.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Customer;
    use crate::db::record::Record;

    #[test]
    fn blank_name_fails_validation() {
        let customer = Customer::new("   ", "blank@example.com");
        assert_eq!(customer.validate().unwrap_err().field, "name");
    }

    #[test]
    fn overlong_email_fails_validation() {
        let customer = Customer::new("Ada", format!("{}@example.com", "a".repeat(250)));
        assert_eq!(customer.validate().unwrap_err().field, "email");
    }

    #[test]
    fn touch_refreshes_updated_at_but_keeps_created_at() {
        let mut customer = Customer::new("Ada", "ada@example.com");
        customer.touch(10);
        customer.touch(20);
        assert_eq!(customer.created_at, 10);
        assert_eq!(customer.updated_at, 20);
    }
}
