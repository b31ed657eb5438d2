//! Entities exchanged as JSON payloads.

use serde::{Deserialize, Serialize};

pub type Id = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    #[serde(default)]
    pub id: Option<Id>,
    pub ticket: String,
    pub price: f64,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default)]
    pub id: Option<Id>,
    pub first_name: String,
    #[serde(default)]
    pub patronymic: Option<String>,
    pub last_name: String,
}

/// A user account. `role` and `person` may be absent in login payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: Option<Id>,
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub person: Option<Person>,
}

/// Reference to an entity by id; other fields of the object are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: Id,
}

/// Two related values, encoded as `{"key": .., "value": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Pair<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Pair { key, value }
    }
}

fn non_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

impl Stock {
    pub fn is_valid(&self) -> bool {
        non_blank(&self.ticket)
            && self.ticket.chars().count() <= 5
            && self.price.is_finite()
            && self.price >= 0.0
    }
}

impl Company {
    pub fn is_valid(&self) -> bool {
        non_blank(&self.name) && self.name.chars().count() <= 50
    }
}

impl Person {
    pub fn is_valid(&self) -> bool {
        non_blank(&self.first_name) && non_blank(&self.last_name)
    }
}

impl User {
    /// Credentials present.
    pub fn is_valid(&self) -> bool {
        non_blank(&self.username) && non_blank(&self.password_hash)
    }

    /// Credentials, person and role all present.
    pub fn is_fully_valid(&self) -> bool {
        self.is_valid()
            && self.person.as_ref().is_some_and(Person::is_valid)
            && self.role.as_ref().is_some_and(|r| non_blank(&r.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_wire_names() {
        let user: User = serde_json::from_str(
            r#"{"username":"ann","passwordHash":"h","person":{"firstName":"Ann","lastName":"Lee"},"role":{"name":"USER"}}"#,
        )
        .unwrap();
        assert!(user.is_fully_valid());
        assert_eq!(user.person.unwrap().patronymic, None);
    }

    #[test]
    fn test_login_shape_is_partially_valid() {
        let user: User = serde_json::from_str(r#"{"username":"ann","passwordHash":"h"}"#).unwrap();
        assert!(user.is_valid());
        assert!(!user.is_fully_valid());
    }

    #[test]
    fn test_stock_validation() {
        let mut stock = Stock {
            id: None,
            ticket: "AAPL".into(),
            price: 10.0,
            amount: 5,
        };
        assert!(stock.is_valid());
        stock.ticket = "TOOLONG".into();
        assert!(!stock.is_valid());
        stock.ticket = "X".into();
        stock.price = -1.0;
        assert!(!stock.is_valid());
    }

    #[test]
    fn test_id_ref_ignores_other_fields() {
        let r: IdRef = serde_json::from_str(r#"{"id":3,"ticket":"AAPL","price":1.5}"#).unwrap();
        assert_eq!(r.id, 3);
    }
}
