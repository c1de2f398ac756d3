//! The product entity.

use product_audit_core::event::ProductEvent;
use serde::{Deserialize, Serialize};

/// A catalogue product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Identifier assigned on creation
    pub id: String,
    /// Display name
    pub name: String,
    /// Catalogue code, unique across products
    pub code: String,
    /// Unit price
    pub price: f64,
    /// Model designation
    pub model: String,
    /// Product page URL
    pub url: String,
}

impl Product {
    /// Snapshot published with product events.
    #[must_use]
    pub fn event(&self) -> ProductEvent {
        ProductEvent {
            id: self.id.clone(),
            code: self.code.clone(),
            price: self.price,
        }
    }
}

/// Product fields supplied by a caller, without an id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductDraft {
    /// Display name
    pub name: String,
    /// Catalogue code
    pub code: String,
    /// Unit price
    pub price: f64,
    /// Model designation
    pub model: String,
    /// Product page URL
    pub url: String,
}

impl ProductDraft {
    /// Attach an id.
    #[must_use]
    pub fn with_id(self, id: impl Into<String>) -> Product {
        Product {
            id: id.into(),
            name: self.name,
            code: self.code,
            price: self.price,
            model: self.model,
            url: self.url,
        }
    }

    /// First problem with the draft, if any.
    #[must_use]
    pub fn problem(&self) -> Option<&'static str> {
        if self.name.trim().is_empty() {
            Some("name must not be empty")
        } else if self.code.trim().is_empty() {
            Some("code must not be empty")
        } else if !self.price.is_finite() || self.price < 0.0 {
            Some("price must be a non-negative number")
        } else {
            None
        }
    }
}
