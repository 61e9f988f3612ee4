//! Subject description consumed from the product-catalog collaborator
//!
//! The broker only consumes the stable subject id plus the descriptive
//! fields used to build the non-cacheable prompt segment; extraction and
//! storage of products live outside this crate.

use serde::{Deserialize, Serialize};

/// Product fields as supplied by the external catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDetails {
    /// Stable identifier owned by the catalog (e.g. a database row id).
    pub id: i64,

    pub title: String,
    pub price: f64,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub materials: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub colors: Vec<String>,

    #[serde(default)]
    pub sizes: Vec<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}
