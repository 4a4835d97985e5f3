use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A product row from the ERP. `id` is the ERP-assigned integer and is
/// unique within the catalog. Source data may carry trailing whitespace
/// on `code`; the catalog store trims on ingest and on compare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub list_price: f64,
    #[serde(default)]
    pub standard_price: f64,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

impl Product {
    /// Trimmed product code, if any.
    pub fn trimmed_code(&self) -> Option<&str> {
        self.code.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

/// A customer row from the ERP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: i64,
    #[serde(default, rename = "ref")]
    pub customer_ref: Option<String>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}
