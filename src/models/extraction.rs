use serde::{Deserialize, Serialize};

/// Classified intent of an incoming message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    OrderInquiry,
    InvoiceInquiry,
    ProductInquiry,
    GeneralInquiry,
    Other,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderInquiry => "order_inquiry",
            Self::InvoiceInquiry => "invoice_inquiry",
            Self::ProductInquiry => "product_inquiry",
            Self::GeneralInquiry => "general_inquiry",
            Self::Other => "other",
        }
    }
}

/// Customer identity as extracted from the message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedCustomer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Product attributes derived from a line item's text. Unknown keys from
/// the LLM are dropped at the extractor boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemAttributes {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub product_line: Option<String>,
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub width_mm: Option<f64>,
    #[serde(default)]
    pub height_mm: Option<f64>,
    #[serde(default)]
    pub thickness_mm: Option<f64>,
    #[serde(default)]
    pub length_m: Option<f64>,
    #[serde(default)]
    pub color: Option<String>,
}

/// A single requested item. The line-items array is the unit of identity:
/// all enrichment (candidates, matches, verification) attaches by index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub raw_name: String,
    #[serde(default)]
    pub raw_code: Option<String>,
    pub quantity: f64,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub attributes: ItemAttributes,
}

/// Structured interpretation of one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extraction {
    pub intent_type: IntentType,
    pub intent_confidence: f32,
    pub customer: ExtractedCustomer,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub order_ref: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_serializes_snake_case() {
        let json = serde_json::to_string(&IntentType::OrderInquiry).unwrap();
        assert_eq!(json, "\"order_inquiry\"");
    }

    #[test]
    fn line_item_defaults_optional_fields() {
        let item: LineItem =
            serde_json::from_str(r#"{"raw_name": "Duro Seal", "quantity": 3}"#).unwrap();
        assert_eq!(item.raw_name, "Duro Seal");
        assert!(item.raw_code.is_none());
        assert!(item.unit_price.is_none());
        assert_eq!(item.attributes, ItemAttributes::default());
    }

    #[test]
    fn extraction_roundtrip() {
        let ex = Extraction {
            intent_type: IntentType::OrderInquiry,
            intent_confidence: 0.92,
            customer: ExtractedCustomer {
                name: Some("Schur Star Systems GmbH".into()),
                ..Default::default()
            },
            line_items: vec![LineItem {
                raw_name: "L1520-457 doctor blade".into(),
                raw_code: Some("L1520-457".into()),
                quantity: 14.0,
                unit_price: None,
                attributes: ItemAttributes {
                    width_mm: Some(457.0),
                    ..Default::default()
                },
            }],
            order_ref: Some("PO-2024-117".into()),
            notes: None,
        };

        let json = serde_json::to_string(&ex).unwrap();
        let back: Extraction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ex);
    }
}
