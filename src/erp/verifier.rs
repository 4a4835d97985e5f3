//! Resolution of matched catalog ids against the live ERP.
//!
//! A verification miss is recorded, never fatal: the line item keeps its
//! local match and the overall result moves to requires-review.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::models::{
    CustomerMatch, CustomerResolution, ErpCustomerCheck, ErpItemCheck, ErpVerification,
    LineItemMatch,
};

use super::ErpClient;

const PRODUCT_MODEL: &str = "product.product";
const PARTNER_MODEL: &str = "res.partner";

pub struct ErpVerifier {
    erp: Arc<dyn ErpClient>,
}

impl ErpVerifier {
    pub fn new(erp: Arc<dyn ErpClient>) -> Self {
        Self { erp }
    }

    /// Verify every matched product id and the customer against the ERP.
    pub fn verify(
        &self,
        matches: &[LineItemMatch],
        customer_match: &CustomerMatch,
        extracted_customer_name: Option<&str>,
    ) -> ErpVerification {
        ErpVerification {
            items: self.verify_items(matches),
            customer: self.verify_customer(customer_match, extracted_customer_name),
        }
    }

    fn verify_items(&self, matches: &[LineItemMatch]) -> Vec<ErpItemCheck> {
        let chosen: Vec<(usize, i64)> = matches
            .iter()
            .filter_map(|m| m.chosen_product_id.map(|id| (m.line_index, id)))
            .collect();
        if chosen.is_empty() {
            return Vec::new();
        }

        let ids: Vec<i64> = chosen.iter().map(|(_, id)| *id).collect();
        let rows = match self.erp.read(PRODUCT_MODEL, &ids, &["name", "list_price"]) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "ERP product read failed — recording misses");
                Vec::new()
            }
        };

        chosen
            .into_iter()
            .map(|(line_index, product_id)| {
                let row = rows
                    .iter()
                    .find(|r| r.get("id").and_then(Value::as_i64) == Some(product_id));
                ErpItemCheck {
                    line_index,
                    product_id,
                    exists: row.is_some(),
                    erp_name: row
                        .and_then(|r| r.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    list_price: row.and_then(|r| r.get("list_price")).and_then(Value::as_f64),
                }
            })
            .collect()
    }

    /// Prefer the locally matched ERP id; fall back to a normalized name
    /// search.
    fn verify_customer(
        &self,
        customer_match: &CustomerMatch,
        extracted_name: Option<&str>,
    ) -> ErpCustomerCheck {
        if let Some(local_id) = customer_match.customer_id {
            match self.erp.read(PARTNER_MODEL, &[local_id], &["name"]) {
                Ok(rows) if !rows.is_empty() => {
                    return ErpCustomerCheck {
                        verified: true,
                        erp_id: Some(local_id),
                        resolved_by: CustomerResolution::LocalId,
                    };
                }
                Ok(_) => {
                    tracing::warn!(local_id, "Locally matched customer id missing in ERP");
                }
                Err(e) => {
                    tracing::warn!(local_id, error = %e, "ERP customer read failed");
                }
            }
        }

        let name = customer_match
            .matched_name
            .as_deref()
            .or(extracted_name)
            .map(str::trim)
            .filter(|n| !n.is_empty());

        if let Some(name) = name {
            let domain = json!([["name", "ilike", name]]);
            match self
                .erp
                .search_read(PARTNER_MODEL, &domain, &["name"], 0, 1)
            {
                Ok(rows) => {
                    if let Some(id) = rows.first().and_then(|r| r.get("id")).and_then(Value::as_i64)
                    {
                        return ErpCustomerCheck {
                            verified: true,
                            erp_id: Some(id),
                            resolved_by: CustomerResolution::NameSearch,
                        };
                    }
                }
                Err(e) => {
                    tracing::warn!(name, error = %e, "ERP customer name search failed");
                }
            }
        }

        ErpCustomerCheck {
            verified: false,
            erp_id: None,
            resolved_by: CustomerResolution::Unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erp::MockErp;
    use crate::models::MatchMethod;

    fn matched(line_index: usize, product_id: i64) -> LineItemMatch {
        LineItemMatch {
            line_index,
            candidates: vec![],
            chosen_product_id: Some(product_id),
            confidence: 1.0,
            method: MatchMethod::ExactCode,
            requires_review: false,
        }
    }

    fn erp_with_product(id: i64) -> Arc<MockErp> {
        let erp = Arc::new(MockErp::new());
        erp.insert(
            "product.product",
            json!({"id": id, "name": "Doctor blade", "list_price": 42.5}),
        );
        erp
    }

    #[test]
    fn existing_products_verified_with_prices() {
        let erp = erp_with_product(8653);
        let verifier = ErpVerifier::new(erp);

        let v = verifier.verify(
            &[matched(0, 8653)],
            &CustomerMatch::default(),
            None,
        );
        assert_eq!(v.items.len(), 1);
        assert!(v.items[0].exists);
        assert_eq!(v.items[0].list_price, Some(42.5));
        assert_eq!(v.items[0].erp_name.as_deref(), Some("Doctor blade"));
    }

    #[test]
    fn missing_product_is_recorded_not_fatal() {
        let erp = Arc::new(MockErp::new());
        let verifier = ErpVerifier::new(erp);

        let v = verifier.verify(&[matched(0, 999)], &CustomerMatch::default(), None);
        assert_eq!(v.items.len(), 1);
        assert!(!v.items[0].exists);
        assert!(!v.all_verified());
    }

    #[test]
    fn unmatched_lines_are_skipped() {
        let erp = erp_with_product(1);
        let verifier = ErpVerifier::new(erp);

        let v = verifier.verify(
            &[LineItemMatch::unmatched(0)],
            &CustomerMatch::default(),
            None,
        );
        assert!(v.items.is_empty());
    }

    #[test]
    fn customer_verified_by_local_id() {
        let erp = Arc::new(MockErp::new());
        erp.insert("res.partner", json!({"id": 77, "name": "Schur"}));
        let verifier = ErpVerifier::new(erp);

        let v = verifier.verify(
            &[],
            &CustomerMatch {
                customer_id: Some(77),
                matched_name: Some("Schur".into()),
                confidence: 1.0,
            },
            None,
        );
        assert!(v.customer.verified);
        assert_eq!(v.customer.erp_id, Some(77));
        assert_eq!(v.customer.resolved_by, CustomerResolution::LocalId);
    }

    #[test]
    fn customer_falls_back_to_name_search() {
        let erp = Arc::new(MockErp::new());
        erp.insert("res.partner", json!({"id": 5, "name": "Schur Star Systems GmbH"}));
        let verifier = ErpVerifier::new(erp);

        let v = verifier.verify(
            &[],
            &CustomerMatch::default(),
            Some("schur star systems"),
        );
        assert!(v.customer.verified);
        assert_eq!(v.customer.erp_id, Some(5));
        assert_eq!(v.customer.resolved_by, CustomerResolution::NameSearch);
    }

    #[test]
    fn unresolvable_customer_recorded() {
        let erp = Arc::new(MockErp::new());
        let verifier = ErpVerifier::new(erp);

        let v = verifier.verify(&[], &CustomerMatch::default(), Some("Unknown AG"));
        assert!(!v.customer.verified);
        assert_eq!(v.customer.resolved_by, CustomerResolution::Unresolved);
    }

    #[test]
    fn transport_failure_degrades_to_misses() {
        let erp = Arc::new(MockErp::new());
        erp.insert("product.product", json!({"id": 1, "name": "x"}));
        erp.set_fail_transport(true);
        let verifier = ErpVerifier::new(erp);

        let v = verifier.verify(&[matched(0, 1)], &CustomerMatch::default(), Some("Acme"));
        assert!(!v.items[0].exists);
        assert!(!v.customer.verified);
    }
}
