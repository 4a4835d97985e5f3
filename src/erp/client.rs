//! ERP RPC access: the narrow interface the pipeline consumes, an
//! Odoo-style JSON-RPC production client, and an in-memory mock with a
//! small domain evaluator for tests.

use std::sync::Mutex;

use serde_json::{json, Value};

use super::ErpError;

/// The three operations the system needs from the ERP.
///
/// Timestamp inequality predicates must use naive UTC strings
/// (`%Y-%m-%d %H:%M:%S`, no offset suffix) — the server rejects offsets.
pub trait ErpClient: Send + Sync {
    fn search_read(
        &self,
        model: &str,
        domain: &Value,
        fields: &[&str],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, ErpError>;

    fn create(&self, model: &str, values: &Value) -> Result<i64, ErpError>;

    fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Value>, ErpError>;
}

/// Odoo-style JSON-RPC client (`/jsonrpc`, `execute_kw`).
pub struct JsonRpcErp {
    url: String,
    db: String,
    user: String,
    password: String,
    client: reqwest::blocking::Client,
    /// uid from `common.login`, resolved lazily on first call.
    uid: Mutex<Option<i64>>,
}

impl JsonRpcErp {
    pub fn new(url: &str, db: &str, user: &str, password: &str, timeout_secs: u64) -> Result<Self, ErpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ErpError::Transport(e.to_string()))?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            db: db.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            client,
            uid: Mutex::new(None),
        })
    }

    fn rpc(&self, service: &str, method: &str, args: Value) -> Result<Value, ErpError> {
        let endpoint = format!("{}/jsonrpc", self.url);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": 1,
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    ErpError::Connection(self.url.clone())
                } else {
                    ErpError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ErpError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Value = response
            .json()
            .map_err(|e| ErpError::Decode(e.to_string()))?;

        if let Some(err) = parsed.get("error") {
            return Err(ErpError::Rpc(err.to_string()));
        }

        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }

    fn uid(&self) -> Result<i64, ErpError> {
        let mut guard = self.uid.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(uid) = *guard {
            return Ok(uid);
        }

        let result = self.rpc(
            "common",
            "login",
            json!([self.db, self.user, self.password]),
        )?;
        let uid = result
            .as_i64()
            .filter(|&u| u > 0)
            .ok_or_else(|| ErpError::Auth(self.db.clone()))?;

        tracing::info!(db = %self.db, uid, "ERP session authenticated");
        *guard = Some(uid);
        Ok(uid)
    }

    fn execute_kw(&self, model: &str, method: &str, args: Value, kwargs: Value) -> Result<Value, ErpError> {
        let uid = self.uid()?;
        self.rpc(
            "object",
            "execute_kw",
            json!([self.db, uid, self.password, model, method, args, kwargs]),
        )
    }
}

impl ErpClient for JsonRpcErp {
    fn search_read(
        &self,
        model: &str,
        domain: &Value,
        fields: &[&str],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, ErpError> {
        let result = self.execute_kw(
            model,
            "search_read",
            json!([domain]),
            json!({ "fields": fields, "offset": offset, "limit": limit, "order": "id asc" }),
        )?;
        result
            .as_array()
            .cloned()
            .ok_or_else(|| ErpError::Decode(format!("search_read({model}) did not return a list")))
    }

    fn create(&self, model: &str, values: &Value) -> Result<i64, ErpError> {
        let result = self.execute_kw(model, "create", json!([values]), json!({}))?;
        result
            .as_i64()
            .ok_or_else(|| ErpError::Decode(format!("create({model}) did not return an id")))
    }

    fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Value>, ErpError> {
        let result = self.execute_kw(model, "read", json!([ids]), json!({ "fields": fields }))?;
        result
            .as_array()
            .cloned()
            .ok_or_else(|| ErpError::Decode(format!("read({model}) did not return a list")))
    }
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// In-memory ERP for tests. Evaluates the subset of the domain syntax the
/// system uses: leaf `[field, op, value]` with `>`, `=`, `ilike`, and the
/// prefix `|` disjunction.
pub struct MockErp {
    records: Mutex<std::collections::HashMap<String, Vec<Value>>>,
    next_id: Mutex<i64>,
    fail_transport: Mutex<bool>,
}

impl MockErp {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(std::collections::HashMap::new()),
            next_id: Mutex::new(1000),
            fail_transport: Mutex::new(false),
        }
    }

    pub fn insert(&self, model: &str, record: Value) {
        self.records
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push(record);
    }

    /// Make every call fail with a transport error.
    pub fn set_fail_transport(&self, fail: bool) {
        *self.fail_transport.lock().unwrap() = fail;
    }

    pub fn records_for(&self, model: &str) -> Vec<Value> {
        self.records
            .lock()
            .unwrap()
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    fn check_transport(&self) -> Result<(), ErpError> {
        if *self.fail_transport.lock().unwrap() {
            return Err(ErpError::Transport("mock transport failure".into()));
        }
        Ok(())
    }
}

impl Default for MockErp {
    fn default() -> Self {
        Self::new()
    }
}

impl ErpClient for MockErp {
    fn search_read(
        &self,
        model: &str,
        domain: &Value,
        fields: &[&str],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, ErpError> {
        self.check_transport()?;
        let records = self.records_for(model);
        let matched: Vec<Value> = records
            .into_iter()
            .filter(|r| eval_domain(domain, r))
            .skip(offset)
            .take(limit)
            .map(|r| project(&r, fields))
            .collect();
        Ok(matched)
    }

    fn create(&self, model: &str, values: &Value) -> Result<i64, ErpError> {
        self.check_transport()?;
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next += 1;

        let mut record = values.clone();
        if let Some(obj) = record.as_object_mut() {
            obj.insert("id".into(), json!(id));
        }
        self.insert(model, record);
        Ok(id)
    }

    fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Value>, ErpError> {
        self.check_transport()?;
        let records = self.records_for(model);
        Ok(records
            .into_iter()
            .filter(|r| r.get("id").and_then(Value::as_i64).is_some_and(|id| ids.contains(&id)))
            .map(|r| project(&r, fields))
            .collect())
    }
}

/// Evaluate an Odoo-style domain against a record: polish-notation
/// expressions joined by an implicit AND.
fn eval_domain(domain: &Value, record: &Value) -> bool {
    let Some(terms) = domain.as_array() else {
        return true;
    };

    let mut acc = true;
    let mut pos = 0;
    while pos < terms.len() {
        let (result, consumed) = eval_expr(&terms[pos..], record);
        acc = acc && result;
        pos += consumed.max(1);
    }
    acc
}

/// Parse one expression: a `|` disjunction of the next two expressions,
/// or a `[field, op, value]` leaf. Returns (result, terms consumed).
fn eval_expr(terms: &[Value], record: &Value) -> (bool, usize) {
    let Some(first) = terms.first() else {
        return (true, 0);
    };

    if first.as_str() == Some("|") {
        let (lhs, used_l) = eval_expr(&terms[1..], record);
        let (rhs, used_r) = eval_expr(&terms[1 + used_l..], record);
        return (lhs || rhs, 1 + used_l + used_r);
    }

    // Leaf: [field, op, value]
    let result = first.as_array().is_some_and(|triple| {
        let (Some(field), Some(op)) = (
            triple.first().and_then(Value::as_str),
            triple.get(1).and_then(Value::as_str),
        ) else {
            return false;
        };
        let expected = triple.get(2).cloned().unwrap_or(Value::Null);
        let actual = record.get(field).cloned().unwrap_or(Value::Null);
        eval_leaf(&actual, op, &expected)
    });
    (result, 1)
}

fn eval_leaf(actual: &Value, op: &str, expected: &Value) -> bool {
    match op {
        "=" => actual == expected,
        ">" => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => a > b,
            _ => match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
        },
        "ilike" => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => a.to_lowercase().contains(&b.to_lowercase()),
            _ => false,
        },
        _ => false,
    }
}

fn project(record: &Value, fields: &[&str]) -> Value {
    if fields.is_empty() {
        return record.clone();
    }
    let mut out = serde_json::Map::new();
    if let Some(id) = record.get("id") {
        out.insert("id".into(), id.clone());
    }
    for field in fields {
        if let Some(v) = record.get(*field) {
            out.insert((*field).to_string(), v.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_search_read_filters_by_equality() {
        let erp = MockErp::new();
        erp.insert("res.partner", json!({"id": 1, "name": "Acme"}));
        erp.insert("res.partner", json!({"id": 2, "name": "Schur"}));

        let rows = erp
            .search_read(
                "res.partner",
                &json!([["name", "=", "Schur"]]),
                &["name"],
                0,
                10,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(2));
    }

    #[test]
    fn mock_or_domain_on_dates() {
        let erp = MockErp::new();
        erp.insert(
            "product.product",
            json!({"id": 1, "create_date": "2024-01-01 00:00:00", "write_date": "2024-01-01 00:00:00"}),
        );
        erp.insert(
            "product.product",
            json!({"id": 2, "create_date": "2024-01-01 00:00:00", "write_date": "2024-03-01 12:00:00"}),
        );

        let domain = json!([
            "|",
            ["create_date", ">", "2024-02-01 00:00:00"],
            ["write_date", ">", "2024-02-01 00:00:00"]
        ]);
        let rows = erp
            .search_read("product.product", &domain, &[], 0, 100)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(2));
    }

    #[test]
    fn implicit_and_between_leaves() {
        let erp = MockErp::new();
        erp.insert("res.partner", json!({"id": 1, "name": "Schur", "city": "Flensburg"}));
        erp.insert("res.partner", json!({"id": 2, "name": "Schur", "city": "Wien"}));

        let rows = erp
            .search_read(
                "res.partner",
                &json!([["name", "=", "Schur"], ["city", "=", "Wien"]]),
                &[],
                0,
                10,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(2));
    }

    #[test]
    fn or_domain_false_when_both_false() {
        let erp = MockErp::new();
        erp.insert("product.product", json!({"id": 1, "create_date": "2024-01-01 00:00:00", "write_date": "2024-01-01 00:00:00"}));

        let domain = json!([
            "|",
            ["create_date", ">", "2024-02-01 00:00:00"],
            ["write_date", ">", "2024-02-01 00:00:00"]
        ]);
        let rows = erp
            .search_read("product.product", &domain, &[], 0, 100)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn mock_ilike_is_case_insensitive_contains() {
        let erp = MockErp::new();
        erp.insert("res.partner", json!({"id": 1, "name": "Schur Flexibles GmbH"}));

        let rows = erp
            .search_read(
                "res.partner",
                &json!([["name", "ilike", "schur flexibles"]]),
                &["name"],
                0,
                10,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn mock_create_assigns_ids() {
        let erp = MockErp::new();
        let id1 = erp.create("sale.order", &json!({"partner_id": 5})).unwrap();
        let id2 = erp.create("sale.order", &json!({"partner_id": 5})).unwrap();
        assert!(id2 > id1);

        let rows = erp.read("sale.order", &[id1], &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["partner_id"], json!(5));
    }

    #[test]
    fn mock_read_projects_fields() {
        let erp = MockErp::new();
        erp.insert(
            "product.product",
            json!({"id": 8, "name": "Blade", "default_code": "L1", "list_price": 4.5}),
        );
        let rows = erp.read("product.product", &[8], &["name"]).unwrap();
        assert_eq!(rows[0].get("list_price"), None);
        assert_eq!(rows[0]["name"], json!("Blade"));
    }

    #[test]
    fn transport_failure_mode() {
        let erp = MockErp::new();
        erp.set_fail_transport(true);
        let err = erp
            .search_read("res.partner", &json!([]), &[], 0, 1)
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn offset_and_limit_paginate() {
        let erp = MockErp::new();
        for i in 0..5 {
            erp.insert("product.product", json!({"id": i, "name": format!("p{i}")}));
        }
        let page = erp
            .search_read("product.product", &json!([]), &[], 2, 2)
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["id"], json!(2));
    }
}
