//! Invoice lookups scoped to the verified customer
//!
//! None of these tools accept a customer id argument: the account comes from
//! the `ToolContext`, so the model can only read the verified customer's data.

use std::sync::Arc;

use async_trait::async_trait;
use chorus_agent::{Tool, ToolContext, ToolResult};
use serde_json::json;

use super::render_rows;
use crate::catalog::Catalog;

fn verified_customer(ctx: &ToolContext) -> Result<i64, ToolResult> {
    let account = ctx
        .account_id
        .as_deref()
        .ok_or_else(|| ToolResult::error("No verified customer account for this conversation."))?;
    account
        .parse()
        .map_err(|_| ToolResult::error(format!("Account id '{account}' is not a customer id.")))
}

/// The customer's invoices, newest first
pub struct InvoicesByDateTool {
    catalog: Arc<Catalog>,
}

impl InvoicesByDateTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for InvoicesByDateTool {
    fn name(&self) -> &str {
        "get_invoices_by_customer_sorted_by_date"
    }

    fn description(&self) -> &str {
        "List the customer's invoices, most recent first."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let customer_id = match verified_customer(ctx) {
            Ok(id) => id,
            Err(result) => return result,
        };
        render_rows(
            self.catalog.invoices_by_date(customer_id),
            "The customer has no invoices.",
        )
    }
}

/// The customer's invoice lines, most expensive first
pub struct InvoicesByUnitPriceTool {
    catalog: Arc<Catalog>,
}

impl InvoicesByUnitPriceTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for InvoicesByUnitPriceTool {
    fn name(&self) -> &str {
        "get_invoices_sorted_by_unit_price"
    }

    fn description(&self) -> &str {
        "List the customer's invoices ordered by the unit price of their lines, highest first."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let customer_id = match verified_customer(ctx) {
            Ok(id) => id,
            Err(result) => return result,
        };
        render_rows(
            self.catalog.invoices_by_unit_price(customer_id),
            "The customer has no invoices.",
        )
    }
}

/// Support representative attached to one of the customer's invoices
pub struct EmployeeByInvoiceTool {
    catalog: Arc<Catalog>,
}

impl EmployeeByInvoiceTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for EmployeeByInvoiceTool {
    fn name(&self) -> &str {
        "get_employee_by_invoice_and_customer"
    }

    fn description(&self) -> &str {
        "Find the support employee associated with one of the customer's invoices."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "invoice_id": { "type": "integer", "description": "Invoice id" }
            },
            "required": ["invoice_id"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let customer_id = match verified_customer(ctx) {
            Ok(id) => id,
            Err(result) => return result,
        };
        let Some(invoice_id) = arguments.get("invoice_id").and_then(|v| v.as_i64()) else {
            return ToolResult::error("Missing 'invoice_id' argument");
        };
        render_rows(
            self.catalog.employee_for_invoice(invoice_id, customer_id),
            &format!("No employee found for invoice ID {invoice_id} and customer identifier {customer_id}."),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixture;

    fn ctx(account: &str) -> ToolContext {
        ToolContext::for_account(Some(account))
    }

    #[tokio::test]
    async fn test_invoices_use_verified_account() {
        let tool = InvoicesByDateTool::new(Arc::new(fixture::catalog()));
        let result = tool.execute(json!({}), &ctx("1")).await;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&result.text_content()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["InvoiceId"], 121);

        // Customer id smuggled into arguments is ignored
        let result = tool.execute(json!({"customer_id": 1}), &ctx("10")).await;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&result.text_content()).unwrap();
        assert!(rows.iter().all(|r| r["CustomerId"] == 10));
    }

    #[tokio::test]
    async fn test_unverified_context_is_rejected() {
        let tool = InvoicesByUnitPriceTool::new(Arc::new(fixture::catalog()));
        let result = tool.execute(json!({}), &ToolContext::default()).await;
        assert!(result.is_error);

        let result = tool.execute(json!({}), &ctx("not-a-number")).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_employee_lookup() {
        let tool = EmployeeByInvoiceTool::new(Arc::new(fixture::catalog()));
        let result = tool.execute(json!({"invoice_id": 25}), &ctx("10")).await;
        assert!(result.text_content().contains("Margaret"));

        let other = tool.execute(json!({"invoice_id": 98}), &ctx("10")).await;
        assert!(!other.is_error);
        assert!(other.text_content().starts_with("No employee found"));
    }
}
