use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub mod gateway;
pub mod reconcile;

pub use gateway::credentials::{CredentialStore, InMemoryCredentials, SessionSignal};
pub use gateway::{Gateway, GatewayConfig, GatewayError};
pub use reconcile::selection::{ItemKind, SelectionManager};
pub use reconcile::{FlowEvent, FlowState, ReconcileApi, ReconcileController, ReimbursableItem};

use gateway::GatewayError as GwError;

fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// The backend's uniform response envelope. Callers branch solely on
/// `success`; transport failures are folded into the same shape so a service
/// method has exactly one result type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        if self.success {
            self.data
                .ok_or_else(|| "Response was successful but carried no data.".to_string())
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "The request failed without an error message.".to_string()))
        }
    }
}

fn envelope<T>(op: &'static str, res: Result<ApiResponse<T>, GwError>) -> ApiResponse<T> {
    match res {
        Ok(env) => env,
        Err(e) => {
            let msg = e.to_string();
            eprintln!("[api] {{ op: {:?}, error: {:?} }}", op, msg);
            ApiResponse::err(msg)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

fn default_invoice_status() -> InvoiceStatus {
    InvoiceStatus::Draft
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceItem {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default)]
    pub discount_amount: Option<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    #[serde(rename = "client", alias = "client_id")]
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    pub issue_date: String,
    #[serde(default = "default_invoice_status")]
    pub status: InvoiceStatus,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub paid_at: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub subtotal: f64,
    pub total: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    #[serde(rename = "client")]
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    pub issue_date: String,
    #[serde(default)]
    pub due_date: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoicePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, rename = "client", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InvoiceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<InvoiceItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Invoice list filter. Discovery only ever needs the draft/client axes, so
/// those are the two the backend exposes as query parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub client: Option<String>,
}

impl InvoiceFilter {
    pub fn drafts() -> Self {
        Self {
            status: Some(InvoiceStatus::Draft),
            client: None,
        }
    }

    pub fn drafts_for_client(client_id: &str) -> Self {
        Self {
            status: Some(InvoiceStatus::Draft),
            client: Some(client_id.to_string()),
        }
    }

    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(status) = self.status {
            query.push(("status", status.as_str().to_string()));
        }
        if let Some(client) = &self.client {
            query.push(("client", client.clone()));
        }
        query
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expense {
    pub id: String,
    pub title: String,
    pub amount: f64,
    pub currency: String,
    pub date: String, // YYYY-MM-DD
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, rename = "client", alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub is_reimbursable: bool,
    #[serde(default)]
    pub is_invoiced: bool,
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl Expense {
    /// Eligible for the invoice-attach flow only while reimbursable and not
    /// yet invoiced.
    pub fn reimbursable(&self) -> Option<ReimbursableItem> {
        if !self.is_reimbursable || self.is_invoiced {
            return None;
        }
        Some(ReimbursableItem::Expense {
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            description: self.title.clone(),
            amount: self.amount,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExpense {
    pub title: String,
    pub amount: f64,
    pub currency: String,
    pub date: String, // YYYY-MM-DD
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, rename = "client")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub is_reimbursable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpensePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(default, rename = "client", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reimbursable: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MileageEntry {
    pub id: String,
    pub description: String,
    pub date: String, // YYYY-MM-DD
    pub miles: f64,
    #[serde(default)]
    pub rate: f64,
    pub amount: f64,
    #[serde(default, rename = "client", alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub is_reimbursable: bool,
    #[serde(default)]
    pub is_invoiced: bool,
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl MileageEntry {
    pub fn reimbursable(&self) -> Option<ReimbursableItem> {
        if !self.is_reimbursable || self.is_invoiced {
            return None;
        }
        Some(ReimbursableItem::Mileage {
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            description: self.description.clone(),
            amount: self.amount,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMileageEntry {
    pub description: String,
    pub date: String, // YYYY-MM-DD
    pub miles: f64,
    pub rate: f64,
    #[serde(default, rename = "client")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub is_reimbursable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MileagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miles: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, rename = "client", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reimbursable: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EstimateStatus {
    Draft,
    Sent,
    Accepted,
    Declined,
}

impl EstimateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimateStatus::Draft => "draft",
            EstimateStatus::Sent => "sent",
            EstimateStatus::Accepted => "accepted",
            EstimateStatus::Declined => "declined",
        }
    }
}

fn default_estimate_status() -> EstimateStatus {
    EstimateStatus::Draft
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Estimate {
    pub id: String,
    pub estimate_number: String,
    #[serde(rename = "client", alias = "client_id")]
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    pub issue_date: String,
    #[serde(default)]
    pub expiry_date: Option<String>,
    #[serde(default = "default_estimate_status")]
    pub status: EstimateStatus,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub subtotal: f64,
    pub total: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEstimate {
    #[serde(rename = "client")]
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    pub issue_date: String,
    #[serde(default)]
    pub expiry_date: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatePatch {
    #[serde(default, rename = "client", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EstimateStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<InvoiceItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub starts_at: String,
    pub ends_at: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "client", alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCalendarEvent {
    pub title: String,
    pub starts_at: String,
    pub ends_at: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "client")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarEventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(default, rename = "client", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub size: i64,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub uploaded_at: String,
}

/// Quota accounting is backend-owned; the client only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageUsage {
    pub used: i64,
    pub quota: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeEntry {
    pub id: String,
    pub description: String,
    #[serde(default, rename = "client", alias = "client_id")]
    pub client_id: Option<String>,
    pub started_at: String,
    #[serde(default)]
    pub stopped_at: Option<String>,
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub billable: bool,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTimeEntry {
    pub description: String,
    #[serde(default, rename = "client")]
    pub client_id: Option<String>,
    pub started_at: String,
    #[serde(default)]
    pub stopped_at: Option<String>,
    #[serde(default)]
    pub billable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeEntryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "client", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountSettings {
    #[serde(default)]
    pub is_configured: Option<bool>,
    pub company_name: String,
    #[serde(default)]
    pub registration_number: String,
    #[serde(default)]
    pub address_line: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub bank_account: String,
    #[serde(default)]
    pub logo_url: String,
    pub invoice_prefix: String,
    pub next_invoice_number: i64,
    pub default_currency: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_configured: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_invoice_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Result of a batch attach call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachReceipt {
    pub invoice_id: String,
    #[serde(default)]
    pub attached: u32,
}

/// Optional from/to date window for list endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl DateRange {
    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(from) = &self.from {
            query.push(("from", from.clone()));
        }
        if let Some(to) = &self.to {
            query.push(("to", to.clone()));
        }
        query
    }
}

#[derive(Debug, Clone, Serialize)]
struct AttachExpensesBody<'a> {
    invoice_id: &'a str,
    expense_ids: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
struct AttachMileageBody<'a> {
    invoice_id: &'a str,
    mileage_ids: &'a [String],
}

fn require_text(value: &str, message: &'static str) -> Result<String, String> {
    let v = value.trim().to_string();
    if v.is_empty() {
        return Err(message.to_string());
    }
    Ok(v)
}

fn require_positive(value: f64, message: &'static str) -> Result<f64, String> {
    if !value.is_finite() || value <= 0.0 {
        return Err(message.to_string());
    }
    Ok(value)
}

fn trimmed_opt(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let t = s.trim().to_string();
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    })
}

fn normalize_new_expense(input: NewExpense) -> Result<NewExpense, String> {
    let NewExpense {
        title,
        amount,
        currency,
        date,
        category,
        notes,
        client_id,
        is_reimbursable,
    } = input;

    let title = require_text(&title, "Title is required.")?;
    let amount = require_positive(amount, "Amount must be greater than 0.")?;
    let currency = require_text(&currency, "Currency is required.")?;
    let date = require_text(&date, "Date is required.")?;

    Ok(NewExpense {
        title,
        amount,
        currency,
        date,
        category: trimmed_opt(category),
        notes: trimmed_opt(notes),
        client_id: trimmed_opt(client_id),
        is_reimbursable,
    })
}

fn normalize_new_mileage(input: NewMileageEntry) -> Result<NewMileageEntry, String> {
    let NewMileageEntry {
        description,
        date,
        miles,
        rate,
        client_id,
        is_reimbursable,
    } = input;

    let description = require_text(&description, "Description is required.")?;
    let date = require_text(&date, "Date is required.")?;
    let miles = require_positive(miles, "Miles must be greater than 0.")?;
    if !rate.is_finite() || rate < 0.0 {
        return Err("Rate must be 0 or greater.".to_string());
    }

    Ok(NewMileageEntry {
        description,
        date,
        miles,
        rate,
        client_id: trimmed_opt(client_id),
        is_reimbursable,
    })
}

fn normalize_new_invoice(input: NewInvoice) -> Result<NewInvoice, String> {
    let mut input = input;
    input.client_id = require_text(&input.client_id, "Client is required.")?;
    input.issue_date = require_text(&input.issue_date, "Issue date is required.")?;
    input.currency = require_text(&input.currency, "Currency is required.")?;
    input.client_name = input.client_name.trim().to_string();
    Ok(input)
}

pub struct ExpenseService {
    gateway: Arc<Gateway>,
}

impl ExpenseService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn list(&self, range: &DateRange) -> ApiResponse<Vec<Expense>> {
        envelope(
            "list_expenses",
            self.gateway
                .get_json("list_expenses", "/expenses/expenses/", &range.to_query())
                .await,
        )
    }

    pub async fn create(&self, input: NewExpense) -> ApiResponse<Expense> {
        let input = match normalize_new_expense(input) {
            Ok(v) => v,
            Err(msg) => return ApiResponse::err(msg),
        };
        envelope(
            "create_expense",
            self.gateway
                .post_json("create_expense", "/expenses/expenses/", &input)
                .await,
        )
    }

    pub async fn update(&self, id: &str, patch: ExpensePatch) -> ApiResponse<Expense> {
        envelope(
            "update_expense",
            self.gateway
                .patch_json("update_expense", &format!("/expenses/expenses/{id}/"), &patch)
                .await,
        )
    }

    pub async fn delete(&self, id: &str) -> ApiResponse<bool> {
        envelope(
            "delete_expense",
            self.gateway
                .delete_json("delete_expense", &format!("/expenses/expenses/{id}/"))
                .await,
        )
    }

    pub async fn add_to_invoice(&self, invoice_id: &str, expense_ids: &[String]) -> ApiResponse<AttachReceipt> {
        if expense_ids.is_empty() {
            return ApiResponse::err("No expenses selected.");
        }
        let body = AttachExpensesBody {
            invoice_id,
            expense_ids,
        };
        envelope(
            "attach_expenses",
            self.gateway
                .post_json("attach_expenses", "/expenses/expenses/add_to_invoice/", &body)
                .await,
        )
    }
}

pub struct MileageService {
    gateway: Arc<Gateway>,
}

impl MileageService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn list(&self, range: &DateRange) -> ApiResponse<Vec<MileageEntry>> {
        envelope(
            "list_mileage",
            self.gateway
                .get_json("list_mileage", "/expenses/mileage/", &range.to_query())
                .await,
        )
    }

    pub async fn create(&self, input: NewMileageEntry) -> ApiResponse<MileageEntry> {
        let input = match normalize_new_mileage(input) {
            Ok(v) => v,
            Err(msg) => return ApiResponse::err(msg),
        };
        envelope(
            "create_mileage",
            self.gateway
                .post_json("create_mileage", "/expenses/mileage/", &input)
                .await,
        )
    }

    pub async fn update(&self, id: &str, patch: MileagePatch) -> ApiResponse<MileageEntry> {
        envelope(
            "update_mileage",
            self.gateway
                .patch_json("update_mileage", &format!("/expenses/mileage/{id}/"), &patch)
                .await,
        )
    }

    pub async fn delete(&self, id: &str) -> ApiResponse<bool> {
        envelope(
            "delete_mileage",
            self.gateway
                .delete_json("delete_mileage", &format!("/expenses/mileage/{id}/"))
                .await,
        )
    }

    pub async fn add_to_invoice(&self, invoice_id: &str, mileage_ids: &[String]) -> ApiResponse<AttachReceipt> {
        if mileage_ids.is_empty() {
            return ApiResponse::err("No mileage entries selected.");
        }
        let body = AttachMileageBody {
            invoice_id,
            mileage_ids,
        };
        envelope(
            "attach_mileage",
            self.gateway
                .post_json("attach_mileage", "/expenses/mileage/add_to_invoice/", &body)
                .await,
        )
    }
}

pub struct InvoiceService {
    gateway: Arc<Gateway>,
}

impl InvoiceService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn list(&self, filter: &InvoiceFilter) -> ApiResponse<Vec<Invoice>> {
        envelope(
            "list_invoices",
            self.gateway
                .get_json("list_invoices", "/invoices/", &filter.to_query())
                .await,
        )
    }

    pub async fn get(&self, id: &str) -> ApiResponse<Invoice> {
        envelope(
            "get_invoice",
            self.gateway
                .get_json("get_invoice", &format!("/invoices/{id}/"), &[])
                .await,
        )
    }

    pub async fn create(&self, input: NewInvoice) -> ApiResponse<Invoice> {
        let input = match normalize_new_invoice(input) {
            Ok(v) => v,
            Err(msg) => return ApiResponse::err(msg),
        };
        envelope(
            "create_invoice",
            self.gateway
                .post_json("create_invoice", "/invoices/", &input)
                .await,
        )
    }

    pub async fn update(&self, id: &str, patch: InvoicePatch) -> ApiResponse<Invoice> {
        envelope(
            "update_invoice",
            self.gateway
                .patch_json("update_invoice", &format!("/invoices/{id}/"), &patch)
                .await,
        )
    }

    pub async fn delete(&self, id: &str) -> ApiResponse<bool> {
        envelope(
            "delete_invoice",
            self.gateway
                .delete_json("delete_invoice", &format!("/invoices/{id}/"))
                .await,
        )
    }

    /// The backend renders the PDF; this only streams the bytes to `dest`.
    pub async fn download_pdf(&self, id: &str, dest: &Path) -> ApiResponse<String> {
        match self
            .gateway
            .download_to_path("download_invoice_pdf", &format!("/invoices/{id}/pdf/"), dest)
            .await
        {
            Ok(digest) => ApiResponse::ok(digest),
            Err(e) => {
                let msg = e.to_string();
                eprintln!("[api] {{ op: \"download_invoice_pdf\", error: {:?} }}", msg);
                ApiResponse::err(msg)
            }
        }
    }
}

pub struct EstimateService {
    gateway: Arc<Gateway>,
}

impl EstimateService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn list(&self) -> ApiResponse<Vec<Estimate>> {
        envelope(
            "list_estimates",
            self.gateway.get_json("list_estimates", "/estimates/", &[]).await,
        )
    }

    pub async fn create(&self, input: NewEstimate) -> ApiResponse<Estimate> {
        let mut input = input;
        input.client_id = match require_text(&input.client_id, "Client is required.") {
            Ok(v) => v,
            Err(msg) => return ApiResponse::err(msg),
        };
        input.issue_date = match require_text(&input.issue_date, "Issue date is required.") {
            Ok(v) => v,
            Err(msg) => return ApiResponse::err(msg),
        };
        envelope(
            "create_estimate",
            self.gateway
                .post_json("create_estimate", "/estimates/", &input)
                .await,
        )
    }

    pub async fn update(&self, id: &str, patch: EstimatePatch) -> ApiResponse<Estimate> {
        envelope(
            "update_estimate",
            self.gateway
                .patch_json("update_estimate", &format!("/estimates/{id}/"), &patch)
                .await,
        )
    }

    pub async fn delete(&self, id: &str) -> ApiResponse<bool> {
        envelope(
            "delete_estimate",
            self.gateway
                .delete_json("delete_estimate", &format!("/estimates/{id}/"))
                .await,
        )
    }

    /// An accepted estimate becomes a draft invoice; the backend owns the
    /// conversion and numbering.
    pub async fn convert_to_invoice(&self, id: &str) -> ApiResponse<Invoice> {
        envelope(
            "convert_estimate",
            self.gateway
                .post_json(
                    "convert_estimate",
                    &format!("/estimates/{id}/convert/"),
                    &serde_json::json!({}),
                )
                .await,
        )
    }
}

pub struct EventService {
    gateway: Arc<Gateway>,
}

impl EventService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn list(&self, range: &DateRange) -> ApiResponse<Vec<CalendarEvent>> {
        envelope(
            "list_events",
            self.gateway
                .get_json("list_events", "/events/", &range.to_query())
                .await,
        )
    }

    pub async fn create(&self, input: NewCalendarEvent) -> ApiResponse<CalendarEvent> {
        let mut input = input;
        input.title = match require_text(&input.title, "Title is required.") {
            Ok(v) => v,
            Err(msg) => return ApiResponse::err(msg),
        };
        if input.starts_at.trim().is_empty() || input.ends_at.trim().is_empty() {
            return ApiResponse::err("Start and end times are required.");
        }
        envelope(
            "create_event",
            self.gateway.post_json("create_event", "/events/", &input).await,
        )
    }

    pub async fn update(&self, id: &str, patch: CalendarEventPatch) -> ApiResponse<CalendarEvent> {
        envelope(
            "update_event",
            self.gateway
                .patch_json("update_event", &format!("/events/{id}/"), &patch)
                .await,
        )
    }

    pub async fn delete(&self, id: &str) -> ApiResponse<bool> {
        envelope(
            "delete_event",
            self.gateway
                .delete_json("delete_event", &format!("/events/{id}/"))
                .await,
        )
    }
}

pub struct FileService {
    gateway: Arc<Gateway>,
}

impl FileService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn list(&self) -> ApiResponse<Vec<StoredFile>> {
        envelope(
            "list_files",
            self.gateway.get_json("list_files", "/files/", &[]).await,
        )
    }

    pub async fn upload(&self, path: &Path) -> ApiResponse<StoredFile> {
        envelope(
            "upload_file",
            self.gateway.upload_file("upload_file", "/files/", path).await,
        )
    }

    /// Streams the file to `dest`; when the listing carried a digest, the
    /// downloaded bytes must match it.
    pub async fn download(&self, file: &StoredFile, dest: &Path) -> ApiResponse<String> {
        match self
            .gateway
            .download_to_path("download_file", &format!("/files/{}/content/", file.id), dest)
            .await
        {
            Ok(digest) => {
                if !file.sha256.trim().is_empty() && digest != file.sha256 {
                    eprintln!(
                        "[api] {{ op: \"download_file\", error: \"digest mismatch for {}\" }}",
                        file.id
                    );
                    return ApiResponse::err("Downloaded file failed its integrity check.");
                }
                ApiResponse::ok(digest)
            }
            Err(e) => {
                let msg = e.to_string();
                eprintln!("[api] {{ op: \"download_file\", error: {:?} }}", msg);
                ApiResponse::err(msg)
            }
        }
    }

    pub async fn delete(&self, id: &str) -> ApiResponse<bool> {
        envelope(
            "delete_file",
            self.gateway
                .delete_json("delete_file", &format!("/files/{id}/"))
                .await,
        )
    }

    pub async fn usage(&self) -> ApiResponse<StorageUsage> {
        envelope(
            "storage_usage",
            self.gateway.get_json("storage_usage", "/files/usage/", &[]).await,
        )
    }
}

pub struct TimeTrackingService {
    gateway: Arc<Gateway>,
}

impl TimeTrackingService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn list(&self, range: &DateRange) -> ApiResponse<Vec<TimeEntry>> {
        envelope(
            "list_time_entries",
            self.gateway
                .get_json("list_time_entries", "/time/entries/", &range.to_query())
                .await,
        )
    }

    pub async fn create(&self, input: NewTimeEntry) -> ApiResponse<TimeEntry> {
        let mut input = input;
        input.description = match require_text(&input.description, "Description is required.") {
            Ok(v) => v,
            Err(msg) => return ApiResponse::err(msg),
        };
        if input.started_at.trim().is_empty() {
            return ApiResponse::err("Start time is required.");
        }
        envelope(
            "create_time_entry",
            self.gateway
                .post_json("create_time_entry", "/time/entries/", &input)
                .await,
        )
    }

    /// Starts a running timer now.
    pub async fn start(&self, description: &str, client_id: Option<&str>, billable: bool) -> ApiResponse<TimeEntry> {
        self.create(NewTimeEntry {
            description: description.to_string(),
            client_id: client_id.map(|c| c.to_string()),
            started_at: now_iso(),
            stopped_at: None,
            billable,
        })
        .await
    }

    /// Stops a running timer; the backend computes the final duration.
    pub async fn stop(&self, id: &str) -> ApiResponse<TimeEntry> {
        envelope(
            "stop_time_entry",
            self.gateway
                .post_json(
                    "stop_time_entry",
                    &format!("/time/entries/{id}/stop/"),
                    &serde_json::json!({}),
                )
                .await,
        )
    }

    pub async fn update(&self, id: &str, patch: TimeEntryPatch) -> ApiResponse<TimeEntry> {
        envelope(
            "update_time_entry",
            self.gateway
                .patch_json("update_time_entry", &format!("/time/entries/{id}/"), &patch)
                .await,
        )
    }

    pub async fn delete(&self, id: &str) -> ApiResponse<bool> {
        envelope(
            "delete_time_entry",
            self.gateway
                .delete_json("delete_time_entry", &format!("/time/entries/{id}/"))
                .await,
        )
    }
}

pub struct SettingsService {
    gateway: Arc<Gateway>,
}

impl SettingsService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn get(&self) -> ApiResponse<AccountSettings> {
        envelope(
            "get_settings",
            self.gateway.get_json("get_settings", "/settings/", &[]).await,
        )
    }

    pub async fn update(&self, patch: AccountSettingsPatch) -> ApiResponse<AccountSettings> {
        envelope(
            "update_settings",
            self.gateway
                .patch_json("update_settings", "/settings/", &patch)
                .await,
        )
    }
}

/// All domain services over one shared gateway.
pub struct Services {
    pub invoices: InvoiceService,
    pub expenses: ExpenseService,
    pub mileage: MileageService,
    pub estimates: EstimateService,
    pub events: EventService,
    pub files: FileService,
    pub time: TimeTrackingService,
    pub settings: SettingsService,
}

impl Services {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            invoices: InvoiceService::new(gateway.clone()),
            expenses: ExpenseService::new(gateway.clone()),
            mileage: MileageService::new(gateway.clone()),
            estimates: EstimateService::new(gateway.clone()),
            events: EventService::new(gateway.clone()),
            files: FileService::new(gateway.clone()),
            time: TimeTrackingService::new(gateway.clone()),
            settings: SettingsService::new(gateway),
        }
    }
}
