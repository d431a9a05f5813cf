use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{ApiResponse, AttachReceipt, Invoice, InvoiceFilter, NewInvoice, Services};

pub mod discovery;
pub mod selection;

use discovery::{classify_clients, discovery_filter, draft_invoice_for, should_offer_auto_create, ClientGroup};
use selection::{ItemKind, SelectionManager};

/// A record the user can put on an invoice. The kind is an explicit tag so
/// the attach call can branch exhaustively instead of sniffing field shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReimbursableItem {
    Expense {
        id: String,
        #[serde(default)]
        client_id: Option<String>,
        description: String,
        amount: f64,
    },
    Mileage {
        id: String,
        #[serde(default)]
        client_id: Option<String>,
        description: String,
        amount: f64,
    },
}

impl ReimbursableItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            ReimbursableItem::Expense { .. } => ItemKind::Expense,
            ReimbursableItem::Mileage { .. } => ItemKind::Mileage,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ReimbursableItem::Expense { id, .. } | ReimbursableItem::Mileage { id, .. } => id,
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            ReimbursableItem::Expense { client_id, .. }
            | ReimbursableItem::Mileage { client_id, .. } => client_id.as_deref(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ReimbursableItem::Expense { description, .. }
            | ReimbursableItem::Mileage { description, .. } => description,
        }
    }

    pub fn amount(&self) -> f64 {
        match self {
            ReimbursableItem::Expense { amount, .. }
            | ReimbursableItem::Mileage { amount, .. } => *amount,
        }
    }
}

/// The backend operations the flow needs. The real implementation delegates
/// to the domain services; tests substitute an in-memory fake.
#[async_trait]
pub trait ReconcileApi: Send + Sync {
    async fn draft_invoices(&self, filter: &InvoiceFilter) -> ApiResponse<Vec<Invoice>>;
    async fn create_draft_invoice(&self, input: NewInvoice) -> ApiResponse<Invoice>;
    async fn attach_expenses(&self, invoice_id: &str, expense_ids: &[String]) -> ApiResponse<AttachReceipt>;
    async fn attach_mileage(&self, invoice_id: &str, mileage_ids: &[String]) -> ApiResponse<AttachReceipt>;
}

#[async_trait]
impl ReconcileApi for Services {
    async fn draft_invoices(&self, filter: &InvoiceFilter) -> ApiResponse<Vec<Invoice>> {
        self.invoices.list(filter).await
    }

    async fn create_draft_invoice(&self, input: NewInvoice) -> ApiResponse<Invoice> {
        self.invoices.create(input).await
    }

    async fn attach_expenses(&self, invoice_id: &str, expense_ids: &[String]) -> ApiResponse<AttachReceipt> {
        self.expenses.add_to_invoice(invoice_id, expense_ids).await
    }

    async fn attach_mileage(&self, invoice_id: &str, mileage_ids: &[String]) -> ApiResponse<AttachReceipt> {
        self.mileage.add_to_invoice(invoice_id, mileage_ids).await
    }
}

/// User-visible notices from the flow. Every failure path produces one;
/// nothing is swallowed.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    MultiClientWarning { clients: Vec<String> },
    DiscoveryFailed { message: String },
    AutoCreateFailed { message: String },
    AttachFailed { message: String },
    AttachCompleted {
        kind: ItemKind,
        invoice_id: String,
        attached: usize,
    },
}

pub type EventSink = Arc<dyn Fn(FlowEvent) + Send + Sync>;

/// A failed attach emits `AttachFailed` and lands back in `InvoiceChosen`
/// with the same selection and the modal still open, so the user can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Selecting,
    Discovering,
    InvoiceChosen,
    AutoCreateOffered,
    Attaching,
    Done,
}

/// Everything tied to one opening of the attach modal. Replacing the context
/// (or closing the modal) invalidates any discovery response still in
/// flight; responses are matched on `context_id` before they are applied.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub context_id: Uuid,
    pub kind: ItemKind,
    pub items: Vec<ReimbursableItem>,
    pub group: ClientGroup,
    pub invoices: Vec<Invoice>,
    pub chosen_invoice: Option<String>,
}

/// Handed out by `begin_discovery`; pairs the query to run with the context
/// the response belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryTicket {
    pub context_id: Uuid,
    pub filter: InvoiceFilter,
}

/// Details the presentation layer supplies when the user confirms the
/// auto-create offer.
#[derive(Debug, Clone)]
pub struct AutoCreateDetails {
    pub client_name: String,
    pub currency: String,
}

/// Controller for the reimbursable-item-to-invoice workflow:
/// select items, discover eligible draft invoices for the implied client,
/// optionally create one, then attach the batch.
pub struct ReconcileController {
    state: FlowState,
    selection: SelectionManager,
    context: Option<FlowContext>,
    events: EventSink,
}

impl ReconcileController {
    pub fn new(events: EventSink) -> Self {
        Self {
            state: FlowState::Idle,
            selection: SelectionManager::new(),
            context: None,
            events,
        }
    }

    /// For embedders that render state directly and do not need notices.
    pub fn without_events() -> Self {
        Self::new(Arc::new(|_| {}))
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn context(&self) -> Option<&FlowContext> {
        self.context.as_ref()
    }

    pub fn discovered_invoices(&self) -> &[Invoice] {
        self.context.as_ref().map(|c| c.invoices.as_slice()).unwrap_or(&[])
    }

    pub fn chosen_invoice(&self) -> Option<&str> {
        self.context.as_ref().and_then(|c| c.chosen_invoice.as_deref())
    }

    fn emit(&self, event: FlowEvent) {
        (self.events)(event);
    }

    fn sync_selection_state(&mut self) {
        if self.context.is_some() {
            return;
        }
        self.state = if self.selection.is_empty(self.selection.active_tab()) {
            FlowState::Idle
        } else {
            FlowState::Selecting
        };
    }

    /// Tab and checkbox intents are only honored while no modal is open; the
    /// modal works on its own snapshot of the selection.
    pub fn set_active_tab(&mut self, kind: ItemKind) {
        if self.context.is_some() {
            return;
        }
        self.selection.set_active_tab(kind);
        self.sync_selection_state();
    }

    pub fn toggle(&mut self, id: &str) {
        if self.context.is_some() {
            return;
        }
        self.selection.toggle(id);
        self.sync_selection_state();
    }

    pub fn select_all_eligible(&mut self, items: &[ReimbursableItem]) {
        if self.context.is_some() {
            return;
        }
        self.selection.select_all_eligible(items);
        self.sync_selection_state();
    }

    /// Opens the modal: snapshots the selected items, classifies their
    /// clients (warning on a mixed selection) and returns the draft-invoice
    /// query to run. A previous context, if any, is superseded.
    pub fn begin_discovery(&mut self, loaded: &[ReimbursableItem]) -> Result<DiscoveryTicket, String> {
        let kind = self.selection.active_tab();
        let ids = self.selection.selected(kind);
        if ids.is_empty() {
            return Err("Select at least one item first.".to_string());
        }

        let items: Vec<ReimbursableItem> = loaded
            .iter()
            .filter(|item| item.kind() == kind && ids.iter().any(|id| id == item.id()))
            .cloned()
            .collect();
        if items.is_empty() {
            return Err("The selected items are no longer loaded.".to_string());
        }

        let group = classify_clients(&items);
        if let ClientGroup::Multi(clients) = &group {
            self.emit(FlowEvent::MultiClientWarning {
                clients: clients.clone(),
            });
        }

        let filter = discovery_filter(&group);
        let context_id = Uuid::new_v4();
        self.context = Some(FlowContext {
            context_id,
            kind,
            items,
            group,
            invoices: Vec::new(),
            chosen_invoice: None,
        });
        self.state = FlowState::Discovering;

        Ok(DiscoveryTicket { context_id, filter })
    }

    /// Applies a discovery response. A response whose context id no longer
    /// matches the active modal is dropped: it belongs to a superseded
    /// opening and must not leak into the current one.
    pub fn apply_discovery(&mut self, context_id: Uuid, outcome: ApiResponse<Vec<Invoice>>) {
        if self.state != FlowState::Discovering {
            eprintln!("[reconcile] {{ op: \"apply_discovery\", error: \"no discovery in progress\" }}");
            return;
        }
        let Some(ctx) = self.context.as_mut() else {
            eprintln!("[reconcile] {{ op: \"apply_discovery\", error: \"no active context\" }}");
            return;
        };
        if ctx.context_id != context_id {
            eprintln!("[reconcile] {{ op: \"apply_discovery\", error: \"stale response dropped\" }}");
            return;
        }

        let event = if outcome.success {
            let invoices = outcome.data.unwrap_or_default();
            let offer = should_offer_auto_create(&ctx.group, &invoices);
            ctx.invoices = invoices;
            ctx.chosen_invoice = None;
            self.state = if offer {
                FlowState::AutoCreateOffered
            } else {
                FlowState::InvoiceChosen
            };
            None
        } else {
            ctx.invoices.clear();
            ctx.chosen_invoice = None;
            self.state = FlowState::InvoiceChosen;
            Some(FlowEvent::DiscoveryFailed {
                message: outcome
                    .error
                    .unwrap_or_else(|| "Could not load draft invoices.".to_string()),
            })
        };

        if let Some(e) = event {
            self.emit(e);
        }
    }

    /// Runs discovery end to end against the given backend.
    pub async fn discover(&mut self, api: &dyn ReconcileApi, loaded: &[ReimbursableItem]) -> Result<(), String> {
        let ticket = self.begin_discovery(loaded)?;
        let outcome = api.draft_invoices(&ticket.filter).await;
        self.apply_discovery(ticket.context_id, outcome);
        Ok(())
    }

    pub fn choose_invoice(&mut self, invoice_id: &str) -> Result<(), String> {
        match self.state {
            FlowState::InvoiceChosen | FlowState::AutoCreateOffered => {}
            _ => return Err("No invoice list is open.".to_string()),
        }
        let Some(ctx) = self.context.as_mut() else {
            return Err("No invoice list is open.".to_string());
        };
        if !ctx.invoices.iter().any(|i| i.id == invoice_id) {
            return Err("That invoice is no longer listed.".to_string());
        }
        ctx.chosen_invoice = Some(invoice_id.to_string());
        self.state = FlowState::InvoiceChosen;
        Ok(())
    }

    /// User-confirmed creation of a draft invoice for the selection's single
    /// client. On success the new invoice becomes the sole listed entry and
    /// is pre-selected; on failure the offer stays available and nothing is
    /// retained.
    pub async fn confirm_auto_create(
        &mut self,
        api: &dyn ReconcileApi,
        details: &AutoCreateDetails,
        now: OffsetDateTime,
    ) -> Result<(), String> {
        if self.state != FlowState::AutoCreateOffered {
            return Err("Auto-create is not on offer.".to_string());
        }
        let (context_id, client_id) = match self.context.as_ref() {
            Some(ctx) => match &ctx.group {
                ClientGroup::Single(client_id) => (ctx.context_id, client_id.clone()),
                _ => return Err("Auto-create needs a single client.".to_string()),
            },
            None => return Err("Auto-create is not on offer.".to_string()),
        };

        let input = draft_invoice_for(&client_id, &details.client_name, &details.currency, now);
        let outcome = api.create_draft_invoice(input).await;

        let Some(ctx) = self.context.as_mut() else {
            return Ok(());
        };
        if ctx.context_id != context_id {
            eprintln!("[reconcile] {{ op: \"confirm_auto_create\", error: \"stale response dropped\" }}");
            return Ok(());
        }

        let event = match outcome.into_result() {
            Ok(invoice) => {
                ctx.chosen_invoice = Some(invoice.id.clone());
                ctx.invoices = vec![invoice];
                self.state = FlowState::InvoiceChosen;
                None
            }
            Err(message) => Some(FlowEvent::AutoCreateFailed { message }),
        };

        if let Some(e) = event {
            self.emit(e);
        }
        Ok(())
    }

    /// Attaches the selected batch to the chosen invoice. One call per kind;
    /// the selection is single-kind by construction. Success clears the
    /// selection and closes the modal; the embedding shell then does the
    /// authoritative full reload. Failure keeps selection and modal so the
    /// user retries without re-selecting.
    pub async fn attach(&mut self, api: &dyn ReconcileApi) -> Result<(), String> {
        if self.state != FlowState::InvoiceChosen {
            return Err("Choose an invoice first.".to_string());
        }
        let (kind, invoice_id) = match self.context.as_ref() {
            Some(ctx) => match &ctx.chosen_invoice {
                Some(invoice_id) => (ctx.kind, invoice_id.clone()),
                None => return Err("Choose an invoice first.".to_string()),
            },
            None => return Err("Choose an invoice first.".to_string()),
        };

        let ids = self.selection.selected(kind);
        if ids.is_empty() {
            return Err("Select at least one item first.".to_string());
        }

        self.state = FlowState::Attaching;
        let outcome = match kind {
            ItemKind::Expense => api.attach_expenses(&invoice_id, &ids).await,
            ItemKind::Mileage => api.attach_mileage(&invoice_id, &ids).await,
        };

        if outcome.success {
            self.selection.clear(kind);
            self.context = None;
            self.state = FlowState::Done;
            self.emit(FlowEvent::AttachCompleted {
                kind,
                invoice_id,
                attached: ids.len(),
            });
        } else {
            let message = outcome
                .error
                .unwrap_or_else(|| "Could not add the selected items to the invoice.".to_string());
            self.state = FlowState::InvoiceChosen;
            self.emit(FlowEvent::AttachFailed { message });
        }
        Ok(())
    }

    /// Closing the modal discards its context and the selection it was
    /// opened for.
    pub fn close_modal(&mut self) {
        if let Some(ctx) = self.context.take() {
            self.selection.clear(ctx.kind);
        }
        self.sync_selection_state();
    }
}
