use std::collections::BTreeSet;

use time::{Duration, OffsetDateTime};

use crate::{Invoice, InvoiceFilter, NewInvoice};

use super::ReimbursableItem;

/// Distinct clients among the selected items. Drives the invoice-lookup
/// branching: one client filters the draft query, zero or several fall back
/// to the unfiltered draft list (the latter with a warning).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientGroup {
    None,
    Single(String),
    Multi(Vec<String>),
}

pub fn classify_clients(items: &[ReimbursableItem]) -> ClientGroup {
    let ids: BTreeSet<String> = items
        .iter()
        .filter_map(|item| item.client_id())
        .filter(|c| !c.trim().is_empty())
        .map(|c| c.to_string())
        .collect();

    let mut ids: Vec<String> = ids.into_iter().collect();
    match ids.len() {
        0 => ClientGroup::None,
        1 => ClientGroup::Single(ids.remove(0)),
        _ => ClientGroup::Multi(ids),
    }
}

pub fn discovery_filter(group: &ClientGroup) -> InvoiceFilter {
    match group {
        ClientGroup::Single(client) => InvoiceFilter::drafts_for_client(client),
        ClientGroup::None | ClientGroup::Multi(_) => InvoiceFilter::drafts(),
    }
}

/// The auto-create offer exists only when the selection resolves to exactly
/// one client and that client has no draft invoice to attach to.
pub fn should_offer_auto_create(group: &ClientGroup, discovered: &[Invoice]) -> bool {
    matches!(group, ClientGroup::Single(_)) && discovered.is_empty()
}

fn format_ymd(d: time::Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), u8::from(d.month()), d.day())
}

/// Deterministic number for an auto-created invoice: up to three characters
/// of the client name plus the creation date.
pub fn auto_invoice_number(client_name: &str, now: OffsetDateTime) -> String {
    let fragment: String = client_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_ascii_uppercase();
    let fragment = if fragment.is_empty() {
        "INV".to_string()
    } else {
        fragment
    };

    let d = now.date();
    format!("{}-{:04}{:02}{:02}", fragment, d.year(), u8::from(d.month()), d.day())
}

/// Payload for the auto-created draft: zeroed totals, issued today, due in
/// 30 days.
pub fn draft_invoice_for(
    client_id: &str,
    client_name: &str,
    currency: &str,
    now: OffsetDateTime,
) -> NewInvoice {
    let issue = now.date();
    let due = issue.saturating_add(Duration::days(30));

    NewInvoice {
        client_id: client_id.to_string(),
        client_name: client_name.trim().to_string(),
        invoice_number: Some(auto_invoice_number(client_name, now)),
        issue_date: format_ymd(issue),
        due_date: Some(format_ymd(due)),
        currency: currency.to_string(),
        items: Vec::new(),
        subtotal: 0.0,
        total: 0.0,
        notes: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InvoiceStatus;
    use time::format_description::well_known::Rfc3339;

    fn item(id: &str, client: Option<&str>) -> ReimbursableItem {
        ReimbursableItem::Expense {
            id: id.to_string(),
            client_id: client.map(|c| c.to_string()),
            description: "test".to_string(),
            amount: 1.0,
        }
    }

    fn fixed_now() -> OffsetDateTime {
        OffsetDateTime::parse("2026-08-07T10:30:00Z", &Rfc3339).unwrap()
    }

    fn draft(id: &str, client: &str) -> Invoice {
        Invoice {
            id: id.to_string(),
            invoice_number: format!("N-{id}"),
            client_id: client.to_string(),
            client_name: String::new(),
            issue_date: "2026-08-01".to_string(),
            status: InvoiceStatus::Draft,
            due_date: None,
            paid_at: None,
            currency: "USD".to_string(),
            items: Vec::new(),
            subtotal: 0.0,
            total: 0.0,
            notes: String::new(),
            created_at: String::new(),
        }
    }

    #[test]
    fn single_client_filters_the_draft_query() {
        let items = vec![item("e-1", Some("7")), item("e-2", Some("7"))];
        let group = classify_clients(&items);
        assert_eq!(group, ClientGroup::Single("7".to_string()));
        assert_eq!(discovery_filter(&group), InvoiceFilter::drafts_for_client("7"));
    }

    #[test]
    fn no_client_falls_back_to_unfiltered_drafts() {
        let items = vec![item("e-1", None), item("e-2", Some("  "))];
        let group = classify_clients(&items);
        assert_eq!(group, ClientGroup::None);
        assert_eq!(discovery_filter(&group), InvoiceFilter::drafts());
    }

    #[test]
    fn multiple_clients_fall_back_to_unfiltered_drafts() {
        let items = vec![item("e-1", Some("5")), item("e-2", Some("9")), item("e-3", Some("5"))];
        let group = classify_clients(&items);
        assert_eq!(
            group,
            ClientGroup::Multi(vec!["5".to_string(), "9".to_string()])
        );
        assert_eq!(discovery_filter(&group), InvoiceFilter::drafts());
    }

    #[test]
    fn auto_create_offered_only_for_single_client_with_no_drafts() {
        let single = ClientGroup::Single("7".to_string());
        assert!(should_offer_auto_create(&single, &[]));
        assert!(!should_offer_auto_create(&single, &[draft("inv-1", "7")]));
        assert!(!should_offer_auto_create(&ClientGroup::None, &[]));
        assert!(!should_offer_auto_create(
            &ClientGroup::Multi(vec!["5".to_string(), "9".to_string()]),
            &[]
        ));
    }

    #[test]
    fn auto_invoice_number_is_deterministic() {
        let now = fixed_now();
        assert_eq!(auto_invoice_number("Acme GmbH", now), "ACM-20260807");
        assert_eq!(auto_invoice_number("Acme GmbH", now), "ACM-20260807");
        assert_eq!(auto_invoice_number("b & o", now), "BO-20260807");
        // Non-ASCII-only names still yield a usable number.
        assert_eq!(auto_invoice_number("木村", now), "INV-20260807");
    }

    #[test]
    fn auto_created_draft_is_zeroed_and_due_in_30_days() {
        let input = draft_invoice_for("7", " Acme GmbH ", "USD", fixed_now());
        assert_eq!(input.client_id, "7");
        assert_eq!(input.client_name, "Acme GmbH");
        assert_eq!(input.invoice_number.as_deref(), Some("ACM-20260807"));
        assert_eq!(input.issue_date, "2026-08-07");
        assert_eq!(input.due_date.as_deref(), Some("2026-09-06"));
        assert_eq!(input.subtotal, 0.0);
        assert_eq!(input.total, 0.0);
        assert!(input.items.is_empty());
    }
}
