use actix_web::HttpResponse;
use askama::Template;

use crate::{error::ApiError, models::InvoiceRow};

pub struct InvoiceLine {
    pub kind: String,
    pub description: String,
    pub material: String,
    pub period: String,
    pub price: String,
}

#[derive(Template)]
#[template(path = "invoice.html")]
pub struct InvoiceTemplate {
    pub id: String,
    pub repair_id: String,
    pub issued_on: String,
    pub customer_name: String,
    pub customer_contact: String,
    pub customer_email: String,
    pub car: String,
    pub vin: String,
    pub mechanic_name: String,
    pub lines: Vec<InvoiceLine>,
    pub total: String,
}

fn money(amount: f64) -> String {
    format!("{amount:.2}")
}

impl From<&InvoiceRow> for InvoiceTemplate {
    fn from(invoice: &InvoiceRow) -> Self {
        let lines = invoice
            .items
            .iter()
            .map(|item| InvoiceLine {
                kind: item.kind.clone(),
                description: item.description.clone(),
                material: item.material.clone().unwrap_or_else(|| "-".to_string()),
                period: format!(
                    "{} - {}",
                    item.start.format("%Y-%m-%d %H:%M"),
                    item.end.format("%Y-%m-%d %H:%M")
                ),
                price: money(item.price),
            })
            .collect();

        Self {
            id: invoice.id.clone(),
            repair_id: invoice.repair_id.clone(),
            issued_on: invoice.finalized_at.format("%Y-%m-%d").to_string(),
            customer_name: format!("{} {}", invoice.owner.firstname, invoice.owner.lastname),
            customer_contact: invoice.owner.contact.clone(),
            customer_email: invoice.owner.email.clone(),
            car: format!(
                "{} {} ({})",
                invoice.car.brand, invoice.car.model, invoice.car.year
            ),
            vin: invoice.car.vin.clone(),
            mechanic_name: format!(
                "{} {}",
                invoice.mechanic.firstname, invoice.mechanic.lastname
            ),
            lines,
            total: money(invoice.total),
        }
    }
}

pub fn render<T: Template>(template: T) -> Result<HttpResponse, ApiError> {
    let body = template
        .render()
        .map_err(|err| ApiError::Internal(format!("template render: {err}")))?;
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body))
}
