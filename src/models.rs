use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Reparation category that needs a material and a price above `REPLACEMENT_MIN_PRICE`.
pub const REPLACEMENT_KIND: &str = "Replacement";
pub const REPLACEMENT_MIN_PRICE: f64 = 100.0;

/// Length of a slot moved by a mechanic reschedule.
pub const RESCHEDULE_DURATION_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Mechanic,
    Manager,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::Customer => 0,
            Role::Mechanic => 5,
            Role::Manager => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Mechanic => "mechanic",
            Role::Manager => "manager",
        }
    }
}

/// Two-party sign-off shared by appointments and reparations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub mechanic: bool,
    pub user: bool,
}

impl Approval {
    pub fn both(&self) -> bool {
        self.mechanic && self.user
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub contact: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarSnapshot {
    pub id: String,
    pub owner: String,
    pub brand: String,
    pub model: String,
    pub year: i64,
    pub vin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanicSnapshot {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub contact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(default)]
    pub material: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub lot: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub contact: String,
    pub email: String,
    pub password_hash: String,
    pub address: Option<Json<Address>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub contact: String,
    pub email: String,
    pub address: Option<Address>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            firstname: row.firstname,
            lastname: row.lastname,
            contact: row.contact,
            email: row.email,
            address: row.address.map(|address| address.0),
        }
    }
}

impl UserRow {
    pub fn snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            id: self.id.clone(),
            firstname: self.firstname.clone(),
            lastname: self.lastname.clone(),
            contact: self.contact.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MechanicRow {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: Option<String>,
    pub contact: String,
    pub password_hash: String,
    pub specialities: Json<Vec<String>>,
    pub min_hour: String,
    pub max_hour: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MechanicProfile {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: Option<String>,
    pub contact: String,
    pub speciality: Vec<String>,
    pub min_hour: String,
    pub max_hour: String,
}

impl From<MechanicRow> for MechanicProfile {
    fn from(row: MechanicRow) -> Self {
        Self {
            id: row.id,
            firstname: row.firstname,
            lastname: row.lastname,
            email: row.email,
            contact: row.contact,
            speciality: row.specialities.0,
            min_hour: row.min_hour,
            max_hour: row.max_hour,
        }
    }
}

impl MechanicRow {
    pub fn snapshot(&self) -> MechanicSnapshot {
        MechanicSnapshot {
            id: self.id.clone(),
            firstname: self.firstname.clone(),
            lastname: self.lastname.clone(),
            contact: self.contact.clone(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ManagerRow {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: Option<String>,
    pub contact: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerProfile {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: Option<String>,
    pub contact: String,
}

impl From<ManagerRow> for ManagerProfile {
    fn from(row: ManagerRow) -> Self {
        Self {
            id: row.id,
            firstname: row.firstname,
            lastname: row.lastname,
            email: row.email,
            contact: row.contact,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CarRow {
    pub id: String,
    #[serde(rename = "owner")]
    pub owner_id: String,
    pub brand: String,
    pub model: String,
    pub year: i64,
    pub vin: String,
    pub created_at: DateTime<Utc>,
}

impl CarRow {
    pub fn snapshot(&self) -> CarSnapshot {
        CarSnapshot {
            id: self.id.clone(),
            owner: self.owner_id.clone(),
            brand: self.brand.clone(),
            model: self.model.clone(),
            year: self.year,
            vin: self.vin.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MaterialRow {
    pub id: String,
    pub name: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UnavailableSlotRow {
    pub id: String,
    pub mechanic_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSlot {
    pub id: String,
    pub start: String,
    pub end: String,
}

/// Blackout windows of one mechanic on one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnavailableDay {
    pub date: NaiveDate,
    #[serde(rename = "timeSlots")]
    pub time_slots: Vec<TimeSlot>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub customer_id: String,
    pub customer: Json<CustomerSnapshot>,
    pub car: Json<CarSnapshot>,
    pub mechanic_id: String,
    pub mechanic: Json<MechanicSnapshot>,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: String,
    pub problems: Json<Vec<Problem>>,
    pub mechanic_approved: bool,
    pub user_approved: bool,
    pub created_at: DateTime<Utc>,
}

impl AppointmentRow {
    pub fn status(&self) -> Approval {
        Approval {
            mechanic: self.mechanic_approved,
            user: self.user_approved,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: String,
    pub user: CustomerSnapshot,
    pub car: CarSnapshot,
    pub mechanic: MechanicSnapshot,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub localisation: String,
    pub problem: Vec<Problem>,
    pub status: Approval,
    pub created_at: DateTime<Utc>,
}

impl From<AppointmentRow> for Appointment {
    fn from(row: AppointmentRow) -> Self {
        let status = row.status();
        Self {
            id: row.id,
            user: row.customer.0,
            car: row.car.0,
            mechanic: row.mechanic.0,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            localisation: row.location,
            problem: row.problems.0,
            status,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepairRow {
    pub id: String,
    pub appointment_id: String,
    pub owner_id: String,
    pub owner: Json<CustomerSnapshot>,
    pub car: Json<CarSnapshot>,
    pub mechanic_id: String,
    pub mechanic: Json<MechanicSnapshot>,
    pub finished_mechanic: bool,
    pub finished_user: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReparationRow {
    pub id: String,
    pub position: i64,
    pub kind: String,
    pub material: Option<String>,
    pub description: String,
    pub price: f64,
    pub mechanic_approved: bool,
    pub user_approved: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ReparationRow {
    pub fn status(&self) -> Approval {
        Approval {
            mechanic: self.mechanic_approved,
            user: self.user_approved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reparation {
    pub id: String,
    pub position: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub material: Option<String>,
    pub description: String,
    pub price: f64,
    pub status: Approval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl From<ReparationRow> for Reparation {
    fn from(row: ReparationRow) -> Self {
        let status = row.status();
        Self {
            id: row.id,
            position: row.position,
            kind: row.kind,
            material: row.material,
            description: row.description,
            price: row.price,
            status,
            start: row.start_time,
            end: row.end_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Repair {
    pub id: String,
    pub appointment_id: String,
    pub owner: CustomerSnapshot,
    pub car: CarSnapshot,
    pub mechanic: MechanicSnapshot,
    pub isfinished: Approval,
    pub reparation: Vec<Reparation>,
    pub created_at: DateTime<Utc>,
}

impl Repair {
    pub fn from_parts(row: RepairRow, items: Vec<ReparationRow>) -> Self {
        Self {
            id: row.id,
            appointment_id: row.appointment_id,
            owner: row.owner.0,
            car: row.car.0,
            mechanic: row.mechanic.0,
            isfinished: Approval {
                mechanic: row.finished_mechanic,
                user: row.finished_user,
            },
            reparation: items.into_iter().map(Reparation::from).collect(),
            created_at: row.created_at,
        }
    }
}

/// A reparation as copied into an invoice; never linked back to the live repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub reparation_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub material: Option<String>,
    pub description: String,
    pub price: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRow {
    pub id: String,
    pub repair_id: String,
    pub owner_id: String,
    pub owner: Json<CustomerSnapshot>,
    pub car: Json<CarSnapshot>,
    pub mechanic: Json<MechanicSnapshot>,
    pub items: Json<Vec<InvoiceItem>>,
    pub total: f64,
    pub finalized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: String,
    pub repair_id: String,
    pub owner: CustomerSnapshot,
    pub car: CarSnapshot,
    pub mechanic: MechanicSnapshot,
    pub details: Vec<InvoiceItem>,
    pub total: f64,
    pub date: DateTime<Utc>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Self {
            id: row.id,
            repair_id: row.repair_id,
            owner: row.owner.0,
            car: row.car.0,
            mechanic: row.mechanic.0,
            details: row.items.0,
            total: row.total,
            date: row.finalized_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ActivityRow {
    pub kind: String,
    pub message: String,
    pub actor_id: Option<String>,
    pub appointment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
