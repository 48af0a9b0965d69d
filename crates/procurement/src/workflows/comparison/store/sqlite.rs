//! SQLite-backed store. Unique indexes carry the one-report and one-selection
//! guarantees; the award runs in a single IMMEDIATE transaction. Every query is
//! handed to `spawn_blocking`, so lock waits and `busy_timeout` never hold a
//! runtime worker.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;

use crate::workflows::comparison::domain::{
    ComparisonReport, DeliveryStatus, NegotiationSession, NegotiationState, Notification,
    NotificationId, NotificationKind, Offer, OfferId, OfferStatus, PurchaseOrderId, ReportId,
    Requisition, RequisitionId, RequisitionStatus, Selection, SelectionChannel, SelectionId,
    SessionId, TriggerReason, User, UserId, Vendor, VendorId,
};
use crate::workflows::comparison::repository::{
    AwardCommand, ProcurementStore, RepositoryError,
};

/// Bump when a table definition changes; older files are reset.
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT
);
CREATE TABLE IF NOT EXISTS vendors (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    rating REAL NOT NULL,
    past_performance REAL NOT NULL,
    certified INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS requisitions (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    owner_id TEXT,
    status TEXT NOT NULL,
    negotiation_closes_at TEXT NOT NULL,
    scoring TEXT NOT NULL,
    awarded_price TEXT,
    awarded_at TEXT
);
CREATE TABLE IF NOT EXISTS requisition_vendors (
    requisition_id TEXT NOT NULL,
    vendor_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (requisition_id, vendor_id)
);
CREATE TABLE IF NOT EXISTS negotiation_sessions (
    id TEXT PRIMARY KEY,
    requisition_id TEXT NOT NULL,
    vendor_id TEXT NOT NULL,
    state TEXT NOT NULL,
    rounds INTEGER NOT NULL,
    latest_offer TEXT,
    utility_score REAL,
    summary TEXT NOT NULL,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS offers (
    id TEXT PRIMARY KEY,
    requisition_id TEXT NOT NULL,
    vendor_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    total_price TEXT NOT NULL,
    unit_price TEXT NOT NULL,
    payment_terms TEXT NOT NULL,
    delivery_date TEXT,
    utility_score REAL,
    status TEXT NOT NULL,
    negotiation_state TEXT NOT NULL,
    summary TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (requisition_id, session_id)
);
CREATE TABLE IF NOT EXISTS comparison_reports (
    id TEXT PRIMARY KEY,
    requisition_id TEXT NOT NULL UNIQUE,
    trigger_reason TEXT NOT NULL,
    total_vendors INTEGER NOT NULL,
    completed_vendors INTEGER NOT NULL,
    excluded_vendors INTEGER NOT NULL,
    top_offers TEXT NOT NULL,
    artifact_path TEXT NOT NULL,
    email_status TEXT NOT NULL,
    generated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS selections (
    id TEXT PRIMARY KEY,
    requisition_id TEXT NOT NULL UNIQUE,
    report_id TEXT,
    offer_id TEXT NOT NULL,
    vendor_id TEXT NOT NULL,
    price TEXT NOT NULL,
    selected_by TEXT NOT NULL,
    reason TEXT,
    channel TEXT NOT NULL,
    purchase_order_id TEXT,
    selected_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    selection_id TEXT NOT NULL,
    vendor_id TEXT NOT NULL,
    offer_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    last_error TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS offers_by_requisition ON offers (requisition_id);
CREATE INDEX IF NOT EXISTS sessions_by_requisition ON negotiation_sessions (requisition_id);
CREATE INDEX IF NOT EXISTS notifications_by_selection ON notifications (selection_id);
";

const OFFER_COLUMNS: &str = "id, requisition_id, vendor_id, session_id, total_price, unit_price, \
    payment_terms, delivery_date, utility_score, status, negotiation_state, summary, captured_at, \
    updated_at";

const REPORT_COLUMNS: &str = "id, requisition_id, trigger_reason, total_vendors, \
    completed_vendors, excluded_vendors, top_offers, artifact_path, email_status, generated_at";

const SELECTION_COLUMNS: &str = "id, requisition_id, report_id, offer_id, vendor_id, price, \
    selected_by, reason, channel, purchase_order_id, selected_at";

/// Queries run on tokio's blocking pool; one connection serializes them.
pub struct SqliteProcurementStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProcurementStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(backend)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(backend)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(backend)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RepositoryError> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(backend)?;
        if current_version != SCHEMA_VERSION {
            conn.execute_batch(
                "DROP TABLE IF EXISTS users;
                 DROP TABLE IF EXISTS vendors;
                 DROP TABLE IF EXISTS requisitions;
                 DROP TABLE IF EXISTS requisition_vendors;
                 DROP TABLE IF EXISTS negotiation_sessions;
                 DROP TABLE IF EXISTS offers;
                 DROP TABLE IF EXISTS comparison_reports;
                 DROP TABLE IF EXISTS selections;
                 DROP TABLE IF EXISTS notifications;",
            )
            .map_err(backend)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(backend)?;
        }
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        lock(&self.conn)
    }

    async fn blocking<T, F>(&self, task: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            task(&mut conn)
        })
        .await
        .map_err(|err| RepositoryError::Unavailable(format!("store task failed: {err}")))?
    }

    pub fn put_requisition(&self, requisition: &Requisition) -> Result<(), RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(backend)?;
        let scoring = serde_json::to_string(&requisition.scoring)
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO requisitions
                (id, title, quantity, owner_id, status, negotiation_closes_at, scoring,
                 awarded_price, awarded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                requisition.id.0,
                requisition.title,
                requisition.quantity,
                requisition.owner_id.as_ref().map(|id| id.0.as_str()),
                requisition.status.label(),
                requisition.negotiation_closes_at,
                scoring,
                requisition.awarded_price.map(|price| price.to_string()),
                requisition.awarded_at,
            ],
        )
        .map_err(backend)?;
        tx.execute(
            "DELETE FROM requisition_vendors WHERE requisition_id = ?1",
            params![requisition.id.0],
        )
        .map_err(backend)?;
        for (position, vendor) in requisition.invited_vendors.iter().enumerate() {
            tx.execute(
                "INSERT INTO requisition_vendors (requisition_id, vendor_id, position)
                 VALUES (?1, ?2, ?3)",
                params![requisition.id.0, vendor.0, position as i64],
            )
            .map_err(backend)?;
        }
        tx.commit().map_err(backend)
    }

    pub fn put_user(&self, user: &User) -> Result<(), RepositoryError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO users (id, name, email) VALUES (?1, ?2, ?3)",
                params![user.id.0, user.name, user.email],
            )
            .map_err(backend)?;
        Ok(())
    }

    pub fn put_vendor(&self, vendor: &Vendor) -> Result<(), RepositoryError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO vendors
                    (id, name, email, rating, past_performance, certified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    vendor.id.0,
                    vendor.name,
                    vendor.email,
                    vendor.rating,
                    vendor.past_performance,
                    vendor.certified,
                ],
            )
            .map_err(backend)?;
        Ok(())
    }
}

fn load_requisition(
    conn: &Connection,
    id: &RequisitionId,
) -> Result<Option<Requisition>, RepositoryError> {
    let requisition = conn
        .query_row(
            "SELECT id, title, quantity, owner_id, status, negotiation_closes_at, scoring,
                    awarded_price, awarded_at
             FROM requisitions WHERE id = ?1",
            params![id.0],
            requisition_from_row,
        )
        .optional()
        .map_err(backend)?;

    let Some(mut requisition) = requisition else {
        return Ok(None);
    };

    let mut statement = conn
        .prepare(
            "SELECT vendor_id FROM requisition_vendors
             WHERE requisition_id = ?1 ORDER BY position",
        )
        .map_err(backend)?;
    requisition.invited_vendors = statement
        .query_map(params![id.0], |row| row.get::<_, String>(0).map(VendorId))
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;

    Ok(Some(requisition))
}

fn requisition_from_row(row: &Row<'_>) -> rusqlite::Result<Requisition> {
    let scoring: String = row.get(6)?;
    Ok(Requisition {
        id: RequisitionId(row.get(0)?),
        title: row.get(1)?,
        quantity: row.get(2)?,
        owner_id: row.get::<_, Option<String>>(3)?.map(UserId),
        status: label(4, row.get(4)?, RequisitionStatus::parse)?,
        negotiation_closes_at: row.get(5)?,
        scoring: convert(6, serde_json::from_str(&scoring))?,
        awarded_price: optional_decimal(row, 7)?,
        awarded_at: row.get(8)?,
        invited_vendors: Vec::new(),
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<NegotiationSession> {
    let latest_offer: Option<String> = row.get(5)?;
    Ok(NegotiationSession {
        id: SessionId(row.get(0)?),
        requisition_id: RequisitionId(row.get(1)?),
        vendor_id: VendorId(row.get(2)?),
        state: label(3, row.get(3)?, NegotiationState::parse)?,
        rounds: row.get(4)?,
        latest_offer: match latest_offer {
            Some(raw) => Some(convert(5, serde_json::from_str(&raw))?),
            None => None,
        },
        utility_score: row.get(6)?,
        summary: row.get(7)?,
        started_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn offer_from_row(row: &Row<'_>) -> rusqlite::Result<Offer> {
    Ok(Offer {
        id: OfferId(row.get(0)?),
        requisition_id: RequisitionId(row.get(1)?),
        vendor_id: VendorId(row.get(2)?),
        session_id: SessionId(row.get(3)?),
        total_price: decimal(row, 4)?,
        unit_price: decimal(row, 5)?,
        payment_terms: row.get(6)?,
        delivery_date: row.get::<_, Option<NaiveDate>>(7)?,
        utility_score: row.get(8)?,
        status: label(9, row.get(9)?, OfferStatus::parse)?,
        negotiation_state: label(10, row.get(10)?, NegotiationState::parse)?,
        summary: row.get(11)?,
        captured_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<ComparisonReport> {
    let top_offers: String = row.get(6)?;
    Ok(ComparisonReport {
        id: ReportId(row.get(0)?),
        requisition_id: RequisitionId(row.get(1)?),
        trigger: label(2, row.get(2)?, TriggerReason::parse)?,
        total_vendors: row.get(3)?,
        completed_vendors: row.get(4)?,
        excluded_vendors: row.get(5)?,
        top_offers: convert(6, serde_json::from_str(&top_offers))?,
        artifact_path: row.get(7)?,
        email_status: label(8, row.get(8)?, DeliveryStatus::parse)?,
        generated_at: row.get(9)?,
    })
}

fn selection_from_row(row: &Row<'_>) -> rusqlite::Result<Selection> {
    Ok(Selection {
        id: SelectionId(row.get(0)?),
        requisition_id: RequisitionId(row.get(1)?),
        report_id: row.get::<_, Option<String>>(2)?.map(ReportId),
        offer_id: OfferId(row.get(3)?),
        vendor_id: VendorId(row.get(4)?),
        price: decimal(row, 5)?,
        selected_by: UserId(row.get(6)?),
        reason: row.get(7)?,
        channel: label(8, row.get(8)?, SelectionChannel::parse)?,
        purchase_order_id: row.get::<_, Option<String>>(9)?.map(PurchaseOrderId),
        selected_at: row.get(10)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: NotificationId(row.get(0)?),
        selection_id: SelectionId(row.get(1)?),
        vendor_id: VendorId(row.get(2)?),
        offer_id: OfferId(row.get(3)?),
        kind: label(4, row.get(4)?, NotificationKind::parse)?,
        status: label(5, row.get(5)?, DeliveryStatus::parse)?,
        last_error: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized value '{0}'")]
struct UnknownLabel(String);

fn label<T>(index: usize, raw: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    match parse(&raw) {
        Some(value) => Ok(value),
        None => Err(rusqlite::Error::FromSqlConversionFailure(
            index,
            Type::Text,
            Box::new(UnknownLabel(raw)),
        )),
    }
}

fn convert<T, E>(index: usize, parsed: Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parsed.map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn decimal(row: &Row<'_>, index: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(index)?;
    convert(index, Decimal::from_str(&raw))
}

fn optional_decimal(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<Decimal>> {
    match row.get::<_, Option<String>>(index)? {
        Some(raw) => convert(index, Decimal::from_str(&raw)).map(Some),
        None => Ok(None),
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::Unavailable("connection lock poisoned".to_string()))
}

fn backend(err: rusqlite::Error) -> RepositoryError {
    if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        RepositoryError::Conflict
    } else {
        RepositoryError::Unavailable(err.to_string())
    }
}

fn json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|err| RepositoryError::Unavailable(err.to_string()))
}

/// Validate and apply the award inside one IMMEDIATE transaction.
fn award(conn: &mut Connection, command: AwardCommand) -> Result<Selection, RepositoryError> {
    let AwardCommand {
        selection,
        awarded_at,
    } = command;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(backend)?;

    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM requisitions WHERE id = ?1",
            params![selection.requisition_id.0],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    match status.as_deref().and_then(RequisitionStatus::parse) {
        None => return Err(RepositoryError::NotFound),
        Some(RequisitionStatus::Awarded) => return Err(RepositoryError::AlreadyAwarded),
        Some(_) => {}
    }

    let winner: Option<(String, String)> = tx
        .query_row(
            "SELECT requisition_id, status FROM offers WHERE id = ?1",
            params![selection.offer_id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(backend)?;
    let Some((offer_requisition, offer_status)) = winner else {
        return Err(RepositoryError::NotFound);
    };
    if offer_requisition != selection.requisition_id.0
        || offer_status == OfferStatus::Excluded.label()
    {
        return Err(RepositoryError::Conflict);
    }

    let inserted = tx.execute(
        "INSERT INTO selections
            (id, requisition_id, report_id, offer_id, vendor_id, price, selected_by,
             reason, channel, purchase_order_id, selected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            selection.id.0,
            selection.requisition_id.0,
            selection.report_id.as_ref().map(|id| id.0.as_str()),
            selection.offer_id.0,
            selection.vendor_id.0,
            selection.price.to_string(),
            selection.selected_by.0,
            selection.reason,
            selection.channel.label(),
            selection
                .purchase_order_id
                .as_ref()
                .map(|id| id.0.as_str()),
            selection.selected_at,
        ],
    );
    match inserted.map_err(backend) {
        Ok(_) => {}
        Err(RepositoryError::Conflict) => return Err(RepositoryError::AlreadyAwarded),
        Err(other) => return Err(other),
    }

    tx.execute(
        "UPDATE offers SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![
            selection.offer_id.0,
            OfferStatus::Selected.label(),
            awarded_at
        ],
    )
    .map_err(backend)?;
    tx.execute(
        "UPDATE offers SET status = ?2, updated_at = ?3
         WHERE requisition_id = ?1 AND id != ?4 AND status IN (?5, ?6)",
        params![
            selection.requisition_id.0,
            OfferStatus::Rejected.label(),
            awarded_at,
            selection.offer_id.0,
            OfferStatus::Completed.label(),
            OfferStatus::Pending.label(),
        ],
    )
    .map_err(backend)?;
    tx.execute(
        "UPDATE requisitions SET status = ?2, awarded_price = ?3, awarded_at = ?4
         WHERE id = ?1",
        params![
            selection.requisition_id.0,
            RequisitionStatus::Awarded.label(),
            selection.price.to_string(),
            awarded_at,
        ],
    )
    .map_err(backend)?;

    tx.commit().map_err(backend)?;
    Ok(selection)
}

#[async_trait]
impl ProcurementStore for SqliteProcurementStore {
    async fn requisition(
        &self,
        id: &RequisitionId,
    ) -> Result<Option<Requisition>, RepositoryError> {
        let id = id.clone();
        self.blocking(move |conn| load_requisition(conn, &id)).await
    }

    async fn requisitions_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Requisition>, RepositoryError> {
        self.blocking(move |conn| {
            let ids = {
                let mut statement = conn
                    .prepare(
                        "SELECT id FROM requisitions WHERE status = ?1
                         ORDER BY negotiation_closes_at, id",
                    )
                    .map_err(backend)?;
                let rows = statement
                    .query_map(params![RequisitionStatus::NegotiationStarted.label()], |row| {
                        row.get::<_, String>(0).map(RequisitionId)
                    })
                    .map_err(backend)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(backend)?
            };

            let mut due = Vec::new();
            for id in ids {
                if let Some(requisition) = load_requisition(conn, &id)? {
                    if requisition.deadline_passed(now) {
                        due.push(requisition);
                    }
                }
            }
            Ok(due)
        })
        .await
    }

    async fn user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, name, email FROM users WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(User {
                        id: UserId(row.get(0)?),
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(backend)
        })
        .await
    }

    async fn vendors(&self, ids: &[VendorId]) -> Result<Vec<Vendor>, RepositoryError> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let mut statement = conn
                .prepare(
                    "SELECT id, name, email, rating, past_performance, certified
                     FROM vendors WHERE id = ?1",
                )
                .map_err(backend)?;
            let mut vendors = Vec::with_capacity(ids.len());
            for id in &ids {
                let vendor = statement
                    .query_row(params![id.0], |row| {
                        Ok(Vendor {
                            id: VendorId(row.get(0)?),
                            name: row.get(1)?,
                            email: row.get(2)?,
                            rating: row.get(3)?,
                            past_performance: row.get(4)?,
                            certified: row.get(5)?,
                        })
                    })
                    .optional()
                    .map_err(backend)?;
                vendors.extend(vendor);
            }
            Ok(vendors)
        })
        .await
    }

    async fn sessions_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Vec<NegotiationSession>, RepositoryError> {
        let requisition = requisition.clone();
        self.blocking(move |conn| {
            let mut statement = conn
                .prepare(
                    "SELECT id, requisition_id, vendor_id, state, rounds, latest_offer,
                            utility_score, summary, started_at, updated_at
                     FROM negotiation_sessions WHERE requisition_id = ?1 ORDER BY started_at",
                )
                .map_err(backend)?;
            let rows = statement
                .query_map(params![requisition.0], session_from_row)
                .map_err(backend)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(backend)
        })
        .await
    }

    async fn save_session(&self, session: NegotiationSession) -> Result<(), RepositoryError> {
        let latest_offer = session.latest_offer.as_ref().map(json).transpose()?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO negotiation_sessions
                    (id, requisition_id, vendor_id, state, rounds, latest_offer,
                     utility_score, summary, started_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session.id.0,
                    session.requisition_id.0,
                    session.vendor_id.0,
                    session.state.label(),
                    session.rounds,
                    latest_offer,
                    session.utility_score,
                    session.summary,
                    session.started_at,
                    session.updated_at,
                ],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn offers_for(&self, requisition: &RequisitionId) -> Result<Vec<Offer>, RepositoryError> {
        let requisition = requisition.clone();
        self.blocking(move |conn| {
            let mut statement = conn
                .prepare(&format!(
                    "SELECT {OFFER_COLUMNS} FROM offers WHERE requisition_id = ?1
                     ORDER BY captured_at, id"
                ))
                .map_err(backend)?;
            let rows = statement
                .query_map(params![requisition.0], offer_from_row)
                .map_err(backend)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(backend)
        })
        .await
    }

    async fn offer(&self, id: &OfferId) -> Result<Option<Offer>, RepositoryError> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = ?1"),
                params![id.0],
                offer_from_row,
            )
            .optional()
            .map_err(backend)
        })
        .await
    }

    async fn upsert_offer(&self, offer: Offer) -> Result<Offer, RepositoryError> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO offers
                    (id, requisition_id, vendor_id, session_id, total_price, unit_price,
                     payment_terms, delivery_date, utility_score, status, negotiation_state,
                     summary, captured_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT (requisition_id, session_id) DO UPDATE SET
                    total_price = excluded.total_price,
                    unit_price = excluded.unit_price,
                    payment_terms = excluded.payment_terms,
                    delivery_date = excluded.delivery_date,
                    utility_score = excluded.utility_score,
                    status = excluded.status,
                    negotiation_state = excluded.negotiation_state,
                    summary = excluded.summary,
                    updated_at = excluded.updated_at",
                params![
                    offer.id.0,
                    offer.requisition_id.0,
                    offer.vendor_id.0,
                    offer.session_id.0,
                    offer.total_price.to_string(),
                    offer.unit_price.to_string(),
                    offer.payment_terms,
                    offer.delivery_date,
                    offer.utility_score,
                    offer.status.label(),
                    offer.negotiation_state.label(),
                    offer.summary,
                    offer.captured_at,
                    offer.updated_at,
                ],
            )
            .map_err(backend)?;

            conn.query_row(
                &format!(
                    "SELECT {OFFER_COLUMNS} FROM offers WHERE requisition_id = ?1 AND session_id = ?2"
                ),
                params![offer.requisition_id.0, offer.session_id.0],
                offer_from_row,
            )
            .map_err(backend)
        })
        .await
    }

    async fn report_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Option<ComparisonReport>, RepositoryError> {
        let requisition = requisition.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM comparison_reports WHERE requisition_id = ?1"),
                params![requisition.0],
                report_from_row,
            )
            .optional()
            .map_err(backend)
        })
        .await
    }

    async fn insert_report(
        &self,
        report: ComparisonReport,
    ) -> Result<ComparisonReport, RepositoryError> {
        let top_offers = json(&report.top_offers)?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO comparison_reports
                    (id, requisition_id, trigger_reason, total_vendors, completed_vendors,
                     excluded_vendors, top_offers, artifact_path, email_status, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    report.id.0,
                    report.requisition_id.0,
                    report.trigger.label(),
                    report.total_vendors,
                    report.completed_vendors,
                    report.excluded_vendors,
                    top_offers,
                    report.artifact_path,
                    report.email_status.label(),
                    report.generated_at,
                ],
            )
            .map_err(backend)?;
            Ok(report)
        })
        .await
    }

    async fn set_report_email_status(
        &self,
        id: &ReportId,
        status: DeliveryStatus,
    ) -> Result<(), RepositoryError> {
        let id = id.clone();
        self.blocking(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE comparison_reports SET email_status = ?2 WHERE id = ?1",
                    params![id.0, status.label()],
                )
                .map_err(backend)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn award(&self, command: AwardCommand) -> Result<Selection, RepositoryError> {
        self.blocking(move |conn| award(conn, command)).await
    }

    async fn set_selection_purchase_order(
        &self,
        id: &SelectionId,
        purchase_order: &PurchaseOrderId,
    ) -> Result<PurchaseOrderId, RepositoryError> {
        let id = id.clone();
        let purchase_order = purchase_order.clone();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE selections SET purchase_order_id = ?2
                 WHERE id = ?1 AND purchase_order_id IS NULL",
                params![id.0, purchase_order.0],
            )
            .map_err(backend)?;
            let recorded: Option<Option<String>> = conn
                .query_row(
                    "SELECT purchase_order_id FROM selections WHERE id = ?1",
                    params![id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            match recorded {
                Some(Some(recorded)) => Ok(PurchaseOrderId(recorded)),
                Some(None) | None => Err(RepositoryError::NotFound),
            }
        })
        .await
    }

    async fn selection_for(
        &self,
        requisition: &RequisitionId,
    ) -> Result<Option<Selection>, RepositoryError> {
        let requisition = requisition.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {SELECTION_COLUMNS} FROM selections WHERE requisition_id = ?1"),
                params![requisition.0],
                selection_from_row,
            )
            .optional()
            .map_err(backend)
        })
        .await
    }

    async fn insert_notifications(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<(), RepositoryError> {
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            for notification in &notifications {
                tx.execute(
                    "INSERT INTO notifications
                        (id, selection_id, vendor_id, offer_id, kind, status, last_error,
                         updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        notification.id.0,
                        notification.selection_id.0,
                        notification.vendor_id.0,
                        notification.offer_id.0,
                        notification.kind.label(),
                        notification.status.label(),
                        notification.last_error,
                        notification.updated_at,
                    ],
                )
                .map_err(backend)?;
            }
            tx.commit().map_err(backend)
        })
        .await
    }

    async fn set_notification_status(
        &self,
        id: &NotificationId,
        status: DeliveryStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let id = id.clone();
        self.blocking(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE notifications SET status = ?2, last_error = ?3, updated_at = ?4
                     WHERE id = ?1",
                    params![id.0, status.label(), error, at],
                )
                .map_err(backend)?;
            if updated == 0 {
                return Err(RepositoryError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn notifications_for(
        &self,
        selection: &SelectionId,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let selection = selection.clone();
        self.blocking(move |conn| {
            let mut statement = conn
                .prepare(
                    "SELECT id, selection_id, vendor_id, offer_id, kind, status, last_error,
                            updated_at
                     FROM notifications WHERE selection_id = ?1 ORDER BY rowid",
                )
                .map_err(backend)?;
            let rows = statement
                .query_map(params![selection.0], notification_from_row)
                .map_err(backend)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(backend)
        })
        .await
    }
}
