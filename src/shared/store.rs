//! CRUD façade over the lead, message and CRM-connection tables. All
//! queries are targeted by primary key or an equality filter with a status
//! predicate; nothing here scans a table unfiltered.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::models::schema::{crm_connections, leads, messages};
use crate::shared::models::{CrmConnection, DeliveryStatus, Lead, Message, DIRECTION_OUTGOING};

pub fn find_lead(conn: &mut PgConnection, lead_id: Uuid) -> QueryResult<Option<Lead>> {
    leads::table.find(lead_id).first(conn).optional()
}

/// Lead lookup by CRM contact id, narrowed by location when the caller has
/// one (contacts can exist under multiple locations).
pub fn find_lead_by_crm_contact(
    conn: &mut PgConnection,
    contact_id: &str,
    location_id: Option<&str>,
) -> QueryResult<Option<Lead>> {
    let mut query = leads::table
        .filter(leads::crm_contact_id.eq(contact_id))
        .into_boxed();
    if let Some(location) = location_id {
        query = query.filter(leads::crm_location_id.eq(location));
    }
    query.order(leads::updated_at.desc()).first(conn).optional()
}

pub fn insert_lead(conn: &mut PgConnection, lead: &Lead) -> QueryResult<usize> {
    diesel::insert_into(leads::table).values(lead).execute(conn)
}

pub fn mark_makler_notified(
    conn: &mut PgConnection,
    lead_id: Uuid,
    notified_at: DateTime<Utc>,
) -> QueryResult<usize> {
    diesel::update(leads::table.find(lead_id))
        .set((
            leads::makler_notified_at.eq(notified_at),
            leads::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
}

pub fn insert_message(conn: &mut PgConnection, message: &Message) -> QueryResult<usize> {
    diesel::insert_into(messages::table)
        .values(message)
        .execute(conn)
}

/// Keyset page of outgoing messages still pending. Rows corrected mid-sweep
/// drop out of the filter, so pagination must not be offset-based.
pub fn pending_outgoing_after(
    conn: &mut PgConnection,
    after: Option<Uuid>,
    limit: i64,
) -> QueryResult<Vec<Message>> {
    let mut query = messages::table
        .filter(messages::direction.eq(DIRECTION_OUTGOING))
        .filter(messages::delivery_status.eq(DeliveryStatus::Pending.as_str()))
        .into_boxed();
    if let Some(last_id) = after {
        query = query.filter(messages::id.gt(last_id));
    }
    query.order(messages::id.asc()).limit(limit).load(conn)
}

/// Advances a pending message to its corrected status. The pending filter
/// keeps the transition monotonic under concurrent sweeps.
pub fn correct_delivery_status(
    conn: &mut PgConnection,
    message_id: Uuid,
    status: DeliveryStatus,
) -> QueryResult<usize> {
    diesel::update(
        messages::table
            .find(message_id)
            .filter(messages::delivery_status.eq(DeliveryStatus::Pending.as_str())),
    )
    .set((
        messages::delivery_status.eq(status.as_str()),
        messages::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
}

pub fn active_connection_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> QueryResult<Option<CrmConnection>> {
    crm_connections::table
        .filter(crm_connections::user_id.eq(user_id))
        .filter(crm_connections::is_active.eq(true))
        .order(crm_connections::updated_at.desc())
        .first(conn)
        .optional()
}

pub fn active_connection_for_location(
    conn: &mut PgConnection,
    location_id: &str,
) -> QueryResult<Option<CrmConnection>> {
    crm_connections::table
        .filter(crm_connections::location_id.eq(location_id))
        .filter(crm_connections::is_active.eq(true))
        .order(crm_connections::updated_at.desc())
        .first(conn)
        .optional()
}

/// Idempotent bootstrap DDL for the tables this server owns.
pub fn create_tables_migration() -> &'static str {
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        status TEXT NOT NULL DEFAULT 'neu',
        source TEXT NOT NULL DEFAULT 'app',
        objekt_id TEXT,
        crm_contact_id TEXT,
        crm_location_id TEXT,
        makler_notified_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS messages (
        id UUID PRIMARY KEY,
        lead_id UUID NOT NULL REFERENCES leads(id),
        user_id UUID NOT NULL,
        direction TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        delivery_status TEXT NOT NULL DEFAULT 'pending',
        crm_message_id TEXT,
        crm_data JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS crm_connections (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        location_id TEXT NOT NULL,
        access_token TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_leads_crm_contact ON leads(crm_contact_id);
    CREATE INDEX IF NOT EXISTS idx_messages_pending ON messages(direction, delivery_status);
    CREATE INDEX IF NOT EXISTS idx_crm_connections_user ON crm_connections(user_id) WHERE is_active;
    "#
}
