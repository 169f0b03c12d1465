use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{Booking, BookingEvent, BookingStatus, Classroom, ClockTime};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BOOKING_COLUMNS: &str = "id, classroom_id, date, start_time, end_time, status, requested_by, \
     purpose, reviewed_by, review_note, created_at, updated_at";

fn now_ts() -> String {
    Utc::now().naive_utc().format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).unwrap_or_else(|_| Utc::now().naive_utc())
}

// ── Classrooms ──

pub fn create_classroom(conn: &Connection, classroom: &Classroom) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO classrooms (id, name, building, capacity, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            classroom.id,
            classroom.name,
            classroom.building,
            classroom.capacity,
            classroom.created_at.format(TS_FORMAT).to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_classroom(conn: &Connection, id: &str) -> anyhow::Result<Option<Classroom>> {
    let result = conn.query_row(
        "SELECT id, name, building, capacity, created_at FROM classrooms WHERE id = ?1",
        params![id],
        parse_classroom_row,
    );

    match result {
        Ok(classroom) => Ok(Some(classroom)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_classrooms(conn: &Connection) -> anyhow::Result<Vec<Classroom>> {
    let mut stmt = conn
        .prepare("SELECT id, name, building, capacity, created_at FROM classrooms ORDER BY id ASC")?;
    let rows = stmt.query_map([], parse_classroom_row)?;

    let mut classrooms = vec![];
    for row in rows {
        classrooms.push(row?);
    }
    Ok(classrooms)
}

fn parse_classroom_row(row: &rusqlite::Row) -> rusqlite::Result<Classroom> {
    let created_at: String = row.get(4)?;
    Ok(Classroom {
        id: row.get(0)?,
        name: row.get(1)?,
        building: row.get(2)?,
        capacity: row.get(3)?,
        created_at: parse_ts(&created_at),
    })
}

// ── Bookings ──

pub fn create_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, classroom_id, date, start_time, end_time, status, requested_by, purpose, reviewed_by, review_note, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            booking.id,
            booking.classroom_id,
            booking.date.format(DATE_FORMAT).to_string(),
            booking.start_time.to_string(),
            booking.end_time.to_string(),
            booking.status.as_str(),
            booking.requested_by,
            booking.purpose,
            booking.reviewed_by,
            booking.review_note,
            booking.created_at.format(TS_FORMAT).to_string(),
            booking.updated_at.format(TS_FORMAT).to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Confirmed bookings for one room on one day, earliest first.
pub fn get_confirmed_bookings(
    conn: &Connection,
    classroom_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE classroom_id = ?1 AND date = ?2 AND status = 'confirmed'
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(
        params![classroom_id, date.format(DATE_FORMAT).to_string()],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

#[derive(Debug, Default, Clone)]
pub struct BookingFilter {
    pub classroom_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    pub requested_by: Option<String>,
    pub limit: i64,
}

pub fn list_bookings(conn: &Connection, filter: &BookingFilter) -> anyhow::Result<Vec<Booking>> {
    let mut clauses: Vec<&str> = vec![];
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![];

    if let Some(classroom_id) = &filter.classroom_id {
        params_vec.push(Box::new(classroom_id.clone()));
        clauses.push("classroom_id = ?");
    }
    if let Some(date) = &filter.date {
        params_vec.push(Box::new(date.format(DATE_FORMAT).to_string()));
        clauses.push("date = ?");
    }
    if let Some(status) = &filter.status {
        params_vec.push(Box::new(status.as_str()));
        clauses.push("status = ?");
    }
    if let Some(requested_by) = &filter.requested_by {
        params_vec.push(Box::new(requested_by.clone()));
        clauses.push("requested_by = ?");
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    params_vec.push(Box::new(filter.limit));

    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings {where_sql} \
         ORDER BY date DESC, start_time ASC LIMIT ?"
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Compare-and-swap on status. Returns false when the row is missing or no
/// longer in `expected`.
pub fn update_booking_status_if(
    conn: &Connection,
    id: &str,
    expected: BookingStatus,
    status: BookingStatus,
    reviewed_by: Option<&str>,
    review_note: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET status = ?1,
             reviewed_by = COALESCE(?2, reviewed_by),
             review_note = COALESCE(?3, review_note),
             updated_at = ?4
         WHERE id = ?5 AND status = ?6",
        params![
            status.as_str(),
            reviewed_by,
            review_note,
            now_ts(),
            id,
            expected.as_str(),
        ],
    )?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let id: String = row.get(0)?;
    let classroom_id: String = row.get(1)?;
    let date_str: String = row.get(2)?;
    let start_str: String = row.get(3)?;
    let end_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let requested_by: String = row.get(6)?;
    let purpose: String = row.get(7)?;
    let reviewed_by: Option<String> = row.get(8)?;
    let review_note: Option<String> = row.get(9)?;
    let created_at_str: String = row.get(10)?;
    let updated_at_str: String = row.get(11)?;

    let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
        .with_context(|| format!("invalid stored date for booking {id}: {date_str}"))?;
    let status = BookingStatus::parse(&status_str)
        .with_context(|| format!("invalid stored status for booking {id}: {status_str}"))?;

    Ok(Booking {
        id,
        classroom_id,
        date,
        start_time: ClockTime::parse_lenient(&start_str),
        end_time: ClockTime::parse_lenient(&end_str),
        status,
        requested_by,
        purpose,
        reviewed_by,
        review_note,
        created_at: parse_ts(&created_at_str),
        updated_at: parse_ts(&updated_at_str),
    })
}

// ── Booking Events ──

pub fn insert_booking_event(
    conn: &Connection,
    booking: &Booking,
    kind: &str,
    actor: &str,
) -> anyhow::Result<BookingEvent> {
    let created_at = now_ts();
    conn.execute(
        "INSERT INTO booking_events (booking_id, classroom_id, date, kind, status, actor, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            booking.id,
            booking.classroom_id,
            booking.date.format(DATE_FORMAT).to_string(),
            kind,
            booking.status.as_str(),
            actor,
            created_at,
        ],
    )?;

    Ok(BookingEvent {
        id: conn.last_insert_rowid(),
        booking_id: booking.id.clone(),
        classroom_id: booking.classroom_id.clone(),
        date: booking.date,
        kind: kind.to_string(),
        status: booking.status,
        actor: actor.to_string(),
        created_at,
    })
}

pub fn get_booking_events_since(conn: &Connection, since_id: i64) -> anyhow::Result<Vec<BookingEvent>> {
    query_booking_events(
        conn,
        "SELECT id, booking_id, classroom_id, date, kind, status, actor, created_at
         FROM booking_events WHERE id > ?1 ORDER BY id ASC",
        params![since_id],
    )
}

pub fn get_booking_history(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<BookingEvent>> {
    query_booking_events(
        conn,
        "SELECT id, booking_id, classroom_id, date, kind, status, actor, created_at
         FROM booking_events WHERE booking_id = ?1 ORDER BY id ASC",
        params![booking_id],
    )
}

fn query_booking_events(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> anyhow::Result<Vec<BookingEvent>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| Ok(parse_event_row(row)))?;

    let mut events = vec![];
    for row in rows {
        events.push(row??);
    }
    Ok(events)
}

fn parse_event_row(row: &rusqlite::Row) -> anyhow::Result<BookingEvent> {
    let id: i64 = row.get(0)?;
    let date_str: String = row.get(3)?;
    let status_str: String = row.get(5)?;

    Ok(BookingEvent {
        id,
        booking_id: row.get(1)?,
        classroom_id: row.get(2)?,
        date: NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
            .with_context(|| format!("invalid stored date for event {id}: {date_str}"))?,
        kind: row.get(4)?,
        status: BookingStatus::parse(&status_str)
            .with_context(|| format!("invalid stored status for event {id}: {status_str}"))?,
        actor: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_db() -> Connection {
        let conn = db::init_db(":memory:").unwrap();
        let now = Utc::now().naive_utc();
        create_classroom(
            &conn,
            &Classroom {
                id: "CR-101".to_string(),
                name: "Lecture Hall 101".to_string(),
                building: Some("Main".to_string()),
                capacity: Some(80),
                created_at: now,
            },
        )
        .unwrap();
        conn
    }

    fn booking(id: &str, date: &str, start: &str, end: &str, status: BookingStatus) -> Booking {
        let now = Utc::now().naive_utc();
        Booking {
            id: id.to_string(),
            classroom_id: "CR-101".to_string(),
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            start_time: ClockTime::parse(start).unwrap(),
            end_time: ClockTime::parse(end).unwrap(),
            status,
            requested_by: "u-1".to_string(),
            purpose: "Seminar".to_string(),
            reviewed_by: None,
            review_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_create_and_get_booking() {
        let conn = setup_db();
        create_booking(&conn, &booking("b1", "2025-03-10", "09:00", "10:00", BookingStatus::Pending))
            .unwrap();

        let loaded = get_booking_by_id(&conn, "b1").unwrap().unwrap();
        assert_eq!(loaded.classroom_id, "CR-101");
        assert_eq!(loaded.start_time.to_string(), "09:00");
        assert_eq!(loaded.status, BookingStatus::Pending);
        assert!(get_booking_by_id(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_booking_requires_existing_classroom() {
        let conn = setup_db();
        let mut b = booking("b1", "2025-03-10", "09:00", "10:00", BookingStatus::Pending);
        b.classroom_id = "CR-999".to_string();
        assert!(create_booking(&conn, &b).is_err());
    }

    #[test]
    fn test_confirmed_bookings_filtered_by_room_day_status() {
        let conn = setup_db();
        create_booking(&conn, &booking("b1", "2025-03-10", "13:00", "14:00", BookingStatus::Confirmed))
            .unwrap();
        create_booking(&conn, &booking("b2", "2025-03-10", "09:00", "10:00", BookingStatus::Confirmed))
            .unwrap();
        create_booking(&conn, &booking("b3", "2025-03-10", "10:00", "11:00", BookingStatus::Pending))
            .unwrap();
        create_booking(&conn, &booking("b4", "2025-03-11", "09:00", "10:00", BookingStatus::Confirmed))
            .unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let confirmed = get_confirmed_bookings(&conn, "CR-101", &day).unwrap();
        let ids: Vec<&str> = confirmed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "b1"]);
    }

    #[test]
    fn test_trigger_blocks_overlapping_confirmed_insert() {
        let conn = setup_db();
        create_booking(&conn, &booking("b1", "2025-03-10", "09:00", "10:00", BookingStatus::Confirmed))
            .unwrap();

        let err = create_booking(
            &conn,
            &booking("b2", "2025-03-10", "09:30", "10:30", BookingStatus::Confirmed),
        )
        .unwrap_err();
        assert!(db::is_booking_conflict(&err));

        // Touching boundary is fine, and pending rows are never constrained.
        create_booking(&conn, &booking("b3", "2025-03-10", "10:00", "11:00", BookingStatus::Confirmed))
            .unwrap();
        create_booking(&conn, &booking("b4", "2025-03-10", "09:00", "10:00", BookingStatus::Pending))
            .unwrap();
    }

    #[test]
    fn test_trigger_blocks_overlapping_confirm_update() {
        let conn = setup_db();
        create_booking(&conn, &booking("b1", "2025-03-10", "09:00", "10:00", BookingStatus::Pending))
            .unwrap();
        create_booking(&conn, &booking("b2", "2025-03-10", "09:30", "10:30", BookingStatus::Pending))
            .unwrap();

        assert!(update_booking_status_if(
            &conn,
            "b1",
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            Some("admin"),
            None
        )
        .unwrap());

        let err = update_booking_status_if(
            &conn,
            "b2",
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            Some("admin"),
            None,
        )
        .unwrap_err();
        assert!(db::is_booking_conflict(&err));
        let b2 = get_booking_by_id(&conn, "b2").unwrap().unwrap();
        assert_eq!(b2.status, BookingStatus::Pending);
    }

    #[test]
    fn test_conditional_update_requires_expected_status() {
        let conn = setup_db();
        create_booking(&conn, &booking("b1", "2025-03-10", "09:00", "10:00", BookingStatus::Rejected))
            .unwrap();

        let changed = update_booking_status_if(
            &conn,
            "b1",
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            None,
            None,
        )
        .unwrap();
        assert!(!changed);
        assert!(!update_booking_status_if(
            &conn,
            "missing",
            BookingStatus::Pending,
            BookingStatus::Cancelled,
            None,
            None
        )
        .unwrap());
    }

    #[test]
    fn test_list_bookings_filters() {
        let conn = setup_db();
        create_booking(&conn, &booking("b1", "2025-03-10", "09:00", "10:00", BookingStatus::Pending))
            .unwrap();
        let mut other = booking("b2", "2025-03-11", "09:00", "10:00", BookingStatus::Confirmed);
        other.requested_by = "u-2".to_string();
        create_booking(&conn, &other).unwrap();

        let all = list_bookings(&conn, &BookingFilter { limit: 50, ..Default::default() }).unwrap();
        assert_eq!(all.len(), 2);

        let mine = list_bookings(
            &conn,
            &BookingFilter {
                requested_by: Some("u-2".to_string()),
                limit: 50,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "b2");

        let pending_on_day = list_bookings(
            &conn,
            &BookingFilter {
                date: NaiveDate::from_ymd_opt(2025, 3, 10),
                status: Some(BookingStatus::Pending),
                limit: 50,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pending_on_day.len(), 1);
        assert_eq!(pending_on_day[0].id, "b1");

        let limited = list_bookings(&conn, &BookingFilter { limit: 1, ..Default::default() }).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_booking_events_since() {
        let conn = setup_db();
        let b = booking("b1", "2025-03-10", "09:00", "10:00", BookingStatus::Pending);
        create_booking(&conn, &b).unwrap();

        let first = insert_booking_event(&conn, &b, "requested", "u-1").unwrap();
        let mut confirmed = b.clone();
        confirmed.status = BookingStatus::Confirmed;
        insert_booking_event(&conn, &confirmed, "approved", "admin").unwrap();

        let since = get_booking_events_since(&conn, first.id).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].kind, "approved");
        assert_eq!(since[0].status, BookingStatus::Confirmed);

        let history = get_booking_history(&conn, "b1").unwrap();
        assert_eq!(history.len(), 2);
    }
}
