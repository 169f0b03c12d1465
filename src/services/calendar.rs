use crate::models::{Booking, Classroom};

/// RFC 5545 TEXT escaping. Line breaks collapse to a literal `\n`.
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

pub fn generate_ics(booking: &Booking, classroom: &Classroom) -> String {
    let day = booking.date.format("%Y%m%d");
    let dtstart = format!("{day}T{}00", booking.start_time.to_string().replace(':', ""));
    let dtend = format!("{day}T{}00", booking.end_time.to_string().replace(':', ""));
    let dtstamp = booking.updated_at.format("%Y%m%dT%H%M%S").to_string();
    let uid = format!("{}@classbook", booking.id);

    let summary = escape_text(&format!("{} booking", classroom.name));
    let location = match &classroom.building {
        Some(building) => format!("{}\\, {}", escape_text(&classroom.name), escape_text(building)),
        None => escape_text(&classroom.name),
    };
    let description = if booking.purpose.is_empty() {
        "No purpose given".to_string()
    } else {
        escape_text(&booking.purpose)
    };

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Classbook//Classroom Booking//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         LOCATION:{location}\r\n\
         DESCRIPTION:{description}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}
