pub mod booking;
pub mod classroom;
pub mod time_slot;
pub mod user;

pub use booking::{Booking, BookingAction, BookingEvent, BookingStatus, NewBooking};
pub use classroom::Classroom;
pub use time_slot::{ClockTime, TimeRange};
pub use user::{Caller, Role};
