pub mod authz;
pub mod bookings;
pub mod calendar;
pub mod scheduling;
