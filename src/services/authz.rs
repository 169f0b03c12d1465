use crate::errors::AppError;
use crate::models::{Booking, BookingAction, Caller, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RequestBooking,
    ApproveBooking,
    RejectBooking,
    CancelBooking,
    ViewAllBookings,
    ManageClassrooms,
}

impl From<BookingAction> for Action {
    fn from(action: BookingAction) -> Self {
        match action {
            BookingAction::Approve => Action::ApproveBooking,
            BookingAction::Reject => Action::RejectBooking,
            BookingAction::Cancel => Action::CancelBooking,
        }
    }
}

const CAPABILITIES: &[(Role, Action)] = &[
    (Role::Student, Action::RequestBooking),
    (Role::Student, Action::CancelBooking),
    (Role::Faculty, Action::RequestBooking),
    (Role::Faculty, Action::CancelBooking),
    (Role::Admin, Action::RequestBooking),
    (Role::Admin, Action::CancelBooking),
    (Role::Admin, Action::ApproveBooking),
    (Role::Admin, Action::RejectBooking),
    (Role::Admin, Action::ViewAllBookings),
    (Role::Admin, Action::ManageClassrooms),
];

pub fn permits(role: Role, action: Action) -> bool {
    CAPABILITIES.contains(&(role, action))
}

pub fn authorize(caller: &Caller, action: Action) -> Result<(), AppError> {
    if permits(caller.role, action) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role {} may not perform {action:?}",
            caller.role.as_str()
        )))
    }
}

/// Role check plus ownership: cancelling is reserved to the original requester.
pub fn authorize_booking(caller: &Caller, action: BookingAction, booking: &Booking) -> Result<(), AppError> {
    authorize(caller, action.into())?;
    if action == BookingAction::Cancel && booking.requested_by != caller.user_id {
        return Err(AppError::Forbidden(
            "only the original requester may cancel a booking".to_string(),
        ));
    }
    Ok(())
}

pub fn can_view(caller: &Caller, booking: &Booking) -> bool {
    booking.requested_by == caller.user_id || permits(caller.role, Action::ViewAllBookings)
}
