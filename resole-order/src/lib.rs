pub mod assignment;
pub mod checkout;
pub mod geo;
pub mod polling;
pub mod reference;
pub mod retry;
pub mod settlement;
pub mod state_machine;

mod notify;

#[cfg(test)]
mod testkit;

pub use assignment::{select_nearest, Assignment, AssignmentEngine, AssignmentError, SweepReport};
pub use checkout::{
    AssignmentStatus, CheckoutError, CheckoutIdentity, CheckoutOrchestrator, CheckoutReceipt,
    CheckoutRequest, DeliveryInfo, GuestDetails,
};
pub use polling::{PollDecision, PollSchedule};
pub use retry::RetryPolicy;
pub use settlement::{
    CheckoutUrls, ConfirmTarget, Confirmation, PaymentSessionHandle, PaymentSettlement,
    PayoutAccount, PollOutcome, PollStatus, SettlementError,
};
pub use state_machine::{OrderStateMachine, TransitionError, TransitionOutcome};
