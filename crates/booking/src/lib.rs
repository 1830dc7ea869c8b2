//! Tolkbridge Booking Core
//!
//! The booking-affecting operations of the interpretation service:
//! - Booking intake (validated creation of jobs)
//! - Matching engine (translator/job eligibility)
//! - Notification dispatcher (push, SMS, email fan-out)
//! - Lifecycle state machine (accept, cancel, update, end, reopen)
//!
//! The core owns no transport or persistence of its own; the host
//! wires in a [`tolkbridge_common::store::JobStore`] and the gateway
//! seams at startup.

pub mod intake;
pub mod lifecycle;
pub mod matching;
pub mod notify;

pub use intake::{BookingIntake, BookingResponse, CreateBookingRequest};
pub use lifecycle::{AcceptOutcome, CancelOutcome, Lifecycle, UpdateJobRequest};
pub use matching::MatchingEngine;
pub use notify::Dispatcher;
