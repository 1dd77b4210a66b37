//! The objective library: one pluggable state machine per channel protocol.
//!
//! Every objective obeys the same contract. [`Objective::update`] folds a
//! single observed event into the objective and never produces a
//! side-effect; [`Objective::crank`] advances the state machine as far as
//! local information permits and declares the side-effects the caller must
//! dispatch, together with the condition the objective is now blocked on.
//! Both are pure: all I/O lives in the engine that surrounds them.

pub mod direct_defund;
pub mod direct_fund;
pub mod errors;
pub mod event;
pub mod message;
pub mod objective;
pub mod payment;
pub mod requests;
pub mod side_effects;
pub mod virtual_defund;
pub mod virtual_fund;
pub mod voucher;

pub use direct_defund::DirectDefund;
pub use direct_fund::DirectFund;
pub use errors::TransitionError;
pub use event::ObjectiveEvent;
pub use message::Message;
pub use objective::{Objective, ObjectiveId, ObjectiveKind, ObjectiveStatus, WaitingFor};
pub use payment::Payment;
pub use requests::ObjectiveRequest;
pub use side_effects::{ChainTransaction, SideEffects};
pub use virtual_defund::VirtualDefund;
pub use virtual_fund::VirtualFund;
pub use voucher::{Voucher, VoucherInfo};
