//! Database models split into domain-specific modules.

pub mod assist;
pub mod bigin;
pub mod bookings;
pub mod books;
pub mod commerce;
pub mod common;
pub mod crm;
pub mod desk;
pub mod expense;
pub mod inventory;
pub mod invoice;
pub mod module_item;
pub mod payroll;
pub mod salesiq;
pub mod service;
pub mod user;

pub use assist::*;
pub use bigin::*;
pub use bookings::*;
pub use books::*;
pub use commerce::*;
pub use common::*;
pub use crm::*;
pub use desk::*;
pub use expense::*;
pub use inventory::*;
pub use invoice::*;
pub use module_item::*;
pub use payroll::*;
pub use salesiq::*;
pub use service::*;
pub use user::*;
