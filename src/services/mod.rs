//! Services Layer
//!
//! Pure business logic without the HTTP layer. Handlers stay thin and the
//! scheduler reuses the same functions.

pub mod catalog;
pub mod circulation;
pub mod recommend;
