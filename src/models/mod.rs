pub mod user;
pub mod student;
pub mod category;
pub mod book;
pub mod copy;
pub mod loan;
pub mod notification;
pub mod admin_notification;

pub use copy::CopyStatus;
pub use loan::LoanStatus;
pub use notification::NotificationStatus;
pub use student::StudentStatus;
pub use user::Role;
