//! User account views.

pub mod model;
pub mod status;

pub use model::UserSnapshot;
pub use status::UserStatus;
