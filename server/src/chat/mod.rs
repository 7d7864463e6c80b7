pub mod notifications;
pub mod presence;
