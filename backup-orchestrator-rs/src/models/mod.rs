pub mod action;
pub mod action_lock;
pub mod backup;
