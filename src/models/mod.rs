pub mod actor;
pub mod courier;
pub mod event;
pub mod order;
