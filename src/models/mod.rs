pub mod dispatch;
pub mod event;
pub mod order;
pub mod position;
pub mod role;
pub mod vendor;
