pub mod channel;
pub mod gateway;
pub mod topic;
