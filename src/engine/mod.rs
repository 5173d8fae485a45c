pub mod ledger;
pub mod matcher;
pub mod transitions;
