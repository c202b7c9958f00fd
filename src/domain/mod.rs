mod company;
mod ledger;
mod money;
mod stock;
mod transfer;
mod user;

pub use company::*;
pub use ledger::*;
pub use money::*;
pub use stock::*;
pub use transfer::*;
pub use user::*;
