// Application layer - use cases and orchestration
//
// The ledger and the transfer orchestrator only depend on the repository and
// on the FundsService/PriceResolver traits; ExchangeService wires them up.

pub mod error;
pub mod funds;
pub mod ledger;
pub mod locks;
pub mod pricing;
pub mod service;
pub mod transfer;

pub use error::*;
pub use funds::*;
pub use ledger::*;
pub use locks::*;
pub use pricing::*;
pub use service::*;
pub use transfer::*;
