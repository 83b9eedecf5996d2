//! Primary-wallet transactions with gas pricing per chain strategy

mod gas;
mod wallet;

pub use gas::GasEstimator;
pub use wallet::PrimaryWallet;
