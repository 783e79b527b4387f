pub mod audit_repo;
pub mod entitlement_repo;
pub mod ledger_repo;
pub mod locks;
pub mod payment_repo;
pub mod subscription_repo;
