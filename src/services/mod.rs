pub mod entitlement;
pub mod reconcile;
pub mod subscription;
pub mod worker;
