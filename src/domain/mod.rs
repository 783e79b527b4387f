pub mod audit;
pub mod entitlement;
pub mod error;
pub mod event;
pub mod gateway;
pub mod id;
pub mod money;
pub mod payment;
pub mod subscription;
