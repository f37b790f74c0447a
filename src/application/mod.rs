pub mod allowance;
pub mod fulfillment;
pub mod orchestrator;
pub mod payment;
