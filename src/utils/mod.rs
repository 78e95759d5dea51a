pub mod glucose;
pub mod guardrails;
