// Lingua Quiz - Background Worker Core
//
// This crate implements the question-generation and assignment worker for the
// language-learning service. One worker process (one of N replicas) keeps each
// eligible user's question pools topped up via AI providers, assigns daily
// question sets in each user's local timezone, generates story sections, and
// dispatches time-of-day notifications.
//
// Architecture follows domain-driven design: persistence models and narrow
// store traits live in domains/*, infrastructure (AI, email, push) in kernel/,
// and the worker state machine plus the per-pass pipeline in worker/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod worker;

pub use config::*;
pub use worker::Worker;
