//! SwarmView Scenario Simulation Harness
//!
//! Runs the real session driver and scene reconciler against a scripted,
//! in-memory simulation service, so every lifecycle path can be exercised
//! deterministically and without a network.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                        │
//! │                                                           │
//! │  ┌──────────────┐  commands  ┌─────────────────────────┐  │
//! │  │ SessionHandle├───────────►│      SessionDriver      │  │
//! │  └──────────────┘            │  (single-writer task)   │  │
//! │         ▲                    └──────┬─────────▲────────┘  │
//! │         │ watch                     │ create  │ frames    │
//! │  ┌──────┴───────┐            ┌──────▼─────────┴────────┐  │
//! │  │  RenderLoop  │            │    ScriptedService      │  │
//! │  │  (headless)  │            │  + StreamScript per run │  │
//! │  └──────────────┘            └──────────▲──────────────┘  │
//! │                                         │ frames          │
//! │                              ┌──────────┴──────────────┐  │
//! │                              │   TickSource (seeded)   │  │
//! │                              └─────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use swarmview_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42, 20).with_ticks(30);
//! let result = runner.run(ScenarioId::AgentChurn).await;
//! assert!(result.passed);
//! ```

mod runner;
mod service;
mod ticks;
pub mod scenarios;

pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use service::{ScriptedService, ServiceCall, StreamScript};
pub use ticks::TickSource;
