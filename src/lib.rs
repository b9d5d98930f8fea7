// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Partitions the spans of every distributed trace into per-service groups
//! called subtraces, designates a root span within each, and enriches that
//! root with data aggregated from its sibling children. Sits inside an
//! OpenTelemetry-Collector-style pipeline as an intermediate processing
//! stage between an upstream receiver and a downstream consumer.

pub mod aggregator;
pub mod assigner;
pub mod attribute;
pub mod batch;
pub mod buffer;
pub mod config;
pub mod error;
pub mod model;
pub mod processor;
pub mod resource_hash;
pub mod worker;

pub use batch::{Context, TraceBatch, TraceForwarder};
pub use config::{ErrorMode, ProcessorConfig};
pub use error::{ConfigError, ForwardError, ProcessorError};
pub use processor::Processor;
