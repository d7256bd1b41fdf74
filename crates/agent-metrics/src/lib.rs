// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metrics pipeline of the host agent.
//!
//! Samples produced by [`source::Source`] implementations are collected once per
//! collection interval by the [`scheduler::CollectorScheduler`], bundled into
//! per-category reports and handed to the [`throttle::MetricsThrottle`]. The
//! throttle either folds them into the [`aggregator::Aggregator`] and reduces
//! them on its own timer, or buffers them verbatim until the configured bulk
//! size is reached. Finished reports leave through a [`sink::Sink`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod aggregator_service;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod errors;
pub mod flusher;
pub mod pipeline;
pub mod report;
pub mod sample;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod throttle;
