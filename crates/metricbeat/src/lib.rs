// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Metricbeat
//!
//! Runs metric collection modules and forwards what they produce to a
//! publisher.
//!
//! - [`runner`]: start/stop lifecycle of one module and its forwarding task
//! - [`module`]: the module and metricset contracts
//! - [`wrapper`]: a module that fetches its metricsets periodically
//! - [`publisher`]: the publisher contract and a channel backed publisher
//! - [`event`]: metricset data and the published event document
//! - [`testing`]: `_meta/data.json` fixture generation for metricset tests

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod errors;
pub mod event;
pub mod module;
pub mod publisher;
pub mod runner;
pub mod testing;
pub mod wrapper;
