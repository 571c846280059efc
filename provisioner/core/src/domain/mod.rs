// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements mod

pub mod config;
pub mod events;
pub mod fpg;
pub mod mediator;
pub mod repository;
pub mod share;
