// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Client façade: per-endpoint connection pools and `Call` orchestration.

pub mod facade;

pub use facade::Client;
