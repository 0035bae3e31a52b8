// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod callback_executor;
pub mod circuit_breaker;
pub mod connection_pool;
pub mod response_classifier;
pub mod traits;
