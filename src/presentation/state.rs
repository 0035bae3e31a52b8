// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::services::dead_letter_service::DeadLetterService;
use crate::engines::circuit_breaker::CircuitBreakerRegistry;
use crate::queue::health_monitor::QueueHealthMonitor;
use std::sync::Arc;

/// 运维接口共享的服务句柄
#[derive(Clone)]
pub struct AppState {
    pub dead_letters: Arc<DeadLetterService>,
    pub monitor: Arc<QueueHealthMonitor>,
    pub breakers: CircuitBreakerRegistry,
}
