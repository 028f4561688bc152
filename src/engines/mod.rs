// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod endpoint_executor;
pub mod probe_runner;
pub mod proxy_pool;
pub mod reqwest_engine;
pub mod signer;
pub mod traits;
pub mod validators;
