// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Vellum Infra
//!
//! Concrete implementations of the contracts defined in `vellum-core`.
//!
//! This crate provides a headless resource provider backed by an in-memory surface cache,
//! a device that records every command it receives, and the cross-context surface handoff
//! record. They are used by the demo and by the test suites of the scheduling core.

#![warn(missing_docs)]

pub mod graphics;
pub mod resource;

pub use graphics::headless::{DeviceEvent, HeadlessResourceProvider, RecordingDevice};
pub use resource::{ReturnHandle, SurfaceCache, SurfaceHandoff};
