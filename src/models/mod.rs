// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod principal;
pub mod profile;
pub mod telemetry;

pub use principal::{
    FederatedCredential, FederatedToken, Principal, PrincipalChanges, ProviderKind,
};
pub use profile::{Profile, ProfileUpdate};
pub use telemetry::{params, AnalyticsEvent, EventParams, PageView, ParamValue};
