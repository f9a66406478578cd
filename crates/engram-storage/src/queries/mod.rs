// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules. All access goes through the shared [`crate::Database`].

pub mod fts;
pub mod observations;
pub mod prompts;
pub mod sessions;
