// SPDX-License-Identifier: MIT
//! Project records and their filesystem-backed store.

pub mod model;
pub mod store;

pub use model::{new_project_id, FileSnapshot, Project, ProjectStatus};
pub use store::ProjectStore;
