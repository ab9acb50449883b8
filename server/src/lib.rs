//! # Sidebar Engine
//!
//! This library keeps a small, continuously refreshed scoreboard sidebar on
//! every connected user's screen. Lines are templates whose placeholders
//! (player name, population, ping, balance, time) are resolved per user on
//! every refresh.
//!
//! ## Core Responsibilities
//!
//! ### Per-User State
//! The [`manager::SidebarManager`] owns at most one display surface per user,
//! together with the content last written to it. Enabling replaces any
//! existing surface; disabling, quitting or walking into a blacklisted world
//! tears it down.
//!
//! ### Change-Detecting Refresh
//! A periodic tick resolves every enabled user's lines and compares them with
//! what the surface already shows. Only real differences reach the surface,
//! so an idle sidebar costs template resolution and nothing else.
//!
//! ### Preference Reconciliation
//! Opt-in state is persisted per user through a
//! [`shared::PreferenceStore`]. Users without a record get the configured
//! default. The world blacklist overrides both.
//!
//! ## Module Organization
//!
//! - `roster`: who is connected and where they are
//! - `surface`: display surface traits and an in-memory host
//! - `resolver`: placeholder expansion
//! - `render`: line pipeline and the diff-render step
//! - `manager`: lifecycle, events, tick and reload handling
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::manager::SidebarManager;
//! use server::surface::MemoryHost;
//! use shared::{JsonConfigFile, MemoryPreferenceStore, SessionUser};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SidebarManager::builder(
//!         Arc::new(JsonConfigFile::new("config/sidebar.json")),
//!         Arc::new(MemoryPreferenceStore::new()),
//!         Arc::new(MemoryHost::new()),
//!     )
//!     .build();
//!
//!     // Starts the refresh tick and the config watcher
//!     manager.initialize()?;
//!
//!     // Wire the host's events to the manager
//!     manager.on_join(SessionUser::new("uuid-1", "Steve", "world"))?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     manager.shutdown();
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod manager;
pub mod render;
pub mod resolver;
pub mod roster;
pub mod surface;

pub use error::SidebarError;
pub use manager::SidebarManager;
