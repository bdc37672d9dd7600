//! Thin HTTP external interface over the CORE (spec §6). Routing itself is
//! not CORE logic (non-goal), but the binary needs one to be runnable —
//! built the way the teacher builds its own `server/` layer: an
//! `AppState`, an `axum::Router` in `app.rs`, handlers in `routes.rs`.

pub mod app;
pub mod routes;

pub use app::{build_app, AppState};
