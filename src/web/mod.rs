//! Axum glue: bearer-token middleware for resource servers, cookie-session
//! middleware and the login/callback/logout router for the code-flow client.

pub mod cookie;
mod middleware;
mod routes;

pub use middleware::{
    CurrentSession, CurrentUser, RequiredRole, SessionState, attach_session, authenticate,
    require_role,
};
pub use routes::{FlowState, session_router};
