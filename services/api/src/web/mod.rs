pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

pub use auth::{login_handler, logout_handler, signup_handler};
pub use middleware::attach_session;
pub use rest::{
    download_report_handler, generate_report_handler, history_handler, open_form_handler,
    session_handler, submit_handler, upload_handler,
};
