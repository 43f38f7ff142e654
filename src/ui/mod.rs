mod app;
mod components;
mod state;

pub use app::ChatApp;
pub use state::{format_time, sender_label};
