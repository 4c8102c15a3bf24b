pub mod server;

pub use server::{render_metrics, start_metrics_server};
