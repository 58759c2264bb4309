pub mod server;

pub use server::{io_handler, serve_stdio, McpServer};
