//! tiny-tls-proxy
//!
//! A TLS-terminating reverse proxy in front of a single backend.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ TCP listener
//!                  │
//!                  ▼
//!            PROXY v1 decoder        (only behind a TCP load balancer)
//!                  │
//!                  ▼
//!            TLS handshake           (optional)
//!                  │
//!                  ▼
//!            HTTP server ──▶ forwarder ──▶ transport ──▶ Backend
//!                                              │
//!     Client ◀── rewrite pipeline ◀────────────┘
//!                (body rules, Content-Length, CSP/CORS)
//! ```

use clap::Parser;

use tiny_tls_proxy::cli::Cli;
use tiny_tls_proxy::lifecycle;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = lifecycle::run(cli).await {
        eprintln!("tiny-tls-proxy: {e}");
        std::process::exit(1);
    }
}
